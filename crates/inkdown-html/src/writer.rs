#![forbid(unsafe_code)]

//! Sanitizing HTML writer over the `pulldown-cmark` event stream.
//!
//! Security posture, in priority order:
//! 1. Raw HTML events are written as escaped visible text. There is no
//!    allow-raw-HTML mode to misconfigure.
//! 2. Link and image destinations must pass [`crate::links::is_allowed`];
//!    anything else degrades to plain text while the label stays visible.
//! 3. Fenced code goes through the classed highlighter, which only ever sees
//!    the literal fence text.
//! 4. A `mermaid` fence becomes a placeholder container (source preserved
//!    hidden for re-submission); the isolated renderer fills it in later.
//! 5. Math is typeset to MathML; a failed expression renders as an inline
//!    error with the escaped literal source.

use pulldown_cmark::{Alignment, CodeBlockKind, Event, HeadingLevel, Tag, TagEnd};
use pulldown_cmark_escape::{StrWrite, escape_href, escape_html, escape_html_body_text};

use crate::{code, links, math};

/// Fence info string that routes a block to the diagram pipeline.
pub const DIAGRAM_LANGUAGE: &str = "mermaid";

pub(crate) struct HtmlOutput {
    pub(crate) html: String,
    /// Literal sources of diagram fences, in document order. Placeholder
    /// containers in `html` refer to these by index.
    pub(crate) diagrams: Vec<String>,
}

pub(crate) fn render_html(source: &str) -> HtmlOutput {
    let mut html = String::with_capacity(source.len() * 3 / 2);
    let mut diagrams = Vec::new();
    // Writing into a String cannot fail.
    let _ = HtmlWriter::new(inkdown_core::markdown::parser(source), &mut html, &mut diagrams).run();
    HtmlOutput { html, diagrams }
}

enum TableState {
    Head,
    Body,
}

struct CodeFence {
    language: Option<String>,
    text: String,
}

struct HtmlWriter<'a, I, W> {
    iter: I,
    writer: W,
    diagrams: &'a mut Vec<String>,
    end_newline: bool,
    /// One entry per open link: whether an `<a>` tag was actually emitted.
    link_stack: Vec<bool>,
    code_fence: Option<CodeFence>,
    table_state: TableState,
    table_alignments: Vec<Alignment>,
    table_cell_index: usize,
}

impl<'a, 'input, I, W> HtmlWriter<'a, I, W>
where
    I: Iterator<Item = Event<'input>>,
    W: StrWrite,
{
    fn new(iter: I, writer: W, diagrams: &'a mut Vec<String>) -> Self {
        Self {
            iter,
            writer,
            diagrams,
            end_newline: true,
            link_stack: Vec::new(),
            code_fence: None,
            table_state: TableState::Head,
            table_alignments: Vec::new(),
            table_cell_index: 0,
        }
    }

    fn write(&mut self, s: &str) -> Result<(), W::Error> {
        self.writer.write_str(s)?;
        if !s.is_empty() {
            self.end_newline = s.ends_with('\n');
        }
        Ok(())
    }

    fn write_newline(&mut self) -> Result<(), W::Error> {
        self.end_newline = true;
        self.writer.write_str("\n")
    }

    fn run(mut self) -> Result<(), W::Error> {
        while let Some(event) = self.iter.next() {
            match event {
                Event::Start(tag) => self.start_tag(tag)?,
                Event::End(tag) => self.end_tag(tag)?,
                Event::Text(text) => {
                    if let Some(fence) = self.code_fence.as_mut() {
                        fence.text.push_str(text.as_ref());
                    } else {
                        escape_html_body_text(&mut self.writer, &text)?;
                        self.end_newline = text.ends_with('\n');
                    }
                }
                Event::Code(text) => {
                    self.write("<code>")?;
                    escape_html_body_text(&mut self.writer, &text)?;
                    self.write("</code>")?;
                }
                Event::InlineMath(text) => self.math(&text, false)?,
                Event::DisplayMath(text) => self.math(&text, true)?,
                // Never live markup; render the literal tags as page content.
                Event::Html(raw) | Event::InlineHtml(raw) => {
                    escape_html_body_text(&mut self.writer, &raw)?;
                }
                Event::SoftBreak => self.write_newline()?,
                Event::HardBreak => self.write("<br />\n")?,
                Event::Rule => {
                    if !self.end_newline {
                        self.write_newline()?;
                    }
                    self.write("<hr />\n")?;
                }
                Event::TaskListMarker(checked) => {
                    if checked {
                        self.write("<input type=\"checkbox\" disabled checked /> ")?;
                    } else {
                        self.write("<input type=\"checkbox\" disabled /> ")?;
                    }
                }
                Event::FootnoteReference(_) => {}
            }
        }
        Ok(())
    }

    fn start_tag(&mut self, tag: Tag<'input>) -> Result<(), W::Error> {
        match tag {
            Tag::Paragraph => {
                if !self.end_newline {
                    self.write_newline()?;
                }
                self.write("<p>")
            }
            Tag::Heading { level, .. } => {
                if !self.end_newline {
                    self.write_newline()?;
                }
                self.write("<")?;
                self.write(level_tag(level))?;
                self.write(">")
            }
            Tag::BlockQuote(_) => {
                if !self.end_newline {
                    self.write_newline()?;
                }
                self.write("<blockquote>\n")
            }
            Tag::CodeBlock(kind) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => {
                        let token = info.split(' ').next().unwrap_or_default().trim();
                        (!token.is_empty()).then(|| token.to_owned())
                    }
                    CodeBlockKind::Indented => None,
                };
                self.code_fence = Some(CodeFence {
                    language,
                    text: String::new(),
                });
                Ok(())
            }
            Tag::List(Some(1)) => self.write("<ol>\n"),
            Tag::List(Some(start)) => {
                self.write("<ol start=\"")?;
                self.write(start.to_string().as_str())?;
                self.write("\">\n")
            }
            Tag::List(None) => self.write("<ul>\n"),
            Tag::Item => self.write("<li>"),
            Tag::Emphasis => self.write("<em>"),
            Tag::Strong => self.write("<strong>"),
            Tag::Strikethrough => self.write("<del>"),
            Tag::Link {
                dest_url, title, ..
            } => {
                if links::is_allowed(&dest_url) {
                    self.link_stack.push(true);
                    self.write("<a href=\"")?;
                    escape_href(&mut self.writer, &dest_url)?;
                    if !title.is_empty() {
                        self.write("\" title=\"")?;
                        escape_html(&mut self.writer, &title)?;
                    }
                    self.write("\">")
                } else {
                    tracing::debug!(dest = %dest_url, "dropped link with disallowed scheme");
                    self.link_stack.push(false);
                    Ok(())
                }
            }
            Tag::Image {
                dest_url, title, ..
            } => {
                if links::is_allowed(&dest_url) {
                    self.write("<img src=\"")?;
                    escape_href(&mut self.writer, &dest_url)?;
                    self.write("\" alt=\"")?;
                    self.consume_alt_text()?;
                    if !title.is_empty() {
                        self.write("\" title=\"")?;
                        escape_html(&mut self.writer, &title)?;
                    }
                    self.write("\" />")
                } else {
                    tracing::debug!(dest = %dest_url, "dropped image with disallowed scheme");
                    // Alt text stays visible as ordinary content.
                    Ok(())
                }
            }
            Tag::Table(alignments) => {
                self.table_alignments = alignments;
                self.write("<table>")
            }
            Tag::TableHead => {
                self.table_state = TableState::Head;
                self.table_cell_index = 0;
                self.write("<thead><tr>")
            }
            Tag::TableRow => {
                self.table_cell_index = 0;
                self.write("<tr>")
            }
            Tag::TableCell => {
                match self.table_state {
                    TableState::Head => self.write("<th")?,
                    TableState::Body => self.write("<td")?,
                }
                match self
                    .table_alignments
                    .get(self.table_cell_index)
                    .copied()
                    .unwrap_or(Alignment::None)
                {
                    Alignment::Left => self.write(" style=\"text-align: left\">"),
                    Alignment::Center => self.write(" style=\"text-align: center\">"),
                    Alignment::Right => self.write(" style=\"text-align: right\">"),
                    Alignment::None => self.write(">"),
                }
            }
            _ => Ok(()),
        }
    }

    fn end_tag(&mut self, tag: TagEnd) -> Result<(), W::Error> {
        match tag {
            TagEnd::Paragraph => self.write("</p>\n"),
            TagEnd::Heading(level) => {
                self.write("</")?;
                self.write(level_tag(level))?;
                self.write(">\n")
            }
            TagEnd::BlockQuote(_) => self.write("</blockquote>\n"),
            TagEnd::CodeBlock => {
                let Some(fence) = self.code_fence.take() else {
                    return Ok(());
                };
                if fence.language.as_deref() == Some(DIAGRAM_LANGUAGE) {
                    self.diagram_placeholder(&fence.text)
                } else {
                    self.code_block(&fence)
                }
            }
            TagEnd::List(true) => self.write("</ol>\n"),
            TagEnd::List(false) => self.write("</ul>\n"),
            TagEnd::Item => self.write("</li>\n"),
            TagEnd::Emphasis => self.write("</em>"),
            TagEnd::Strong => self.write("</strong>"),
            TagEnd::Strikethrough => self.write("</del>"),
            TagEnd::Link => {
                if self.link_stack.pop().unwrap_or(false) {
                    self.write("</a>")
                } else {
                    Ok(())
                }
            }
            TagEnd::Table => self.write("</tbody></table>\n"),
            TagEnd::TableHead => {
                self.table_state = TableState::Body;
                self.write("</tr></thead><tbody>\n")
            }
            TagEnd::TableRow => self.write("</tr>\n"),
            TagEnd::TableCell => {
                self.table_cell_index += 1;
                match self.table_state {
                    TableState::Head => self.write("</th>"),
                    TableState::Body => self.write("</td>"),
                }
            }
            _ => Ok(()),
        }
    }

    fn code_block(&mut self, fence: &CodeFence) -> Result<(), W::Error> {
        if !self.end_newline {
            self.write_newline()?;
        }
        match code::highlight(&fence.text, fence.language.as_deref()) {
            Some(highlighted) => {
                self.write("<pre><code class=\"language-")?;
                if let Some(lang) = fence.language.as_deref() {
                    escape_html(&mut self.writer, lang)?;
                }
                self.write("\">")?;
                // Classed spans around already-escaped fence text.
                self.write(&highlighted)?;
                self.write("</code></pre>\n")
            }
            None => {
                self.write("<pre><code>")?;
                escape_html_body_text(&mut self.writer, &fence.text)?;
                self.write("</code></pre>\n")
            }
        }
    }

    fn diagram_placeholder(&mut self, source: &str) -> Result<(), W::Error> {
        let index = self.diagrams.len();
        self.diagrams.push(source.to_owned());

        if !self.end_newline {
            self.write_newline()?;
        }
        self.write("<div class=\"diagram\" data-diagram=\"")?;
        self.write(index.to_string().as_str())?;
        self.write("\">")?;
        // Source kept twice: hidden for re-submission on edits, and as the
        // placeholder the async fill-in pass replaces.
        self.write("<pre class=\"diagram-source\" hidden>")?;
        escape_html_body_text(&mut self.writer, source)?;
        self.write("</pre>")?;
        self.write("<div class=\"diagram-slot\">")?;
        escape_html_body_text(&mut self.writer, source)?;
        self.write("</div></div>\n")
    }

    fn math(&mut self, expression: &str, display: bool) -> Result<(), W::Error> {
        let class = if display {
            "math math-display"
        } else {
            "math math-inline"
        };
        match math::typeset(expression, display) {
            math::MathOutcome::Mathml(mathml) => {
                self.write("<span class=\"")?;
                self.write(class)?;
                self.write("\">")?;
                self.write(&mathml)?;
                self.write("</span>")
            }
            math::MathOutcome::Error(message) => {
                self.write("<span class=\"")?;
                self.write(class)?;
                self.write(" math-error\" title=\"")?;
                escape_html(&mut self.writer, &message)?;
                self.write("\"><code>")?;
                escape_html_body_text(&mut self.writer, expression)?;
                self.write("</code></span>")
            }
        }
    }

    /// Consume events up to the matching image end, keeping only the text.
    fn consume_alt_text(&mut self) -> Result<(), W::Error> {
        let mut depth = 1usize;
        loop {
            let Some(event) = self.iter.next() else {
                return Ok(());
            };
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Event::Text(text) | Event::Code(text) => {
                    escape_html(&mut self.writer, &text)?;
                }
                Event::SoftBreak | Event::HardBreak => self.write(" ")?,
                _ => {}
            }
        }
    }
}

const fn level_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(source: &str) -> String {
        render_html(source).html
    }

    #[test]
    fn raw_html_is_escaped_visible_text() {
        let out = html("<script>alert(1)</script>\n");
        assert!(!out.contains("<script"));
        assert!(out.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn inline_html_is_escaped() {
        let out = html("hello <img src=x onerror=alert(1)> world\n");
        // The tag must only survive as escaped visible text: the handler
        // attribute cannot be live without its `<img` element.
        assert!(!out.contains("<img"));
        assert!(out.contains("&lt;img src=x onerror=alert(1)&gt;"));
    }

    #[test]
    fn script_scheme_link_degrades_to_visible_text() {
        let out = html("[x](javascript:alert(1))\n");
        assert!(!out.contains("href"));
        assert!(!out.contains("javascript:"));
        assert!(out.contains(">x<") || out.contains("<p>x</p>"));
    }

    #[test]
    fn allowed_link_keeps_navigation() {
        let out = html("[docs](https://example.com/a)\n");
        assert!(out.contains("<a href=\"https://example.com/a\">docs</a>"));
    }

    #[test]
    fn fragment_and_relative_links_survive() {
        assert!(html("[a](#top)\n").contains("<a href=\"#top\">a</a>"));
        assert!(html("[b](other.md)\n").contains("<a href=\"other.md\">b</a>"));
    }

    #[test]
    fn disallowed_image_renders_alt_text() {
        let out = html("![fallback](javascript:alert(1))\n");
        assert!(!out.contains("<img"));
        assert!(out.contains("fallback"));
    }

    #[test]
    fn fenced_code_without_language_is_escaped_plain() {
        let out = html("```\n<b>&\n```\n");
        assert!(out.contains("<pre><code>"));
        assert!(out.contains("&lt;b&gt;"));
    }

    #[test]
    fn fenced_code_with_language_gets_classed_spans() {
        let out = html("```rs\nlet x = 1;\n```\n");
        assert!(out.contains("class=\"language-rs\""));
        assert!(out.contains("<span"));
    }

    #[test]
    fn mermaid_fence_becomes_placeholder_with_hidden_source() {
        let result = render_html("```mermaid\ngraph TD; A-->B;\n```\n");
        assert_eq!(result.diagrams.len(), 1);
        assert!(result.diagrams[0].contains("A-->B"));
        assert!(result.html.contains("class=\"diagram\""));
        assert!(result.html.contains("class=\"diagram-source\" hidden"));
        assert!(result.html.contains("class=\"diagram-slot\""));
        assert!(!result.html.contains("language-mermaid"));
    }

    #[test]
    fn math_error_is_inline_and_document_continues() {
        let out = html("before $\\frac{1}$ after\n");
        assert!(out.contains("math-error"));
        assert!(out.contains("before"));
        assert!(out.contains("after"));
    }

    #[test]
    fn lone_dollar_stays_literal() {
        let out = html("price is $5 today\n");
        assert!(!out.contains("math"));
        assert!(out.contains("$5"));
    }

    #[test]
    fn unterminated_fence_degrades_to_block() {
        let out = html("```rs\nlet x = 1;\n");
        assert!(out.contains("let x = 1;"));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(html(""), "");
    }

    #[test]
    fn tables_render_with_alignment() {
        let out = html("| a | b |\n|:--|--:|\n| c | d |\n");
        assert!(out.contains("<table>"));
        assert!(out.contains("text-align: left"));
        assert!(out.contains("text-align: right"));
    }

    #[test]
    fn task_markers_render_disabled_checkboxes() {
        let out = html("- [x] done\n- [ ] todo\n");
        assert!(out.contains("checkbox\" disabled checked"));
        assert!(out.contains("checkbox\" disabled /"));
    }
}
