#![forbid(unsafe_code)]

//! Rendered block structure shared by the preview pane and the search
//! engine.
//!
//! Blocks hold only plain data — no rendering-surface types — so everything
//! downstream (search in particular) is testable without a UI. Every visible
//! text run is registered as a numbered segment; the segment order is the
//! document order search scans in.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Tag, TagEnd};

use crate::writer::DIAGRAM_LANGUAGE;
use crate::{links, math};

#[derive(Clone, Debug)]
pub enum Block {
    QuoteStart,
    QuoteEnd,
    Heading {
        level: u8,
        spans: Vec<Span>,
    },
    Paragraph {
        spans: Vec<Span>,
    },
    ListItem {
        depth: usize,
        task: Option<bool>,
        spans: Vec<Span>,
    },
    Code {
        language: Option<String>,
        code: String,
        segment: usize,
    },
    /// Placeholder slot for one diagram fence; `index` matches the compiled
    /// document's diagram source list.
    Diagram {
        index: usize,
    },
    /// Display math. `error` carries the typeset failure, if any; the
    /// literal source stays visible either way.
    Math {
        source: String,
        error: Option<String>,
        segment: usize,
    },
    Table {
        rows: Vec<TableRow>,
    },
    Rule,
}

#[derive(Clone, Debug)]
pub struct TableRow {
    pub header: bool,
    pub cells: Vec<Vec<Span>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub emphasis: bool,
    pub strong: bool,
    pub code: bool,
    pub strikethrough: bool,
    pub math: bool,
    /// Live link target. `None` for plain text and for links whose scheme
    /// failed the allow-list (their text still renders).
    pub link: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
    /// Index into the document's ordered segment table.
    pub segment: usize,
}

/// Where one search segment lives inside the block structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentLoc {
    Span { block: usize, span: usize },
    Cell { block: usize, row: usize, cell: usize, span: usize },
    Code { block: usize },
    Math { block: usize },
}

pub(crate) struct BlockOutput {
    pub(crate) blocks: Vec<Block>,
    pub(crate) segments: Vec<SegmentLoc>,
}

#[derive(Clone, Copy, Debug)]
enum BlockKind {
    Heading(u8),
    Paragraph,
    ListItem { depth: usize },
}

struct Builder {
    blocks: Vec<Block>,
    segments: Vec<SegmentLoc>,
    diagram_count: usize,

    kind: Option<BlockKind>,
    spans: Vec<PendingSpan>,

    list_depth: usize,
    emphasis_depth: usize,
    strong_depth: usize,
    strikethrough_depth: usize,
    link_stack: Vec<Option<String>>,
    task_marker: Option<bool>,

    code_language: Option<String>,
    code_text: String,
    in_code_block: bool,

    in_table: bool,
    in_table_head: bool,
    in_table_cell: bool,
    table_rows: Vec<TableRow>,
    table_row_cells: Vec<Vec<PendingSpan>>,
    table_cell_spans: Vec<PendingSpan>,
}

/// A span before segment numbering; numbering happens when the owning block
/// is pushed, so segment order always matches display order.
struct PendingSpan {
    text: String,
    style: SpanStyle,
}

pub(crate) fn parse_blocks(source: &str) -> BlockOutput {
    let mut b = Builder {
        blocks: Vec::new(),
        segments: Vec::new(),
        diagram_count: 0,
        kind: None,
        spans: Vec::new(),
        list_depth: 0,
        emphasis_depth: 0,
        strong_depth: 0,
        strikethrough_depth: 0,
        link_stack: Vec::new(),
        task_marker: None,
        code_language: None,
        code_text: String::new(),
        in_code_block: false,
        in_table: false,
        in_table_head: false,
        in_table_cell: false,
        table_rows: Vec::new(),
        table_row_cells: Vec::new(),
        table_cell_spans: Vec::new(),
    };

    for event in inkdown_core::markdown::parser(source) {
        b.event(event);
    }
    b.flush_open_block();

    BlockOutput {
        blocks: b.blocks,
        segments: b.segments,
    }
}

impl Builder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(end) => self.end(end),
            Event::Text(text) => {
                if self.in_code_block {
                    if self.in_table && self.in_table_cell {
                        self.push_text(text.as_ref(), true, false);
                    } else {
                        self.code_text.push_str(text.as_ref());
                    }
                } else {
                    self.push_text(text.as_ref(), false, false);
                }
            }
            Event::Code(text) => self.push_text(text.as_ref(), true, false),
            Event::InlineMath(text) => self.push_text(text.as_ref(), false, true),
            Event::DisplayMath(text) => {
                if self.in_table {
                    self.push_text(text.as_ref(), false, true);
                    return;
                }
                let resume = self.kind;
                self.flush_open_block();
                let source = text.to_string();
                let error = math::typeset_error(&source, true);
                let segment = self.segments.len();
                self.segments.push(SegmentLoc::Math {
                    block: self.blocks.len(),
                });
                self.blocks.push(Block::Math {
                    source,
                    error,
                    segment,
                });
                // Text after the math in the same paragraph starts a fresh
                // block of the interrupted kind.
                self.kind = resume;
            }
            // Raw markup renders as its literal text, same as the HTML
            // surface.
            Event::Html(raw) | Event::InlineHtml(raw) => {
                if self.kind.is_none() && !self.in_table {
                    self.kind = Some(BlockKind::Paragraph);
                    self.spans.clear();
                }
                self.push_text(raw.as_ref(), false, false);
            }
            Event::SoftBreak | Event::HardBreak => {
                if self.in_code_block {
                    self.code_text.push('\n');
                } else {
                    self.push_text("\n", false, false);
                }
            }
            Event::TaskListMarker(checked) => {
                if !self.in_table {
                    self.task_marker = Some(checked);
                }
            }
            Event::Rule => self.blocks.push(Block::Rule),
            Event::FootnoteReference(_) => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::BlockQuote(_) => self.blocks.push(Block::QuoteStart),
            Tag::List(_) => self.list_depth = self.list_depth.saturating_add(1),
            Tag::Item => {
                if !self.in_table {
                    self.kind = Some(BlockKind::ListItem {
                        depth: self.list_depth,
                    });
                    self.spans.clear();
                    self.task_marker = None;
                }
            }
            Tag::Paragraph => {
                if !self.in_table && self.kind.is_none() {
                    self.kind = Some(BlockKind::Paragraph);
                    self.spans.clear();
                }
            }
            Tag::Heading { level, .. } => {
                if !self.in_table {
                    self.kind = Some(BlockKind::Heading(heading_level(level)));
                    self.spans.clear();
                }
            }
            Tag::Emphasis => self.emphasis_depth = self.emphasis_depth.saturating_add(1),
            Tag::Strong => self.strong_depth = self.strong_depth.saturating_add(1),
            Tag::Strikethrough => {
                self.strikethrough_depth = self.strikethrough_depth.saturating_add(1);
            }
            Tag::Link { dest_url, .. } => {
                let target = links::is_allowed(&dest_url).then(|| dest_url.to_string());
                self.link_stack.push(target);
            }
            Tag::CodeBlock(kind) => {
                self.in_code_block = true;
                if !self.in_table {
                    self.code_text.clear();
                    self.code_language = match kind {
                        CodeBlockKind::Fenced(info) => {
                            let token = info.split(' ').next().unwrap_or_default().trim();
                            (!token.is_empty()).then(|| token.to_owned())
                        }
                        CodeBlockKind::Indented => None,
                    };
                }
            }
            Tag::Table(_) => {
                self.in_table = true;
                self.table_rows.clear();
            }
            Tag::TableHead => self.in_table_head = true,
            Tag::TableRow => {
                if self.in_table {
                    self.table_row_cells.clear();
                }
            }
            Tag::TableCell => {
                if self.in_table {
                    self.in_table_cell = true;
                    self.table_cell_spans.clear();
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, end: TagEnd) {
        match end {
            TagEnd::BlockQuote(_) => self.blocks.push(Block::QuoteEnd),
            TagEnd::List(_) => self.list_depth = self.list_depth.saturating_sub(1),
            TagEnd::Emphasis => self.emphasis_depth = self.emphasis_depth.saturating_sub(1),
            TagEnd::Strong => self.strong_depth = self.strong_depth.saturating_sub(1),
            TagEnd::Strikethrough => {
                self.strikethrough_depth = self.strikethrough_depth.saturating_sub(1);
            }
            TagEnd::Link => {
                let _ = self.link_stack.pop();
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                if self.in_table {
                    return;
                }
                let language = self.code_language.take();
                let code = std::mem::take(&mut self.code_text);
                if language.as_deref() == Some(DIAGRAM_LANGUAGE) {
                    let index = self.diagram_count;
                    self.diagram_count += 1;
                    self.blocks.push(Block::Diagram { index });
                } else {
                    let segment = self.segments.len();
                    self.segments.push(SegmentLoc::Code {
                        block: self.blocks.len(),
                    });
                    self.blocks.push(Block::Code {
                        language,
                        code,
                        segment,
                    });
                }
            }
            TagEnd::Heading(_) => {
                if let Some(BlockKind::Heading(level)) = self.kind.take() {
                    let pending = std::mem::take(&mut self.spans);
                    let spans = self.number_spans(pending);
                    self.blocks.push(Block::Heading { level, spans });
                }
            }
            TagEnd::Paragraph => {
                if matches!(self.kind, Some(BlockKind::Paragraph)) {
                    self.kind = None;
                    if !self.spans.is_empty() {
                        let pending = std::mem::take(&mut self.spans);
                    let spans = self.number_spans(pending);
                        self.blocks.push(Block::Paragraph { spans });
                    }
                }
            }
            TagEnd::Item => {
                if let Some(BlockKind::ListItem { depth }) = self.kind.take() {
                    let pending = std::mem::take(&mut self.spans);
                    let spans = self.number_spans(pending);
                    self.blocks.push(Block::ListItem {
                        depth,
                        task: self.task_marker.take(),
                        spans,
                    });
                }
            }
            // A raw HTML block rendered as literal text ends here; close the
            // synthetic paragraph holding it.
            TagEnd::HtmlBlock => self.flush_open_block(),
            TagEnd::TableHead => self.in_table_head = false,
            TagEnd::TableCell => {
                if self.in_table {
                    self.in_table_cell = false;
                    self.table_row_cells
                        .push(std::mem::take(&mut self.table_cell_spans));
                }
            }
            TagEnd::TableRow => {
                if self.in_table {
                    let cells = std::mem::take(&mut self.table_row_cells);
                    self.push_table_row(cells);
                }
            }
            TagEnd::Table => {
                self.in_table = false;
                let rows = std::mem::take(&mut self.table_rows);
                self.blocks.push(Block::Table { rows });
            }
            _ => {}
        }
    }

    fn style(&self, code: bool, math: bool) -> SpanStyle {
        if code || math {
            return SpanStyle {
                emphasis: false,
                strong: false,
                code,
                strikethrough: false,
                math,
                link: None,
            };
        }
        SpanStyle {
            emphasis: self.emphasis_depth > 0,
            strong: self.strong_depth > 0,
            code: false,
            strikethrough: self.strikethrough_depth > 0,
            math: false,
            link: self.link_stack.last().and_then(Clone::clone),
        }
    }

    fn push_text(&mut self, text: &str, code: bool, math: bool) {
        if text.is_empty() {
            return;
        }
        let style = self.style(code, math);
        let spans = if self.in_table && self.in_table_cell {
            &mut self.table_cell_spans
        } else {
            &mut self.spans
        };
        match spans.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => spans.push(PendingSpan {
                text: text.to_owned(),
                style,
            }),
        }
    }

    /// Assign segment ids to a finished block's spans.
    fn number_spans(&mut self, pending: Vec<PendingSpan>) -> Vec<Span> {
        let block = self.blocks.len();
        pending
            .into_iter()
            .enumerate()
            .map(|(span_idx, p)| {
                let segment = self.segments.len();
                self.segments.push(SegmentLoc::Span {
                    block,
                    span: span_idx,
                });
                Span {
                    text: p.text,
                    style: p.style,
                    segment,
                }
            })
            .collect()
    }

    fn push_table_row(&mut self, cells: Vec<Vec<PendingSpan>>) {
        // No other block can be pushed while a table is open, so this is the
        // index the table block will occupy.
        let block = self.blocks.len();
        let row_idx = self.table_rows.len();
        let numbered: Vec<Vec<Span>> = cells
            .into_iter()
            .enumerate()
            .map(|(cell_idx, cell)| {
                cell.into_iter()
                    .enumerate()
                    .map(|(span_idx, p)| {
                        let segment = self.segments.len();
                        self.segments.push(SegmentLoc::Cell {
                            block,
                            row: row_idx,
                            cell: cell_idx,
                            span: span_idx,
                        });
                        Span {
                            text: p.text,
                            style: p.style,
                            segment,
                        }
                    })
                    .collect()
            })
            .collect();
        self.table_rows.push(TableRow {
            header: self.in_table_head,
            cells: numbered,
        });
    }

    /// Close any block left open by a truncated event stream or an
    /// interrupting display-math block.
    fn flush_open_block(&mut self) {
        match self.kind.take() {
            Some(BlockKind::Heading(level)) => {
                let pending = std::mem::take(&mut self.spans);
                let spans = self.number_spans(pending);
                self.blocks.push(Block::Heading { level, spans });
            }
            Some(BlockKind::Paragraph) => {
                if !self.spans.is_empty() {
                    let pending = std::mem::take(&mut self.spans);
                    let spans = self.number_spans(pending);
                    self.blocks.push(Block::Paragraph { spans });
                }
            }
            Some(BlockKind::ListItem { depth }) => {
                let pending = std::mem::take(&mut self.spans);
                let spans = self.number_spans(pending);
                self.blocks.push(Block::ListItem {
                    depth,
                    task: self.task_marker.take(),
                    spans,
                });
            }
            None => {}
        }
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}
