#![forbid(unsafe_code)]

//! Sanitizing Markdown compiler.
//!
//! [`compile`] is a pure function from untrusted Markdown text to a
//! [`CompiledDoc`]: a sanitized HTML string, the rendered block structure the
//! preview pane draws from, and the ordered text segments the search engine
//! scans. It never fails — malformed input degrades to visible literal text.

pub mod blocks;
pub mod code;
pub mod links;
pub mod math;
mod writer;

pub use blocks::{Block, SegmentLoc, Span, SpanStyle, TableRow};
pub use writer::DIAGRAM_LANGUAGE;

/// One diagram fence awaiting isolated rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagramSource {
    /// Document-order ordinal, matching `Block::Diagram { index }` and the
    /// `data-diagram` attribute of the HTML placeholder.
    pub index: usize,
    /// The fence's literal text, exactly as written.
    pub source: String,
}

/// Output of one compile pass. Derived from the raw text only; regenerate it
/// by calling [`compile`] again rather than patching any field.
#[derive(Clone, Debug, Default)]
pub struct CompiledDoc {
    /// Sanitized HTML. Diagram fences appear as placeholder containers.
    pub html: String,
    /// Rendered block structure for the native preview pane.
    pub blocks: Vec<Block>,
    /// Ordered locations of every visible text run, in document order.
    pub segments: Vec<SegmentLoc>,
    /// Diagram fences to hand to the isolation service.
    pub diagrams: Vec<DiagramSource>,
}

impl CompiledDoc {
    /// The text of one search segment.
    #[must_use]
    pub fn segment_text(&self, segment: usize) -> &str {
        let Some(loc) = self.segments.get(segment) else {
            return "";
        };
        match *loc {
            SegmentLoc::Span { block, span } => match self.blocks.get(block) {
                Some(
                    Block::Heading { spans, .. }
                    | Block::Paragraph { spans }
                    | Block::ListItem { spans, .. },
                ) => spans.get(span).map_or("", |s| s.text.as_str()),
                _ => "",
            },
            SegmentLoc::Cell {
                block,
                row,
                cell,
                span,
            } => match self.blocks.get(block) {
                Some(Block::Table { rows }) => rows
                    .get(row)
                    .and_then(|r| r.cells.get(cell))
                    .and_then(|c| c.get(span))
                    .map_or("", |s| s.text.as_str()),
                _ => "",
            },
            SegmentLoc::Code { block } => match self.blocks.get(block) {
                Some(Block::Code { code, .. }) => code.as_str(),
                _ => "",
            },
            SegmentLoc::Math { block } => match self.blocks.get(block) {
                Some(Block::Math { source, .. }) => source.as_str(),
                _ => "",
            },
        }
    }
}

/// Compile Markdown to sanitized output.
#[must_use]
pub fn compile(raw_text: &str) -> CompiledDoc {
    let html_out = writer::render_html(raw_text);
    let block_out = blocks::parse_blocks(raw_text);

    let diagrams = html_out
        .diagrams
        .into_iter()
        .enumerate()
        .map(|(index, source)| DiagramSource { index, source })
        .collect();

    CompiledDoc {
        html: html_out.html,
        blocks: block_out.blocks,
        segments: block_out.segments,
        diagrams,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_is_pure() {
        let md = "# a\n\n[x](javascript:alert(1)) $y^2$\n\n```mermaid\ngraph TD;\n```\n";
        let first = compile(md);
        let second = compile(md);
        assert_eq!(first.html, second.html);
        assert_eq!(first.segments, second.segments);
        assert_eq!(first.diagrams, second.diagrams);
    }

    #[test]
    fn empty_input_compiles_to_empty_output() {
        let doc = compile("");
        assert!(doc.html.is_empty());
        assert!(doc.blocks.is_empty());
        assert!(doc.segments.is_empty());
        assert!(doc.diagrams.is_empty());
    }

    #[test]
    fn no_live_script_vectors_survive_hostile_input() {
        let hostile = concat!(
            "<script>alert(1)</script>\n\n",
            "<img src=x onerror=alert(2)>\n\n",
            "[c](javascript:alert(3))\n\n",
            "[d](JAVASCRIPT:alert(4))\n\n",
            "![e](vbscript:alert(5))\n\n",
            "`<script>inline</script>`\n",
        );
        let doc = compile(hostile);
        // No live elements or navigable schemes; hostile markup may only
        // survive as escaped visible text.
        assert!(!doc.html.contains("<script"));
        assert!(!doc.html.contains("<img"));
        assert!(!doc.html.to_ascii_lowercase().contains("javascript:"));
        assert!(!doc.html.to_ascii_lowercase().contains("vbscript:"));
        assert!(doc.html.contains("&lt;script&gt;"));
    }

    #[test]
    fn diagram_indices_agree_between_html_and_blocks() {
        let md = "```mermaid\none\n```\n\ntext\n\n```mermaid\ntwo\n```\n";
        let doc = compile(md);
        assert_eq!(doc.diagrams.len(), 2);
        assert_eq!(doc.diagrams[0].source.trim(), "one");
        assert_eq!(doc.diagrams[1].source.trim(), "two");

        let slots: Vec<usize> = doc
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Diagram { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn segment_text_resolves_every_segment() {
        let md = "# Head\n\npara *em*\n\n| a | b |\n| - | - |\n| c | d |\n\n```rs\ncode\n```\n\n$$x^2$$\n";
        let doc = compile(md);
        assert!(!doc.segments.is_empty());
        for idx in 0..doc.segments.len() {
            assert!(!doc.segment_text(idx).is_empty());
        }
        assert_eq!(doc.segment_text(doc.segments.len()), "");
    }
}
