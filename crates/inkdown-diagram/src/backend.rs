#![forbid(unsafe_code)]

use mermaid_rs_renderer::config::LayoutConfig;
use mermaid_rs_renderer::layout::compute_layout;
use mermaid_rs_renderer::parser::parse_mermaid;
use mermaid_rs_renderer::render::render_svg;
use mermaid_rs_renderer::theme::Theme;

/// One diagram renderer, driven from inside the worker thread.
///
/// Implementations see only the literal fence text and return raw SVG markup
/// (sanitized by the service afterwards) or a human-readable error.
pub trait DiagramBackend {
    fn render(&mut self, source: &str) -> Result<String, String>;
}

/// Default backend: Mermaid source rendered natively.
pub struct MermaidBackend {
    theme: Theme,
    layout: LayoutConfig,
}

impl MermaidBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            theme: Theme::modern(),
            layout: LayoutConfig::default(),
        }
    }
}

impl Default for MermaidBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagramBackend for MermaidBackend {
    fn render(&mut self, source: &str) -> Result<String, String> {
        let parsed = parse_mermaid(source).map_err(|err| format!("parse error: {err}"))?;
        let layout = compute_layout(&parsed.graph, &self.theme, &self.layout);
        Ok(render_svg(&layout, &self.theme, &self.layout))
    }
}
