#![forbid(unsafe_code)]

//! Native preview of the compiled block structure.
//!
//! Renders only what the sanitizing compiler produced; raw Markdown never
//! reaches this pane. Search highlights are painted from match ranges kept
//! beside the text, so clearing them is free of any text mutation.

use eframe::egui;
use inkdown_html::{Block, CompiledDoc, Span};

use crate::diagrams::{DiagramSlots, SlotState};
use crate::search::{SearchMatch, SearchState};

pub(crate) struct PreviewEnv<'a> {
    pub(crate) doc: &'a CompiledDoc,
    pub(crate) search: &'a SearchState,
    pub(crate) slots: &'a DiagramSlots,
    /// Segment to bring into view this frame (active match navigation).
    pub(crate) scroll_target: Option<SearchMatch>,
}

pub(crate) fn show(ui: &mut egui::Ui, env: &PreviewEnv<'_>) {
    let mut quote_depth: usize = 0;

    for (block_idx, block) in env.doc.blocks.iter().enumerate() {
        match block {
            Block::QuoteStart => {
                quote_depth = quote_depth.saturating_add(1);
            }
            Block::QuoteEnd => {
                quote_depth = quote_depth.saturating_sub(1);
            }
            _ => with_quote(ui, quote_depth, |ui| {
                show_block(ui, env, block_idx, block);
            }),
        }
    }
}

fn show_block(ui: &mut egui::Ui, env: &PreviewEnv<'_>, block_idx: usize, block: &Block) {
    match block {
        Block::Heading { level, spans } => {
            let font = heading_font(ui, *level);
            let (job, has_target) = spans_layout_job(ui, spans, font, env);
            let response = ui.add(egui::Label::new(job).wrap());
            if has_target {
                response.scroll_to_me(Some(egui::Align::Center));
            }
            ui.add_space(4.0);
        }
        Block::Paragraph { spans } => {
            let (job, has_target) = spans_layout_job(ui, spans, body_font(ui), env);
            let response = ui.add(egui::Label::new(job).wrap());
            if has_target {
                response.scroll_to_me(Some(egui::Align::Center));
            }
            ui.add_space(6.0);
        }
        Block::ListItem { depth, task, spans } => {
            let font = body_font(ui);
            ui.horizontal_wrapped(|ui| {
                ui.add_space(*depth as f32 * 12.0);
                if let Some(checked) = task {
                    let mut checked = *checked;
                    ui.add_enabled(false, egui::Checkbox::new(&mut checked, ""));
                } else {
                    ui.label("•");
                }
                let (job, has_target) = spans_layout_job(ui, spans, font, env);
                let response = ui.add(egui::Label::new(job).wrap());
                if has_target {
                    response.scroll_to_me(Some(egui::Align::Center));
                }
            });
            ui.add_space(4.0);
        }
        Block::Code {
            language,
            code,
            segment,
        } => {
            if let Some(lang) = language.as_deref() {
                ui.label(egui::RichText::new(lang).weak());
            }

            let frame = egui::Frame::group(ui.style())
                .fill(ui.visuals().faint_bg_color)
                .inner_margin(egui::Margin::same(8));
            frame.show(ui, |ui| {
                let (job, has_target) = text_layout_job(ui, code, *segment, mono_font(ui), env);
                let response = ui.add(egui::Label::new(job).wrap().selectable(true));
                if has_target {
                    response.scroll_to_me(Some(egui::Align::Center));
                }
            });
            ui.add_space(6.0);
        }
        Block::Diagram { index } => {
            show_diagram(ui, env, *index);
            ui.add_space(6.0);
        }
        Block::Math {
            source,
            error,
            segment,
        } => {
            let frame = egui::Frame::group(ui.style())
                .fill(ui.visuals().faint_bg_color)
                .inner_margin(egui::Margin::same(8));
            frame.show(ui, |ui| {
                let (job, has_target) = text_layout_job(ui, source, *segment, mono_font(ui), env);
                let response = ui.add(egui::Label::new(job).wrap());
                if has_target {
                    response.scroll_to_me(Some(egui::Align::Center));
                }
                if let Some(message) = error {
                    ui.colored_label(
                        ui.visuals().error_fg_color,
                        format!("math error: {message}"),
                    );
                }
            });
            ui.add_space(6.0);
        }
        Block::Table { rows } => {
            let font = body_font(ui);
            let cols = rows.iter().map(|r| r.cells.len()).max().unwrap_or(0);
            let grid_id = ui.id().with(("table", block_idx));

            egui::Grid::new(grid_id).striped(true).show(ui, |ui| {
                for row in rows {
                    for cell in &row.cells {
                        let (mut job, has_target) =
                            spans_layout_job(ui, cell, font.clone(), env);
                        if row.header {
                            for section in &mut job.sections {
                                section.format.underline =
                                    egui::Stroke::new(1.0, ui.visuals().weak_text_color());
                            }
                        }
                        let response = ui.add(egui::Label::new(job).wrap());
                        if has_target {
                            response.scroll_to_me(Some(egui::Align::Center));
                        }
                    }
                    for _ in row.cells.len()..cols {
                        ui.label("");
                    }
                    ui.end_row();
                }
            });
            ui.add_space(6.0);
        }
        Block::Rule => {
            ui.separator();
            ui.add_space(6.0);
        }
        Block::QuoteStart | Block::QuoteEnd => {}
    }
}

fn show_diagram(ui: &mut egui::Ui, env: &PreviewEnv<'_>, index: usize) {
    match env.slots.slot(index) {
        None | Some(SlotState::Pending) => {
            let frame = egui::Frame::group(ui.style())
                .fill(ui.visuals().faint_bg_color)
                .inner_margin(egui::Margin::same(8));
            frame.show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(egui::RichText::new("Rendering diagram…").weak());
                });
            });
        }
        Some(SlotState::Ready(svg)) => {
            let image = egui::Image::from_bytes(env.slots.uri(index), svg.clone().into_bytes());
            ui.add(image.max_width(ui.available_width()));
        }
        Some(SlotState::Failed(message)) => {
            let frame = egui::Frame::group(ui.style())
                .fill(ui.visuals().faint_bg_color)
                .inner_margin(egui::Margin::same(8));
            frame.show(ui, |ui| {
                ui.colored_label(
                    ui.visuals().error_fg_color,
                    format!("Diagram failed: {message}"),
                );
                if let Some(diagram) = env.doc.diagrams.get(index) {
                    ui.label(
                        egui::RichText::new(diagram.source.trim_end())
                            .weak()
                            .monospace(),
                    );
                }
            });
        }
    }
}

fn with_quote(ui: &mut egui::Ui, depth: usize, add_contents: impl FnOnce(&mut egui::Ui)) {
    if depth == 0 {
        add_contents(ui);
        return;
    }

    ui.horizontal(|ui| {
        ui.add_space((depth - 1) as f32 * 12.0);
        ui.colored_label(ui.visuals().weak_text_color(), "|");
        ui.add_space(4.0);
        ui.vertical(add_contents);
    });
}

fn body_font(ui: &egui::Ui) -> egui::FontId {
    ui.style()
        .text_styles
        .get(&egui::TextStyle::Body)
        .cloned()
        .unwrap_or_else(|| egui::FontId::proportional(16.0))
}

fn mono_font(ui: &egui::Ui) -> egui::FontId {
    ui.style()
        .text_styles
        .get(&egui::TextStyle::Monospace)
        .cloned()
        .unwrap_or_else(|| egui::FontId::monospace(14.0))
}

fn heading_font(ui: &egui::Ui, level: u8) -> egui::FontId {
    let base = ui
        .style()
        .text_styles
        .get(&egui::TextStyle::Heading)
        .cloned()
        .unwrap_or_else(|| egui::FontId::proportional(22.0));

    let scale = match level {
        1 => 1.20,
        2 => 1.10,
        3 => 1.05,
        _ => 1.0,
    };

    egui::FontId {
        size: base.size * scale,
        family: base.family,
    }
}

/// Background colors for (plain, active) search matches.
fn match_colors(visuals: &egui::Visuals) -> (egui::Color32, egui::Color32) {
    if visuals.dark_mode {
        (
            egui::Color32::from_rgb(0x52, 0x42, 0x10),
            egui::Color32::from_rgb(0x8F, 0x6A, 0x00),
        )
    } else {
        (
            egui::Color32::from_rgb(0xFF, 0xF5, 0x9D),
            egui::Color32::from_rgb(0xFF, 0xC4, 0x05),
        )
    }
}

fn span_format(ui: &egui::Ui, span: &Span, base_font: &egui::FontId) -> egui::text::TextFormat {
    let mut format = egui::text::TextFormat {
        font_id: if span.style.code || span.style.math {
            mono_font(ui)
        } else {
            base_font.clone()
        },
        color: ui.visuals().text_color(),
        ..Default::default()
    };

    if span.style.code {
        format.background = ui.visuals().faint_bg_color;
    }
    if span.style.emphasis || span.style.math {
        format.italics = true;
    }
    if span.style.strong {
        format.color = ui.visuals().strong_text_color();
    }
    if span.style.strikethrough {
        format.strikethrough = egui::Stroke::new(1.0, format.color);
    }
    if span.style.link.is_some() {
        format.underline = egui::Stroke::new(1.0, ui.visuals().hyperlink_color);
        format.color = ui.visuals().hyperlink_color;
    }

    format
}

fn spans_layout_job(
    ui: &egui::Ui,
    spans: &[Span],
    base_font: egui::FontId,
    env: &PreviewEnv<'_>,
) -> (egui::text::LayoutJob, bool) {
    let mut job = egui::text::LayoutJob::default();
    let mut has_target = false;

    for span in spans {
        let format = span_format(ui, span, &base_font);
        has_target |= append_with_highlights(ui, &mut job, &span.text, span.segment, format, env);
    }

    (job, has_target)
}

fn text_layout_job(
    ui: &egui::Ui,
    text: &str,
    segment: usize,
    font: egui::FontId,
    env: &PreviewEnv<'_>,
) -> (egui::text::LayoutJob, bool) {
    let mut job = egui::text::LayoutJob::default();
    let format = egui::text::TextFormat {
        font_id: font,
        color: ui.visuals().text_color(),
        ..Default::default()
    };
    let has_target = append_with_highlights(ui, &mut job, text, segment, format, env);
    (job, has_target)
}

/// Append `text`, splitting around this segment's match ranges so matched
/// spans get a highlight background (the active one a stronger color).
/// Returns true when the frame's scroll target lives in this segment.
fn append_with_highlights(
    ui: &egui::Ui,
    job: &mut egui::text::LayoutJob,
    text: &str,
    segment: usize,
    format: egui::text::TextFormat,
    env: &PreviewEnv<'_>,
) -> bool {
    let matches = env.search.matches_for_segment(segment);
    if matches.is_empty() {
        job.append(text, 0.0, format);
        return false;
    }

    let (plain_bg, active_bg) = match_colors(ui.visuals());
    let active = env.search.active_match();
    let mut pos = 0usize;

    for m in matches {
        let (start, end) = (m.start.min(text.len()), m.end.min(text.len()));
        if start > pos {
            job.append(&text[pos..start], 0.0, format.clone());
        }
        let mut highlighted = format.clone();
        highlighted.background = if active == Some(*m) { active_bg } else { plain_bg };
        job.append(&text[start..end], 0.0, highlighted);
        pos = end;
    }
    if pos < text.len() {
        job.append(&text[pos..], 0.0, format);
    }

    env.scroll_target.is_some_and(|target| target.segment == segment)
}
