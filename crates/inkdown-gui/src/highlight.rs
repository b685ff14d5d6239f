#![forbid(unsafe_code)]

//! Lightweight Markdown layouting for the source editor pane.
//!
//! This is presentation only — headings scale, inline code and fences get a
//! monospace treatment — and runs per keystroke, so it works line by line
//! instead of through the full parser.

use eframe::egui;

use crate::markdown_fence::{FenceState, consume_fence_delimiter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineKind {
    Plain,
    FencedCode,
    Heading(usize),
}

#[derive(Clone, Copy, Debug, Default)]
struct RunBuffer {
    kind: Option<LineKind>,
    start: usize,
    end: usize,
}

struct Palette {
    base: egui::TextFormat,
    weak: egui::TextFormat,
    inline_code: egui::TextFormat,
    headings: [egui::TextFormat; 6],
}

impl Palette {
    fn format_for(&self, kind: LineKind) -> &egui::TextFormat {
        match kind {
            LineKind::Plain => &self.base,
            LineKind::FencedCode => &self.inline_code,
            LineKind::Heading(level) => &self.headings[level - 1],
        }
    }
}

fn flush_run(
    job: &mut egui::text::LayoutJob,
    source: &str,
    run: &mut RunBuffer,
    palette: &Palette,
) {
    let Some(kind) = run.kind.take() else {
        return;
    };
    if run.start >= run.end || run.end > source.len() {
        return;
    }
    job.append(&source[run.start..run.end], 0.0, palette.format_for(kind).clone());
}

fn extend_run(
    job: &mut egui::text::LayoutJob,
    source: &str,
    run: &mut RunBuffer,
    palette: &Palette,
    kind: LineKind,
    start: usize,
    end: usize,
) {
    match run.kind {
        Some(existing) if existing == kind => run.end = end,
        _ => {
            flush_run(job, source, run, palette);
            run.kind = Some(kind);
            run.start = start;
            run.end = end;
        }
    }
}

fn heading_color(visuals: &egui::Visuals, level: usize, color_mode: bool) -> egui::Color32 {
    if !color_mode {
        return visuals.hyperlink_color;
    }

    let dark_palette = [
        egui::Color32::from_rgb(0xFF, 0xB8, 0x6C),
        egui::Color32::from_rgb(0x8B, 0xE9, 0xFD),
        egui::Color32::from_rgb(0x50, 0xFA, 0x7B),
        egui::Color32::from_rgb(0xBD, 0x93, 0xF9),
        egui::Color32::from_rgb(0xFF, 0x79, 0xC6),
        egui::Color32::from_rgb(0xF1, 0xFA, 0x8C),
    ];
    let light_palette = [
        egui::Color32::from_rgb(0x9C, 0x3D, 0x00),
        egui::Color32::from_rgb(0x00, 0x5F, 0x9A),
        egui::Color32::from_rgb(0x2E, 0x7D, 0x32),
        egui::Color32::from_rgb(0x6A, 0x1B, 0x9A),
        egui::Color32::from_rgb(0xAD, 0x14, 0x57),
        egui::Color32::from_rgb(0x5D, 0x40, 0x37),
    ];
    let palette = if visuals.dark_mode {
        &dark_palette
    } else {
        &light_palette
    };
    palette[level.saturating_sub(1).min(palette.len() - 1)]
}

fn build_palette(
    style: &egui::Style,
    visuals: &egui::Visuals,
    heading_colors: bool,
) -> Palette {
    let base_font = egui::TextStyle::Body.resolve(style);
    let code_font = egui::TextStyle::Monospace.resolve(style);
    let base = egui::TextFormat::simple(base_font.clone(), visuals.text_color());
    let weak = egui::TextFormat::simple(base_font, visuals.weak_text_color());

    let heading_scales = [2.0, 1.5, 1.25, 1.1, 1.0, 0.95];
    let headings = std::array::from_fn(|idx| {
        let mut format = base.clone();
        format.font_id.size *= heading_scales[idx];
        format.color = heading_color(visuals, idx + 1, heading_colors);
        format
    });

    let mut inline_code = base.clone();
    inline_code.font_id = code_font;
    inline_code.background = visuals.faint_bg_color;

    Palette {
        base,
        weak,
        inline_code,
        headings,
    }
}

/// Lay out the whole editor buffer with Markdown-aware styling.
#[must_use]
pub(crate) fn markdown_layout_job(
    style: &egui::Style,
    visuals: &egui::Visuals,
    source: &str,
    heading_colors: bool,
) -> egui::text::LayoutJob {
    let palette = build_palette(style, visuals, heading_colors);
    let mut job = egui::text::LayoutJob {
        text: String::with_capacity(source.len()),
        ..Default::default()
    };

    let mut fence: Option<FenceState> = None;
    let mut run = RunBuffer::default();
    let mut offset = 0usize;

    for line in source.split_inclusive('\n') {
        let line_start = offset;
        let line_end = line_start + line.len();
        offset = line_end;

        if consume_fence_delimiter(line, &mut fence) {
            flush_run(&mut job, source, &mut run, &palette);
            job.append(line, 0.0, palette.weak.clone());
            continue;
        }
        if fence.is_some() {
            extend_run(
                &mut job,
                source,
                &mut run,
                &palette,
                LineKind::FencedCode,
                line_start,
                line_end,
            );
            continue;
        }

        let trimmed = line.trim_start();
        let level = trimmed.bytes().take_while(|b| *b == b'#').count();
        if (1..=6).contains(&level) && trimmed.as_bytes().get(level) == Some(&b' ') {
            extend_run(
                &mut job,
                source,
                &mut run,
                &palette,
                LineKind::Heading(level),
                line_start,
                line_end,
            );
            continue;
        }

        if !line.contains('`') {
            extend_run(
                &mut job,
                source,
                &mut run,
                &palette,
                LineKind::Plain,
                line_start,
                line_end,
            );
            continue;
        }

        // Inline code: split the line on backtick pairs.
        flush_run(&mut job, source, &mut run, &palette);
        let mut rest = line;
        while let Some(start) = rest.find('`') {
            let (before, after_tick) = rest.split_at(start);
            job.append(before, 0.0, palette.base.clone());
            let after_tick = &after_tick[1..];
            if let Some(end) = after_tick.find('`') {
                let (code, after_code) = after_tick.split_at(end);
                job.append("`", 0.0, palette.weak.clone());
                job.append(code, 0.0, palette.inline_code.clone());
                job.append("`", 0.0, palette.weak.clone());
                rest = &after_code[1..];
            } else {
                job.append("`", 0.0, palette.weak.clone());
                job.append(after_tick, 0.0, palette.base.clone());
                rest = "";
                break;
            }
        }
        if !rest.is_empty() {
            job.append(rest, 0.0, palette.base.clone());
        }
    }

    flush_run(&mut job, source, &mut run, &palette);
    job
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_for_snippet<'a>(
        job: &'a egui::text::LayoutJob,
        snippet: &str,
    ) -> &'a egui::text::LayoutSection {
        let start = job.text.find(snippet);
        assert!(
            start.is_some(),
            "Expected snippet '{snippet}' in rendered text"
        );
        let start = start.unwrap_or_default();
        let end = start + snippet.len();
        let section = job
            .sections
            .iter()
            .find(|section| section.byte_range.start <= start && section.byte_range.end >= end);
        assert!(section.is_some(), "Expected section for snippet '{snippet}'");
        section.unwrap_or_else(|| unreachable!())
    }

    #[test]
    fn fence_content_is_styled_as_code() {
        let style = egui::Style::default();
        let visuals = egui::Visuals::dark();
        let source = "~~~mermaid\ngraph TD;\n~~~\n";
        let job = markdown_layout_job(&style, &visuals, source, false);
        let code_section = section_for_snippet(&job, "graph TD;");
        assert_eq!(code_section.format.background, visuals.faint_bg_color);
        assert_eq!(
            code_section.format.font_id,
            egui::TextStyle::Monospace.resolve(&style)
        );
    }

    #[test]
    fn fence_delimiters_are_weak_text() {
        let style = egui::Style::default();
        let visuals = egui::Visuals::dark();
        let source = "```bash\necho hi\n```\n";
        let job = markdown_layout_job(&style, &visuals, source, false);
        let fence_section = section_for_snippet(&job, "```bash");
        assert_eq!(fence_section.format.color, visuals.weak_text_color());
    }

    #[test]
    fn layout_covers_every_byte_of_the_source() {
        let style = egui::Style::default();
        let visuals = egui::Visuals::dark();
        let source = "# h\nplain `code` tail\n```rs\nfenced\n";
        let job = markdown_layout_job(&style, &visuals, source, false);
        assert_eq!(job.text, source);
    }

    #[test]
    fn heading_colors_mode_distinguishes_levels() {
        let style = egui::Style::default();
        let visuals = egui::Visuals::dark();
        let source = "# Top\n## Next\n";
        let default_job = markdown_layout_job(&style, &visuals, source, false);
        let color_job = markdown_layout_job(&style, &visuals, source, true);

        let default_h1 = section_for_snippet(&default_job, "Top");
        let default_h2 = section_for_snippet(&default_job, "Next");
        let color_h1 = section_for_snippet(&color_job, "Top");
        let color_h2 = section_for_snippet(&color_job, "Next");

        assert_eq!(default_h1.format.color, visuals.hyperlink_color);
        assert_eq!(default_h2.format.color, visuals.hyperlink_color);
        assert_ne!(color_h1.format.color, visuals.hyperlink_color);
        assert_ne!(color_h2.format.color, visuals.hyperlink_color);
        assert_ne!(color_h1.format.color, color_h2.format.color);
    }
}
