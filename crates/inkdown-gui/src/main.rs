#![forbid(unsafe_code)]
#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

#[cfg(target_arch = "wasm32")]
compile_error!("inkdown is a native desktop app; web/wasm builds are not supported.");

use std::{ffi::OsString, path::PathBuf, time::Duration};

use eframe::egui;
use inkdown_diagram::DiagramService;

mod conflict;
mod debounce;
mod diagrams;
mod disk_io;
mod document;
mod format;
mod highlight;
mod markdown_fence;
mod notices;
mod prefs;
mod preview;
mod search;
mod view;
mod watcher;

use diagrams::DiagramSlots;
use document::{DocEvent, Document};
use notices::{NoticeKind, Notices};
use prefs::Prefs;
use search::{SearchMatch, SearchState};
use view::{Mode, PaneMetrics, ViewState};

const ZOOM_STEP: f32 = 0.1;
const MIN_ZOOM_FACTOR: f32 = 0.5;
const MAX_ZOOM_FACTOR: f32 = 3.0;
/// Poll cadence while diagram renders are in flight.
const DIAGRAM_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
struct LaunchOptions {
    mode: Mode,
    path: Option<PathBuf>,
}

fn parse_launch_options<I, S>(args: I) -> LaunchOptions
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut mode = Mode::Rendered;
    let mut path = None;

    for arg in args {
        let arg = arg.into();
        if arg == "-e" {
            mode = Mode::Source;
            continue;
        }
        if arg == "-s" {
            mode = Mode::Split;
            continue;
        }

        if path.is_none() {
            path = Some(PathBuf::from(arg));
        }
    }

    LaunchOptions { mode, path }
}

fn main() -> eframe::Result {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let launch_options = parse_launch_options(std::env::args_os().skip(1));
    let app = InkdownApp::from_launch_options(launch_options);

    // Viewport sizes are in points, so they scale with the OS DPI factor.
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 768.0])
            .with_min_inner_size([480.0, 320.0]),
        ..Default::default()
    };
    eframe::run_native(
        "inkdown",
        options,
        Box::new(move |cc| {
            egui_extras::install_image_loaders(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
}

#[derive(Clone, Debug)]
enum PendingAction {
    NewBlank,
    Open(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConflictChoice {
    Reload,
    Keep,
}

struct InkdownApp {
    doc: Document,
    view: ViewState,
    search: SearchState,
    diagram_service: DiagramService,
    slots: DiagramSlots,
    notices: Notices,
    prefs: Prefs,
    pending_action: Option<PendingAction>,
    prefs_applied: bool,
}

impl InkdownApp {
    fn from_launch_options(options: LaunchOptions) -> Self {
        let prefs = Prefs::load();
        let mut app = Self {
            doc: Document::default(),
            view: ViewState::with_autosave(Duration::from_secs(prefs.autosave_secs.max(1))),
            search: SearchState::default(),
            diagram_service: DiagramService::new(),
            slots: DiagramSlots::new(),
            notices: Notices::default(),
            prefs,
            pending_action: None,
            prefs_applied: false,
        };
        if let Some(path) = options.path {
            app.open_path(path);
        }
        app.set_mode(options.mode);
        app
    }

    fn set_mode(&mut self, mode: Mode) {
        self.view.set_mode(mode, &mut self.doc);
        if mode != Mode::Split {
            self.view.split.reset();
        }
    }

    fn adjust_zoom(&mut self, ctx: &egui::Context, delta: f32) {
        let zoom = (ctx.zoom_factor() + delta).clamp(MIN_ZOOM_FACTOR, MAX_ZOOM_FACTOR);
        ctx.set_zoom_factor(zoom);
        self.prefs.zoom = zoom;
        self.prefs.save();
    }

    fn update_viewport_title(&self, ctx: &egui::Context) {
        let mode = match self.view.mode() {
            Mode::Rendered => "",
            Mode::Source => " (Source)",
            Mode::Split => " (Split)",
        };
        ctx.send_viewport_cmd(egui::ViewportCommand::Title(format!(
            "inkdown — {}{}{}",
            self.doc.title(),
            if self.doc.is_dirty() { "*" } else { "" },
            mode
        )));
    }

    fn commit_editable_buffer(&mut self) {
        if self.view.mode().is_editable() {
            self.doc.commit_text(&self.view.buffer);
        }
    }

    fn format_document(&mut self) {
        if !self.view.mode().is_editable() {
            return;
        }
        let options = format::options_for_path(self.doc.path());
        let formatted = format::format_source(self.view.buffer.as_str(), options);
        if formatted != self.view.buffer {
            self.view.buffer = formatted;
            self.view.note_edited();
        }
    }

    fn request_action(&mut self, action: PendingAction) {
        if self.doc.is_dirty() || (self.view.mode().is_editable() && self.view.buffer != self.doc.raw_text()) {
            self.pending_action = Some(action);
        } else {
            self.apply_action(action);
        }
    }

    fn apply_action(&mut self, action: PendingAction) {
        match action {
            PendingAction::NewBlank => {
                self.doc = Document::default();
                self.view.sync_buffer(&self.doc);
                self.notices.clear();
            }
            PendingAction::Open(path) => self.open_path(path),
        }
    }

    fn apply_pending_action_and_close_dialog(&mut self) {
        if let Some(action) = self.pending_action.take() {
            self.apply_action(action);
        }
    }

    fn open_file(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Markdown", &["md", "markdown"])
            .pick_file()
        else {
            return;
        };

        self.request_action(PendingAction::Open(path));
    }

    fn open_path(&mut self, path: PathBuf) {
        match Document::open(path) {
            Ok(doc) => {
                self.doc = doc;
                self.view.sync_buffer(&self.doc);
                self.notices.clear();
            }
            Err(err) => {
                self.notices.error(format!("Open failed: {err}"));
            }
        }
    }

    fn save_doc(&mut self, save_as: bool) -> bool {
        self.commit_editable_buffer();

        let result = if save_as || self.doc.path().is_none() {
            let Some(path) = rfd::FileDialog::new()
                .add_filter("Markdown", &["md", "markdown"])
                .save_file()
            else {
                return false;
            };
            self.doc.save_as(path)
        } else {
            self.doc.save()
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                self.notices.error(format!("Save failed: {err}"));
                false
            }
        }
    }

    /// Drain timers, watcher events, search chunks, and diagram completions.
    fn pump(&mut self, ctx: &egui::Context) {
        for event in self.doc.pump() {
            match event {
                DocEvent::Reloaded => {
                    if self.view.mode().is_editable() {
                        self.view.sync_buffer(&self.doc);
                    }
                    self.notices.info("Reloaded after external change");
                }
                DocEvent::ConflictRaised => {}
                DocEvent::FileDeleted => {
                    self.notices
                        .error("File was deleted on disk; it is no longer watched");
                }
                DocEvent::IoError(err) => self.notices.error(err),
            }
        }

        let pumped = self.view.pump(&mut self.doc);
        if pumped.committed {
            // Fresh compile output; repaint so the preview reflects it.
            ctx.request_repaint();
        }
        if pumped.autosave_due {
            tracing::debug!("autosave triggered");
            if let Err(err) = self.doc.save() {
                self.notices.error(format!("Autosave failed: {err}"));
            }
        }

        self.search.ensure_fresh(self.doc.generation());
        if self.search.step(self.doc.compiled()) {
            ctx.request_repaint();
        }

        self.slots.sync(&self.doc, &mut self.diagram_service);
        if self.slots.pump(&mut self.diagram_service) {
            ctx.request_repaint();
        }
        if self.slots.any_pending() {
            ctx.request_repaint_after(DIAGRAM_POLL);
        }

        let timers = [self.doc.reconcile_remaining(), self.view.repaint_after()];
        if let Some(after) = timers.into_iter().flatten().min() {
            ctx.request_repaint_after(after);
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        let dialog_open = self.pending_action.is_some() || self.doc.conflict().is_some();

        let (
            open,
            save,
            save_as,
            new_doc,
            cycle_mode,
            format_doc,
            zoom_in,
            zoom_out,
            find,
            find_next,
            find_prev,
            escape,
        ) = ctx.input(|i| {
            let cmd = i.modifiers.command;
            (
                cmd && i.key_pressed(egui::Key::O),
                cmd && i.key_pressed(egui::Key::S) && !i.modifiers.shift,
                cmd && i.key_pressed(egui::Key::S) && i.modifiers.shift,
                cmd && i.key_pressed(egui::Key::N),
                cmd && i.key_pressed(egui::Key::Enter),
                cmd && i.modifiers.shift && i.key_pressed(egui::Key::F),
                cmd && i.key_pressed(egui::Key::Equals),
                cmd && i.key_pressed(egui::Key::Minus),
                cmd && !i.modifiers.shift && i.key_pressed(egui::Key::F),
                i.key_pressed(egui::Key::F3) && !i.modifiers.shift,
                i.key_pressed(egui::Key::F3) && i.modifiers.shift,
                i.key_pressed(egui::Key::Escape),
            )
        });

        if dialog_open {
            return;
        }

        if open {
            self.open_file();
        }
        if save_as || save {
            let _ = self.save_doc(save_as);
        }
        if new_doc {
            self.request_action(PendingAction::NewBlank);
        }
        if cycle_mode {
            self.set_mode(self.view.mode().cycle());
        }
        if format_doc {
            self.format_document();
        }
        if zoom_in {
            self.adjust_zoom(ctx, ZOOM_STEP);
        }
        if zoom_out {
            self.adjust_zoom(ctx, -ZOOM_STEP);
        }
        if find {
            self.search.open();
        }
        if find_next {
            self.search.next();
        }
        if find_prev {
            self.search.prev();
        }
        if escape && self.search.is_open() {
            self.search.close();
        }
    }

    fn show_search_bar(&mut self, ctx: &egui::Context) {
        if !self.search.is_open() {
            return;
        }

        egui::TopBottomPanel::top("search").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Find:");

                let mut query = self.search.query().to_owned();
                let response = ui.text_edit_singleline(&mut query);
                if std::mem::take(&mut self.search.focus_requested) {
                    response.request_focus();
                }
                if response.changed() {
                    self.search.set_query(&query);
                }
                if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    self.search.next();
                    response.request_focus();
                }

                let has_matches = !self.search.matches().is_empty();
                if ui.add_enabled(has_matches, egui::Button::new("▲")).clicked() {
                    self.search.prev();
                }
                if ui.add_enabled(has_matches, egui::Button::new("▼")).clicked() {
                    self.search.next();
                }

                if let Some(counter) = self.search.counter_label() {
                    ui.label(egui::RichText::new(counter).weak());
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("✕").clicked() {
                        self.search.close();
                    }
                });
            });
        });
    }

    fn show_status_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            let mut dismiss: Option<usize> = None;
            let mut switch_to: Option<Mode> = None;

            ui.horizontal(|ui| {
                for mode in [Mode::Rendered, Mode::Source, Mode::Split] {
                    if ui
                        .selectable_label(self.view.mode() == mode, mode.label())
                        .clicked()
                    {
                        switch_to = Some(mode);
                    }
                }

                ui.separator();
                ui.label(self.doc.path_label());

                if self.doc.is_dirty() {
                    ui.separator();
                    ui.colored_label(ui.visuals().warn_fg_color, "Modified");
                }
                if self.doc.path().is_some() && !self.doc.is_watched() {
                    ui.separator();
                    ui.colored_label(ui.visuals().warn_fg_color, "Not watched");
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    for (idx, notice) in self.notices.visible().iter().enumerate() {
                        if ui.button("x").clicked() {
                            dismiss = Some(idx);
                        }
                        let color = match notice.kind {
                            NoticeKind::Error => ui.visuals().error_fg_color,
                            NoticeKind::Info => ui.visuals().weak_text_color(),
                        };
                        ui.colored_label(color, &notice.text);
                    }
                });
            });

            if let Some(idx) = dismiss {
                self.notices.dismiss(idx);
            }
            if let Some(mode) = switch_to {
                self.set_mode(mode);
            }
        });
    }

    fn show_preview_pane(
        &mut self,
        ui: &mut egui::Ui,
        scroll_target: Option<SearchMatch>,
    ) -> PaneMetrics {
        let mut area = egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .id_salt("preview");
        if self.view.mode() == Mode::Split
            && let Some(offset) = self.view.split.take_preview_override()
        {
            area = area.vertical_scroll_offset(offset);
        }

        let env = preview::PreviewEnv {
            doc: self.doc.compiled(),
            search: &self.search,
            slots: &self.slots,
            scroll_target,
        };
        let output = area.show(ui, |ui| preview::show(ui, &env));

        PaneMetrics {
            offset: output.state.offset.y,
            content: output.content_size.y,
            viewport: output.inner_rect.height(),
        }
    }

    fn show_editor_pane(&mut self, ui: &mut egui::Ui) -> PaneMetrics {
        let mut area = egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .id_salt("editor");
        if self.view.mode() == Mode::Split
            && let Some(offset) = self.view.split.take_source_override()
        {
            area = area.vertical_scroll_offset(offset);
        }

        let heading_colors = self.prefs.heading_colors;
        let output = area.show(ui, |ui| {
            let editor = egui::TextEdit::multiline(&mut self.view.buffer)
                .desired_width(f32::INFINITY)
                .font(egui::TextStyle::Body)
                .frame(false)
                .id(egui::Id::new("editor"));

            let mut layouter = |ui: &egui::Ui, buf: &dyn egui::TextBuffer, wrap_width: f32| {
                let mut job = highlight::markdown_layout_job(
                    ui.style(),
                    ui.visuals(),
                    buf.as_str(),
                    heading_colors,
                );
                job.wrap.max_width = wrap_width;
                ui.fonts(|fonts| fonts.layout_job(job))
            };

            let response = ui.add_sized(ui.available_size(), editor.layouter(&mut layouter));
            if response.changed() {
                self.view.note_edited();
            }
        });

        PaneMetrics {
            offset: output.state.offset.y,
            content: output.content_size.y,
            viewport: output.inner_rect.height(),
        }
    }

    fn show_conflict_dialog(&mut self, ctx: &egui::Context) {
        let mut choice: Option<ConflictChoice> = None;

        if let Some(record) = self.doc.conflict() {
            egui::Window::new("File changed on disk")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
                .show(ctx, |ui| {
                    ui.label(format!(
                        "\"{}\" was modified outside the editor while you have unsaved edits.",
                        self.doc.title()
                    ));
                    ui.add_space(8.0);

                    if record.summary.oversized {
                        ui.label(
                            egui::RichText::new("The versions are too large to compare here.")
                                .weak(),
                        );
                    } else {
                        egui::ScrollArea::vertical()
                            .max_height(240.0)
                            .show(ui, |ui| {
                                for hunk in &record.summary.hunks {
                                    ui.label(
                                        egui::RichText::new(format!("line {}", hunk.local_line))
                                            .weak(),
                                    );
                                    for line in &hunk.local_lines {
                                        ui.colored_label(
                                            ui.visuals().error_fg_color,
                                            egui::RichText::new(format!("- {line}")).monospace(),
                                        );
                                    }
                                    for line in &hunk.external_lines {
                                        ui.colored_label(
                                            ui.visuals().hyperlink_color,
                                            egui::RichText::new(format!("+ {line}")).monospace(),
                                        );
                                    }
                                    ui.add_space(4.0);
                                }
                                if record.summary.elided > 0 {
                                    ui.label(
                                        egui::RichText::new(format!(
                                            "…and {} more changed region(s)",
                                            record.summary.elided
                                        ))
                                        .weak(),
                                    );
                                }
                            });
                    }
                    ui.add_space(8.0);

                    ui.horizontal(|ui| {
                        if ui.button("Reload from disk").clicked() {
                            choice = Some(ConflictChoice::Reload);
                        }
                        if ui.button("Keep my edits").clicked() {
                            choice = Some(ConflictChoice::Keep);
                        }
                    });
                });
        }

        match choice {
            Some(ConflictChoice::Reload) => {
                self.doc.resolve_conflict_reload();
                self.view.sync_buffer(&self.doc);
                self.notices.info("Reloaded external version");
            }
            Some(ConflictChoice::Keep) => {
                self.doc.resolve_conflict_keep();
                self.notices.info("Kept local edits");
            }
            None => {}
        }
    }

    fn show_unsaved_dialog(&mut self, ctx: &egui::Context) {
        if self.pending_action.is_none() {
            return;
        }

        let escape = ctx.input(|i| i.key_pressed(egui::Key::Escape));
        if escape {
            self.pending_action = None;
            return;
        }

        egui::Window::new("Unsaved changes")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(format!("\"{}\" has unsaved changes.", self.doc.title()));
                ui.add_space(8.0);

                ui.horizontal(|ui| {
                    if ui.button("Save").clicked() && self.save_doc(false) {
                        self.apply_pending_action_and_close_dialog();
                    }

                    if ui.button("Discard").clicked() {
                        self.apply_pending_action_and_close_dialog();
                    }

                    if ui.button("Cancel").clicked() {
                        self.pending_action = None;
                    }
                });
            });
    }
}

impl eframe::App for InkdownApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.prefs_applied {
            self.prefs.apply(ctx);
            self.prefs_applied = true;
        }

        self.handle_shortcuts(ctx);
        self.pump(ctx);

        self.show_search_bar(ctx);
        self.show_status_bar(ctx);

        let scroll_target = self.search.take_scroll_request();

        let panel_frame = egui::Frame::NONE
            .fill(ctx.style().visuals.panel_fill)
            .inner_margin(egui::Margin::same(0));

        match self.view.mode() {
            Mode::Rendered => {
                egui::CentralPanel::default()
                    .frame(panel_frame)
                    .show(ctx, |ui| {
                        self.show_preview_pane(ui, scroll_target);
                    });
            }
            Mode::Source => {
                egui::CentralPanel::default()
                    .frame(panel_frame)
                    .show(ctx, |ui| {
                        self.show_editor_pane(ui);
                    });
            }
            Mode::Split => {
                let preview_metrics = egui::SidePanel::right("preview")
                    .resizable(true)
                    .min_width(240.0)
                    .default_width(420.0)
                    .frame(panel_frame)
                    .show(ctx, |ui| self.show_preview_pane(ui, scroll_target))
                    .inner;
                let source_metrics = egui::CentralPanel::default()
                    .frame(panel_frame)
                    .show(ctx, |ui| self.show_editor_pane(ui))
                    .inner;
                self.view.split.observe(source_metrics, preview_metrics);
            }
        }

        self.show_conflict_dialog(ctx);
        self.show_unsaved_dialog(ctx);
        self.update_viewport_title(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> LaunchOptions {
        parse_launch_options(args.iter().copied().map(OsString::from))
    }

    #[test]
    fn parse_launch_options_parses_modes_and_paths() {
        let cases = [
            (&[][..], Mode::Rendered, None),
            (&["-e"][..], Mode::Source, None),
            (&["-s"][..], Mode::Split, None),
            (
                &["README.md", "OTHER.md"][..],
                Mode::Rendered,
                Some("README.md"),
            ),
            (&["-e", "README.md"][..], Mode::Source, Some("README.md")),
        ];

        for (args, mode, path) in cases {
            let options = parse(args);
            assert_eq!(options.mode, mode);
            assert_eq!(options.path.as_deref(), path.map(PathBuf::from).as_deref());
        }
    }
}
