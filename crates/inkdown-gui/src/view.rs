#![forbid(unsafe_code)]

//! View-mode state machine and split-pane scroll synchronization.
//!
//! Whenever an editable mode is left (or a pass commits for it), the
//! editable buffer is the authoritative raw text and is copied back into the
//! document before anything renders from it.

use std::time::Duration;

use crate::debounce::Debounce;
use crate::document::Document;

/// Keystroke burst window before the buffer is committed and recompiled.
const EDIT_COMMIT_WINDOW: Duration = Duration::from_millis(250);
/// Idle period with unsaved edits before autosave kicks in.
const AUTOSAVE_IDLE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Rendered,
    Source,
    Split,
}

impl Mode {
    pub(crate) const fn cycle(self) -> Self {
        match self {
            Self::Rendered => Self::Source,
            Self::Source => Self::Split,
            Self::Split => Self::Rendered,
        }
    }

    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Rendered => "Rendered",
            Self::Source => "Source",
            Self::Split => "Split",
        }
    }

    pub(crate) const fn is_editable(self) -> bool {
        matches!(self, Self::Source | Self::Split)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ViewPump {
    /// The buffer was committed into the document this pass.
    pub(crate) committed: bool,
    /// The autosave idle window elapsed with unsaved edits.
    pub(crate) autosave_due: bool,
}

pub(crate) struct ViewState {
    mode: Mode,
    /// Live editable buffer; authoritative while an editable mode is active.
    pub(crate) buffer: String,
    commit: Debounce,
    autosave: Debounce,
    pub(crate) split: SplitSync,
}

impl ViewState {
    pub(crate) fn new() -> Self {
        Self::with_windows(EDIT_COMMIT_WINDOW, AUTOSAVE_IDLE)
    }

    /// Same machine with a configured autosave idle window.
    pub(crate) fn with_autosave(idle: Duration) -> Self {
        Self::with_windows(EDIT_COMMIT_WINDOW, idle)
    }

    fn with_windows(commit: Duration, autosave: Duration) -> Self {
        Self {
            mode: Mode::Rendered,
            buffer: String::new(),
            commit: Debounce::new(commit),
            autosave: Debounce::new(autosave),
            split: SplitSync::default(),
        }
    }

    pub(crate) const fn mode(&self) -> Mode {
        self.mode
    }

    /// Transition the mode. Leaving (or passing through) an editable mode
    /// commits the buffer and recompiles before the new mode renders.
    pub(crate) fn set_mode(&mut self, mode: Mode, doc: &mut Document) {
        if mode == self.mode {
            return;
        }

        if self.mode.is_editable() {
            doc.commit_text(&self.buffer);
            self.commit.cancel();
        }
        if mode.is_editable() && !self.mode.is_editable() {
            self.buffer = doc.raw_text().to_owned();
        }
        self.mode = mode;
    }

    /// Refresh the buffer after the document changed underneath the view
    /// (open, reload, conflict resolution).
    pub(crate) fn sync_buffer(&mut self, doc: &Document) {
        self.buffer = doc.raw_text().to_owned();
        self.commit.cancel();
    }

    /// Called on every keystroke in an editable pane.
    pub(crate) fn note_edited(&mut self) {
        self.commit.schedule();
        self.autosave.schedule();
    }

    /// Run due timers: debounced commit/recompile, then the autosave check.
    pub(crate) fn pump(&mut self, doc: &mut Document) -> ViewPump {
        let mut out = ViewPump::default();

        if self.commit.fire() {
            doc.commit_text(&self.buffer);
            out.committed = true;
        }

        if !doc.is_dirty() {
            // Cancelled the instant there is nothing to save.
            self.autosave.cancel();
        } else if self.mode.is_editable() && doc.path().is_some() && self.autosave.fire() {
            out.autosave_due = true;
        }

        out
    }

    /// Shortest pending timer, for repaint scheduling.
    pub(crate) fn repaint_after(&self) -> Option<Duration> {
        match (self.commit.remaining(), self.autosave.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }
}

/// Scroll position as a proportion of the scrollable range. `None` when the
/// content fits without scrolling — the no-op case, never a division by
/// zero.
pub(crate) fn scroll_ratio(offset: f32, content: f32, viewport: f32) -> Option<f32> {
    let scrollable = content - viewport;
    if scrollable <= f32::EPSILON {
        return None;
    }
    Some((offset / scrollable).clamp(0.0, 1.0))
}

pub(crate) fn offset_for_ratio(ratio: f32, content: f32, viewport: f32) -> f32 {
    let scrollable = (content - viewport).max(0.0);
    (ratio * scrollable).clamp(0.0, scrollable)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct PaneMetrics {
    pub(crate) offset: f32,
    pub(crate) content: f32,
    pub(crate) viewport: f32,
}

const MOVE_EPSILON: f32 = 0.5;

/// Bidirectional proportional scroll sync between the split panes.
///
/// A programmatic scroll of one pane suppresses that pane's next observed
/// movement, so the two panes cannot feed back into oscillation.
#[derive(Debug, Default)]
pub(crate) struct SplitSync {
    last_source: f32,
    last_preview: f32,
    override_source: Option<f32>,
    override_preview: Option<f32>,
    suppress_source: bool,
    suppress_preview: bool,
}

impl SplitSync {
    /// Offset to force on the source pane this frame, if any.
    pub(crate) fn take_source_override(&mut self) -> Option<f32> {
        self.override_source.take()
    }

    /// Offset to force on the preview pane this frame, if any.
    pub(crate) fn take_preview_override(&mut self) -> Option<f32> {
        self.override_preview.take()
    }

    /// Feed this frame's pane metrics; computes at most one override for the
    /// opposite pane.
    pub(crate) fn observe(&mut self, source: PaneMetrics, preview: PaneMetrics) {
        let source_delta = (source.offset - self.last_source).abs() > MOVE_EPSILON;
        let preview_delta = (preview.offset - self.last_preview).abs() > MOVE_EPSILON;
        let source_user = source_delta && !std::mem::take(&mut self.suppress_source);
        let preview_user = preview_delta && !std::mem::take(&mut self.suppress_preview);

        if source_user {
            if let Some(ratio) = scroll_ratio(source.offset, source.content, source.viewport) {
                let target = offset_for_ratio(ratio, preview.content, preview.viewport);
                if (target - preview.offset).abs() > MOVE_EPSILON {
                    self.override_preview = Some(target);
                    self.suppress_preview = true;
                    self.last_preview = target;
                }
            }
        } else if preview_user
            && let Some(ratio) = scroll_ratio(preview.offset, preview.content, preview.viewport)
        {
            let target = offset_for_ratio(ratio, source.content, source.viewport);
            if (target - source.offset).abs() > MOVE_EPSILON {
                self.override_source = Some(target);
                self.suppress_source = true;
                self.last_source = target;
            }
        }

        if self.override_preview.is_none() || preview_user {
            self.last_preview = preview.offset;
        }
        if self.override_source.is_none() || source_user {
            self.last_source = source.offset;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.override_source = None;
        self.override_preview = None;
        self.suppress_source = false;
        self.suppress_preview = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_io::tests::make_temp_dir;

    #[test]
    fn ratio_is_none_when_content_fits() {
        assert_eq!(scroll_ratio(0.0, 100.0, 200.0), None);
        assert_eq!(scroll_ratio(10.0, 100.0, 100.0), None);
        assert_eq!(scroll_ratio(400.0, 1000.0, 200.0), Some(0.5));
    }

    #[test]
    fn offset_round_trips_through_ratio() {
        let ratio = scroll_ratio(400.0, 1000.0, 200.0).unwrap_or_default();
        let offset = offset_for_ratio(ratio, 500.0, 100.0);
        assert!((offset - 200.0).abs() < 0.01);
    }

    #[test]
    fn source_scroll_drives_preview_proportionally() {
        let mut sync = SplitSync::default();
        sync.observe(
            PaneMetrics {
                offset: 400.0,
                content: 1000.0,
                viewport: 200.0,
            },
            PaneMetrics {
                offset: 0.0,
                content: 500.0,
                viewport: 100.0,
            },
        );
        let target = sync.take_preview_override();
        assert!(target.is_some_and(|t| (t - 200.0).abs() < 0.01));
        assert_eq!(sync.take_source_override(), None);
    }

    #[test]
    fn programmatic_scroll_does_not_echo_back() {
        let mut sync = SplitSync::default();
        sync.observe(
            PaneMetrics {
                offset: 400.0,
                content: 1000.0,
                viewport: 200.0,
            },
            PaneMetrics {
                offset: 0.0,
                content: 500.0,
                viewport: 100.0,
            },
        );
        let applied = sync.take_preview_override().unwrap_or_default();

        // Next frame: the preview moved because we moved it. That must not
        // generate a source override.
        sync.observe(
            PaneMetrics {
                offset: 400.0,
                content: 1000.0,
                viewport: 200.0,
            },
            PaneMetrics {
                offset: applied,
                content: 500.0,
                viewport: 100.0,
            },
        );
        assert_eq!(sync.take_source_override(), None);
        assert_eq!(sync.take_preview_override(), None);
    }

    #[test]
    fn unscrollable_pane_is_a_no_op() {
        let mut sync = SplitSync::default();
        // Source fits entirely; scrolling it (impossible, but defensively)
        // must not produce NaN or overrides.
        sync.observe(
            PaneMetrics {
                offset: 10.0,
                content: 100.0,
                viewport: 200.0,
            },
            PaneMetrics {
                offset: 0.0,
                content: 500.0,
                viewport: 100.0,
            },
        );
        assert_eq!(sync.take_preview_override(), None);
    }

    #[test]
    fn leaving_editable_mode_commits_buffer() {
        let dir = make_temp_dir("inkdown-view-commit-test");
        let path = dir.join("a.md");
        std::fs::write(&path, "original\n").ok();
        let mut doc = Document::open(path).unwrap_or_default();

        let mut view = ViewState::new();
        view.set_mode(Mode::Source, &mut doc);
        assert_eq!(view.buffer, "original\n");

        view.buffer = "edited\n".to_owned();
        view.note_edited();
        view.set_mode(Mode::Rendered, &mut doc);
        assert_eq!(doc.raw_text(), "edited\n");
        assert!(doc.is_dirty());
        assert!(doc.compiled().html.contains("edited"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn split_to_source_keeps_buffer_authoritative() {
        let dir = make_temp_dir("inkdown-view-split-test");
        let path = dir.join("a.md");
        std::fs::write(&path, "original\n").ok();
        let mut doc = Document::open(path).unwrap_or_default();

        let mut view = ViewState::new();
        view.set_mode(Mode::Split, &mut doc);
        view.buffer = "typed in split\n".to_owned();
        view.set_mode(Mode::Source, &mut doc);

        assert_eq!(doc.raw_text(), "typed in split\n");
        assert_eq!(view.buffer, "typed in split\n");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn autosave_fires_only_when_dirty_in_editable_mode() {
        let dir = make_temp_dir("inkdown-view-autosave-test");
        let path = dir.join("a.md");
        std::fs::write(&path, "original\n").ok();
        let mut doc = Document::open(path).unwrap_or_default();

        let mut view = ViewState::new();
        view.set_mode(Mode::Source, &mut doc);
        view.buffer = "changed\n".to_owned();
        view.note_edited();

        // Not yet: both windows still pending.
        assert_eq!(view.pump(&mut doc), ViewPump::default());

        // A clean document cancels a pending autosave outright.
        view.sync_buffer(&doc);
        let pump = view.pump(&mut doc);
        assert!(!pump.autosave_due);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn idle_edits_autosave_to_disk_and_clear_dirty() {
        let dir = make_temp_dir("inkdown-view-autosave-e2e-test");
        let path = dir.join("a.md");
        std::fs::write(&path, "original\n").ok();
        let mut doc = Document::open(path.clone()).unwrap_or_default();

        let mut view =
            ViewState::with_windows(Duration::from_millis(5), Duration::from_millis(20));
        view.set_mode(Mode::Source, &mut doc);
        view.buffer = "typed while idle\n".to_owned();
        view.note_edited();

        std::thread::sleep(Duration::from_millis(10));
        let pump = view.pump(&mut doc);
        assert!(pump.committed);
        assert!(doc.is_dirty());

        std::thread::sleep(Duration::from_millis(25));
        let pump = view.pump(&mut doc);
        assert!(pump.autosave_due);

        // The controller saves through the ordinary save path.
        assert!(doc.save().is_ok());
        assert!(!doc.is_dirty());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap_or_default(),
            "typed while idle\n"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
