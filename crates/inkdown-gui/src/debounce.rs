#![forbid(unsafe_code)]

//! One cancellable timer abstraction for every debounced feature: file-watch
//! reconciliation, autosave, and split-mode recompilation all share the same
//! "schedule, superseding any prior pending call" contract.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub(crate) struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub(crate) const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Arm the timer, superseding any pending deadline.
    pub(crate) fn schedule(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    /// True exactly once per armed deadline, after it elapses.
    pub(crate) fn fire(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Time until the pending deadline, for repaint scheduling.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        let deadline = self.deadline?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_window() {
        let mut debounce = Debounce::new(Duration::from_millis(5));
        assert!(!debounce.fire());

        debounce.schedule();
        assert!(debounce.remaining().is_some());
        assert!(!debounce.fire());

        std::thread::sleep(Duration::from_millis(10));
        assert!(debounce.fire());
        assert!(!debounce.fire());
        assert!(debounce.remaining().is_none());
    }

    #[test]
    fn schedule_supersedes_pending_deadline() {
        let mut debounce = Debounce::new(Duration::from_millis(20));
        debounce.schedule();
        std::thread::sleep(Duration::from_millis(12));

        // Re-arming pushes the deadline out; the original would have fired
        // in another ~8ms.
        debounce.schedule();
        std::thread::sleep(Duration::from_millis(12));
        assert!(!debounce.fire());

        std::thread::sleep(Duration::from_millis(12));
        assert!(debounce.fire());
    }

    #[test]
    fn cancel_discards_pending_deadline() {
        let mut debounce = Debounce::new(Duration::from_millis(1));
        debounce.schedule();
        debounce.cancel();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!debounce.fire());
        assert!(debounce.remaining().is_none());
    }
}
