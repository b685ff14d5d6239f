#![forbid(unsafe_code)]

//! Dismissible, auto-expiring status notices. I/O problems land here; the
//! window stays usable.

use std::time::{Duration, Instant};

const NOTICE_TTL: Duration = Duration::from_secs(8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NoticeKind {
    Info,
    Error,
}

#[derive(Clone, Debug)]
pub(crate) struct Notice {
    pub(crate) kind: NoticeKind,
    pub(crate) text: String,
    created: Instant,
}

#[derive(Default)]
pub(crate) struct Notices {
    items: Vec<Notice>,
}

impl Notices {
    pub(crate) fn info(&mut self, text: impl Into<String>) {
        self.push(NoticeKind::Info, text.into());
    }

    pub(crate) fn error(&mut self, text: impl Into<String>) {
        self.push(NoticeKind::Error, text.into());
    }

    fn push(&mut self, kind: NoticeKind, text: String) {
        tracing::info!(notice = %text, "surfaced notice");
        self.items.push(Notice {
            kind,
            text,
            created: Instant::now(),
        });
    }

    /// Drop expired notices; returns the still-visible ones, newest last.
    pub(crate) fn visible(&mut self) -> &[Notice] {
        let now = Instant::now();
        self.items
            .retain(|notice| now.duration_since(notice.created) < NOTICE_TTL);
        &self.items
    }

    pub(crate) fn dismiss(&mut self, index: usize) {
        if index < self.items.len() {
            self.items.remove(index);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_expire_and_dismiss() {
        let mut notices = Notices::default();
        notices.info("saved");
        notices.error("boom");
        assert_eq!(notices.visible().len(), 2);

        notices.dismiss(0);
        assert_eq!(notices.visible().len(), 1);
        assert_eq!(notices.visible()[0].kind, NoticeKind::Error);

        notices.clear();
        assert!(notices.visible().is_empty());
    }
}
