#![forbid(unsafe_code)]

//! File-watch plumbing around `notify`.
//!
//! The watcher thread talks to the UI thread through a channel only; the UI
//! drains it once per frame and coalesces bursts into one signal, which the
//! document controller then debounces into one reconciliation pass.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, channel};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

/// Coalesced view of everything the watcher reported since the last drain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct WatchSignal {
    pub(crate) changed: bool,
    pub(crate) deleted: bool,
    pub(crate) error: Option<String>,
}

impl WatchSignal {
    pub(crate) const fn is_empty(&self) -> bool {
        !self.changed && !self.deleted && self.error.is_none()
    }
}

pub(crate) struct DocWatcher {
    path: PathBuf,
    rx: Receiver<Result<notify::Event, notify::Error>>,
    // Held for its Drop; dropping tears the watch down.
    _watcher: RecommendedWatcher,
}

impl DocWatcher {
    pub(crate) fn install(path: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %path.display(), "installed file watch");
        Ok(Self {
            path: path.to_owned(),
            rx,
            _watcher: watcher,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Drain all queued events into one coalesced signal.
    pub(crate) fn drain(&self) -> WatchSignal {
        let mut signal = WatchSignal::default();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => match event.kind {
                    EventKind::Remove(_) => signal.deleted = true,
                    EventKind::Access(_) => {}
                    EventKind::Create(_)
                    | EventKind::Modify(_)
                    | EventKind::Any
                    | EventKind::Other => signal.changed = true,
                },
                Err(err) => signal.error = Some(err.to_string()),
            }
        }
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_io::tests::make_temp_dir;
    use std::time::{Duration, Instant};

    fn drain_until(watcher: &DocWatcher, patience: Duration) -> WatchSignal {
        let deadline = Instant::now() + patience;
        let mut merged = WatchSignal::default();
        while Instant::now() < deadline {
            let signal = watcher.drain();
            merged.changed |= signal.changed;
            merged.deleted |= signal.deleted;
            if merged.changed || merged.deleted {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        merged
    }

    #[test]
    fn reports_external_modification() {
        let dir = make_temp_dir("inkdown-watch-change-test");
        let path = dir.join("watched.md");
        std::fs::write(&path, "one").ok();

        let Ok(watcher) = DocWatcher::install(&path) else {
            // Watch backends are unavailable on some CI filesystems.
            return;
        };
        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(&path, "two").ok();

        let signal = drain_until(&watcher, Duration::from_secs(5));
        assert!(signal.changed || signal.deleted);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_signal_when_nothing_happened() {
        let dir = make_temp_dir("inkdown-watch-idle-test");
        let path = dir.join("watched.md");
        std::fs::write(&path, "one").ok();

        let Ok(watcher) = DocWatcher::install(&path) else {
            return;
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(watcher.drain().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
