#![forbid(unsafe_code)]

//! The authoritative in-memory document and its reconciliation with disk.
//!
//! Three sources of truth exist: the file on disk, the compiled output last
//! shown, and unsaved edits. This controller owns all transitions between
//! them. Watch events are coalesced and debounced into single reconciliation
//! passes; an external change never overwrites unsaved edits without an
//! explicit user decision.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inkdown_html::CompiledDoc;

use crate::conflict::ConflictRecord;
use crate::debounce::Debounce;
use crate::disk_io::{self, DiskRevision};
use crate::watcher::DocWatcher;

/// Bursts of watch notifications within this window coalesce into one
/// reconciliation pass.
const RECONCILE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DocEvent {
    /// External content adopted cleanly (no local edits were pending).
    Reloaded,
    /// A conflict was raised, or a pending one had its snapshot refreshed.
    ConflictRaised,
    /// The backing file vanished; the document stays, unwatched.
    FileDeleted,
    /// The watch or the re-read failed; the window stays usable.
    IoError(String),
}

pub(crate) struct FileIdentity {
    pub(crate) path: PathBuf,
    pub(crate) revision: DiskRevision,
}

pub(crate) struct Document {
    raw_text: String,
    compiled: CompiledDoc,
    /// Bumped on every recompile; consumers (search, diagram slots) use it
    /// to notice stale derived state.
    generation: u64,
    identity: Option<FileIdentity>,
    dirty: bool,
    watched: bool,
    watcher: Option<DocWatcher>,
    conflict: Option<ConflictRecord>,
    reconcile: Debounce,
    saw_delete_signal: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            raw_text: String::new(),
            compiled: CompiledDoc::default(),
            generation: 0,
            identity: None,
            dirty: false,
            watched: false,
            watcher: None,
            conflict: None,
            reconcile: Debounce::new(RECONCILE_WINDOW),
            saw_delete_signal: false,
        }
    }
}

impl Document {
    /// Open `path`, replacing the document wholesale.
    pub(crate) fn open(path: PathBuf) -> Result<Self, String> {
        let revision = disk_io::disk_revision(&path).map_err(|err| err.to_string())?;
        if revision.len > inkdown_core::MAX_FILE_BYTES {
            return Err(format!(
                "{} is larger than the {} MiB limit",
                path.display(),
                inkdown_core::MAX_FILE_BYTES / (1024 * 1024)
            ));
        }

        let (text, revision) = disk_io::read_stable_utf8(&path).map_err(|err| err.to_string())?;
        let compiled = inkdown_html::compile(&text);

        let (watcher, watched) = match DocWatcher::install(&path) {
            Ok(watcher) => (Some(watcher), true),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "could not watch file");
                (None, false)
            }
        };

        Ok(Self {
            raw_text: text,
            compiled,
            generation: 1,
            identity: Some(FileIdentity { path, revision }),
            dirty: false,
            watched,
            watcher,
            conflict: None,
            reconcile: Debounce::new(RECONCILE_WINDOW),
            saw_delete_signal: false,
        })
    }

    pub(crate) fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub(crate) const fn compiled(&self) -> &CompiledDoc {
        &self.compiled
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.identity.as_ref().map(|id| id.path.as_path())
    }

    pub(crate) const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) const fn is_watched(&self) -> bool {
        self.watched
    }

    pub(crate) const fn conflict(&self) -> Option<&ConflictRecord> {
        self.conflict.as_ref()
    }

    pub(crate) fn title(&self) -> Cow<'_, str> {
        self.identity
            .as_ref()
            .and_then(|id| id.path.file_name())
            .map_or_else(|| Cow::Borrowed("Untitled"), |name| name.to_string_lossy())
    }

    pub(crate) fn path_label(&self) -> Cow<'_, str> {
        self.identity
            .as_ref()
            .map_or_else(|| Cow::Borrowed("Unsaved"), |id| id.path.to_string_lossy())
    }

    /// Commit the editable buffer's text. Marks dirty and recompiles only
    /// when the text actually changed.
    pub(crate) fn commit_text(&mut self, text: &str) {
        if text == self.raw_text {
            return;
        }
        self.raw_text.clear();
        self.raw_text.push_str(text);
        self.dirty = true;
        self.recompile();
    }

    fn recompile(&mut self) {
        self.compiled = inkdown_html::compile(&self.raw_text);
        self.generation += 1;
    }

    /// Drain watch events and run at most one due reconciliation pass.
    pub(crate) fn pump(&mut self) -> Vec<DocEvent> {
        let mut events = Vec::new();

        let signal = self
            .watcher
            .as_ref()
            .map(DocWatcher::drain)
            .unwrap_or_default();
        if !signal.is_empty() {
            if let Some(error) = signal.error {
                // A broken watch stream is torn down; editing continues.
                self.watcher = None;
                self.watched = false;
                events.push(DocEvent::IoError(format!("file watch failed: {error}")));
            }
            if signal.changed || signal.deleted {
                self.saw_delete_signal |= signal.deleted;
                self.reconcile.schedule();
            }
        }

        if self.reconcile.fire()
            && let Some(event) = self.run_reconcile()
        {
            events.push(event);
        }

        events
    }

    /// Time until a scheduled reconciliation, for repaint scheduling.
    pub(crate) fn reconcile_remaining(&self) -> Option<Duration> {
        self.reconcile.remaining()
    }

    fn run_reconcile(&mut self) -> Option<DocEvent> {
        let reinstall = std::mem::take(&mut self.saw_delete_signal);
        let path = self.identity.as_ref()?.path.clone();

        if !path.exists() {
            self.watcher = None;
            self.watched = false;
            tracing::info!(path = %path.display(), "watched file was deleted");
            return Some(DocEvent::FileDeleted);
        }

        // An editor that replaces the file swaps the inode out from under
        // the watch; re-install it so the next change is still seen.
        if reinstall || self.watcher.is_none() {
            match DocWatcher::install(&path) {
                Ok(watcher) => {
                    self.watcher = Some(watcher);
                    self.watched = true;
                }
                Err(err) => {
                    self.watcher = None;
                    self.watched = false;
                    return Some(DocEvent::IoError(format!("could not re-watch file: {err}")));
                }
            }
        }

        let (text, revision) = match disk_io::read_stable_utf8(&path) {
            Ok(read) => read,
            Err(err) => return Some(DocEvent::IoError(format!("could not re-read file: {err}"))),
        };

        let known = self.identity.as_ref().map(|id| id.revision);
        if known == Some(revision) {
            // Echo of our own save, or a touch without content change.
            return None;
        }

        if self.dirty && text == self.raw_text {
            // The external writer produced exactly the unsaved edits; the
            // file and the buffer already agree.
            if let Some(identity) = self.identity.as_mut() {
                identity.revision = revision;
            }
            self.dirty = false;
            return None;
        }

        if self.dirty {
            let compiled = inkdown_html::compile(&text);
            match self.conflict.as_mut() {
                Some(record) => record.refresh(&self.raw_text, text, compiled, revision),
                None => {
                    self.conflict = Some(ConflictRecord::new(
                        &self.raw_text,
                        text,
                        compiled,
                        revision,
                    ));
                }
            }
            tracing::info!(path = %path.display(), "external change conflicts with unsaved edits");
            return Some(DocEvent::ConflictRaised);
        }

        self.raw_text = text;
        self.recompile();
        if let Some(identity) = self.identity.as_mut() {
            identity.revision = revision;
        }
        tracing::info!(path = %path.display(), "adopted external change");
        Some(DocEvent::Reloaded)
    }

    /// Adopt the conflicting external snapshot, discarding local edits.
    pub(crate) fn resolve_conflict_reload(&mut self) {
        let Some(record) = self.conflict.take() else {
            return;
        };
        self.raw_text = record.external_raw;
        self.compiled = record.external_compiled;
        self.generation += 1;
        self.dirty = false;
        if let Some(identity) = self.identity.as_mut() {
            identity.revision = record.external_revision;
        }
    }

    /// Discard the external snapshot and continue with local edits.
    pub(crate) fn resolve_conflict_keep(&mut self) {
        let Some(record) = self.conflict.take() else {
            return;
        };
        // Remember the external revision so the same disk state does not
        // immediately re-raise; the next save overwrites it.
        if let Some(identity) = self.identity.as_mut() {
            identity.revision = record.external_revision;
        }
    }

    /// Save to the open identity's path.
    pub(crate) fn save(&mut self) -> Result<(), String> {
        let Some(path) = self.path().map(Path::to_owned) else {
            return Err("no file path; use Save As".to_owned());
        };
        if !self.watched && !path.exists() {
            return Err("file was deleted on disk; use Save As".to_owned());
        }
        self.save_to(&path)
    }

    /// Establish a new identity at `path`, then save there.
    pub(crate) fn save_as(&mut self, path: PathBuf) -> Result<(), String> {
        self.identity = Some(FileIdentity {
            path: path.clone(),
            revision: DiskRevision {
                modified: std::time::SystemTime::UNIX_EPOCH,
                len: 0,
                #[cfg(unix)]
                dev: 0,
                #[cfg(unix)]
                inode: 0,
            },
        });
        self.conflict = None;
        self.save_to(&path)
    }

    /// The one write path. Refuses any destination that is not the current
    /// identity, so a stale path reference from before a file switch can
    /// never clobber the wrong file.
    fn save_to(&mut self, path: &Path) -> Result<(), String> {
        let matches_identity = self
            .identity
            .as_ref()
            .is_some_and(|id| id.path == *path);
        if !matches_identity {
            return Err(format!(
                "refusing to save to {}: not the open document",
                path.display()
            ));
        }

        disk_io::atomic_write_utf8(path, &self.raw_text).map_err(|err| err.to_string())?;
        let revision = disk_io::disk_revision(path).map_err(|err| err.to_string())?;
        if let Some(identity) = self.identity.as_mut() {
            identity.revision = revision;
        }
        self.dirty = false;
        self.conflict = None;

        if self.watcher.as_ref().map(DocWatcher::path) != Some(path) {
            match DocWatcher::install(path) {
                Ok(watcher) => {
                    self.watcher = Some(watcher);
                    self.watched = true;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "could not watch saved file");
                    self.watcher = None;
                    self.watched = false;
                }
            }
        } else {
            self.watched = true;
        }

        tracing::info!(path = %path.display(), "saved");
        Ok(())
    }

    /// Force the debounced reconciliation to run now (tests).
    #[cfg(test)]
    pub(crate) fn reconcile_now(&mut self) -> Vec<DocEvent> {
        self.run_reconcile().into_iter().collect()
    }
}
