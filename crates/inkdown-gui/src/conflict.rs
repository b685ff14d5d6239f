#![forbid(unsafe_code)]

//! External-change conflicts.
//!
//! When the watched file changes while local edits are unsaved, nothing is
//! overwritten. The external snapshot is held here until the user picks
//! **reload** (adopt external, discard local) or **keep** (discard external,
//! continue editing). At most one record exists at a time; a newer external
//! change replaces the snapshot in place.

use imara_diff::{Algorithm, Diff, InternedInput};
use inkdown_html::CompiledDoc;

use crate::disk_io::DiskRevision;

/// Don't diff pathological inputs; the dialog degrades to "contents differ".
const MAX_SUMMARY_LINES: usize = 20_000;
/// Hunks shown in the conflict dialog before eliding the rest.
pub(crate) const MAX_SUMMARY_HUNKS: usize = 12;

pub(crate) struct ConflictRecord {
    pub(crate) external_raw: String,
    pub(crate) external_compiled: CompiledDoc,
    pub(crate) external_revision: DiskRevision,
    pub(crate) summary: ChangeSummary,
}

impl ConflictRecord {
    pub(crate) fn new(
        local: &str,
        external_raw: String,
        external_compiled: CompiledDoc,
        external_revision: DiskRevision,
    ) -> Self {
        let summary = summarize_changes(local, &external_raw);
        Self {
            external_raw,
            external_compiled,
            external_revision,
            summary,
        }
    }

    /// Refresh the snapshot with a newer external version (latest wins).
    pub(crate) fn refresh(
        &mut self,
        local: &str,
        external_raw: String,
        external_compiled: CompiledDoc,
        external_revision: DiskRevision,
    ) {
        self.summary = summarize_changes(local, &external_raw);
        self.external_raw = external_raw;
        self.external_compiled = external_compiled;
        self.external_revision = external_revision;
    }
}

/// One run of differing lines, local vs external.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Hunk {
    /// 1-based first affected line in the local buffer.
    pub(crate) local_line: usize,
    pub(crate) local_lines: Vec<String>,
    pub(crate) external_lines: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ChangeSummary {
    pub(crate) hunks: Vec<Hunk>,
    /// More hunks exist than are listed.
    pub(crate) elided: usize,
    /// The inputs were too large to diff line by line.
    pub(crate) oversized: bool,
}

pub(crate) fn summarize_changes(local: &str, external: &str) -> ChangeSummary {
    if local == external {
        return ChangeSummary::default();
    }

    let local_count = imara_diff::sources::lines(local).count();
    let external_count = imara_diff::sources::lines(external).count();
    if local_count.max(external_count) > MAX_SUMMARY_LINES {
        return ChangeSummary {
            hunks: Vec::new(),
            elided: 0,
            oversized: true,
        };
    }

    let input = InternedInput::new(local, external);
    let mut diff = Diff::compute(Algorithm::Histogram, &input);
    diff.postprocess_lines(&input);

    let local_lines: Vec<&str> = imara_diff::sources::lines(local).collect();
    let external_lines: Vec<&str> = imara_diff::sources::lines(external).collect();

    let mut hunks = Vec::new();
    let mut elided = 0usize;
    for hunk in diff.hunks() {
        if hunks.len() >= MAX_SUMMARY_HUNKS {
            elided += 1;
            continue;
        }
        let take_lines = |lines: &[&str], start: u32, end: u32| {
            lines[start as usize..end as usize]
                .iter()
                .map(|line| line.trim_end_matches('\n').to_owned())
                .collect::<Vec<_>>()
        };
        hunks.push(Hunk {
            local_line: hunk.before.start as usize + 1,
            local_lines: take_lines(&local_lines, hunk.before.start, hunk.before.end),
            external_lines: take_lines(&external_lines, hunk.after.start, hunk.after.end),
        });
    }

    ChangeSummary {
        hunks,
        elided,
        oversized: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_have_no_hunks() {
        let summary = summarize_changes("a\nb\n", "a\nb\n");
        assert!(summary.hunks.is_empty());
        assert!(!summary.oversized);
    }

    #[test]
    fn changed_line_is_reported_with_both_sides() {
        let summary = summarize_changes("a\nlocal\nc\n", "a\nexternal\nc\n");
        assert_eq!(summary.hunks.len(), 1);
        let hunk = &summary.hunks[0];
        assert_eq!(hunk.local_line, 2);
        assert_eq!(hunk.local_lines, vec!["local".to_owned()]);
        assert_eq!(hunk.external_lines, vec!["external".to_owned()]);
    }

    #[test]
    fn pure_insertion_has_empty_local_side() {
        let summary = summarize_changes("a\nc\n", "a\nb\nc\n");
        assert_eq!(summary.hunks.len(), 1);
        assert!(summary.hunks[0].local_lines.is_empty());
        assert_eq!(summary.hunks[0].external_lines, vec!["b".to_owned()]);
    }

    #[test]
    fn hunks_beyond_the_cap_are_elided() {
        let local: String = (0..40).map(|i| format!("line {i}\n")).collect();
        let external: String = (0..40)
            .map(|i| {
                if i % 3 == 0 {
                    format!("LINE {i}\n")
                } else {
                    format!("line {i}\n")
                }
            })
            .collect();
        let summary = summarize_changes(&local, &external);
        assert_eq!(summary.hunks.len(), MAX_SUMMARY_HUNKS);
        assert!(summary.elided > 0);
    }

    #[test]
    fn refresh_replaces_snapshot_in_place() {
        let mut record = ConflictRecord::new(
            "local\n",
            "first external\n".to_owned(),
            CompiledDoc::default(),
            stub_revision(),
        );
        record.refresh(
            "local\n",
            "second external\n".to_owned(),
            CompiledDoc::default(),
            stub_revision(),
        );
        assert_eq!(record.external_raw, "second external\n");
        assert!(
            record.summary.hunks[0]
                .external_lines
                .contains(&"second external".to_owned())
        );
    }

    fn stub_revision() -> DiskRevision {
        DiskRevision {
            modified: std::time::SystemTime::UNIX_EPOCH,
            len: 0,
            #[cfg(unix)]
            dev: 0,
            #[cfg(unix)]
            inode: 0,
        }
    }
}
