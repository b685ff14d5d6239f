#![forbid(unsafe_code)]

//! In-document search over the compiled text segments.
//!
//! Search reads only the already-sanitized, already-rendered segment table —
//! never the raw Markdown, and never through the HTML pipeline — and it
//! stores highlight ranges beside the text rather than mutating it, so
//! clearing a search restores the display byte-for-byte by construction.
//!
//! Scans run in fixed-size chunks with a yield between chunks; a new query
//! or a recompile simply drops the in-flight scan and starts over.

use inkdown_html::CompiledDoc;
use memchr::memmem;

pub(crate) const MIN_QUERY_LEN: usize = 2;
const SEGMENTS_PER_CHUNK: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SearchMatch {
    pub(crate) segment: usize,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

struct Scan {
    folded_query: String,
    ascii: bool,
    next_segment: usize,
}

#[derive(Default)]
pub(crate) struct SearchState {
    open: bool,
    query: String,
    matches: Vec<SearchMatch>,
    active: usize,
    scan: Option<Scan>,
    seen_generation: u64,
    scroll_to_active: bool,
    pub(crate) focus_requested: bool,
}

impl SearchState {
    pub(crate) const fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn open(&mut self) {
        self.open = true;
        self.focus_requested = true;
    }

    /// Close search and drop every highlight.
    pub(crate) fn close(&mut self) {
        self.open = false;
        self.query.clear();
        self.discard_results();
    }

    pub(crate) fn query(&self) -> &str {
        &self.query
    }

    pub(crate) fn set_query(&mut self, query: &str) {
        if query == self.query {
            return;
        }
        self.query.clear();
        self.query.push_str(query);
        self.restart();
    }

    /// Restart on content change; a stale scan would index into freed
    /// segments.
    pub(crate) fn ensure_fresh(&mut self, generation: u64) {
        if generation != self.seen_generation {
            self.seen_generation = generation;
            self.restart();
        }
    }

    fn restart(&mut self) {
        self.discard_results();
        if !self.open || self.query.chars().count() < MIN_QUERY_LEN {
            return;
        }
        let ascii = self.query.is_ascii();
        let folded_query = if ascii {
            self.query.to_ascii_lowercase()
        } else {
            self.query.to_lowercase()
        };
        self.scan = Some(Scan {
            folded_query,
            ascii,
            next_segment: 0,
        });
    }

    fn discard_results(&mut self) {
        self.matches.clear();
        self.active = 0;
        self.scan = None;
        self.scroll_to_active = false;
    }

    pub(crate) const fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Run one scan chunk. Returns true while more chunks remain, so the
    /// caller keeps the frame loop awake.
    pub(crate) fn step(&mut self, doc: &CompiledDoc) -> bool {
        let Some(scan) = self.scan.as_mut() else {
            return false;
        };

        let total = doc.segments.len();
        let chunk_end = scan.next_segment.saturating_add(SEGMENTS_PER_CHUNK).min(total);
        for segment in scan.next_segment..chunk_end {
            scan_segment(
                doc.segment_text(segment),
                &scan.folded_query,
                scan.ascii,
                segment,
                &mut self.matches,
            );
        }
        scan.next_segment = chunk_end;

        if chunk_end >= total {
            self.scan = None;
            self.active = 0;
            self.scroll_to_active = !self.matches.is_empty();
            return false;
        }
        true
    }

    pub(crate) fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    /// Matches inside one segment, for highlight painting.
    pub(crate) fn matches_for_segment(&self, segment: usize) -> &[SearchMatch] {
        let start = self.matches.partition_point(|m| m.segment < segment);
        let end = self.matches.partition_point(|m| m.segment <= segment);
        &self.matches[start..end]
    }

    pub(crate) fn active_match(&self) -> Option<SearchMatch> {
        self.matches.get(self.active).copied()
    }

    /// Wrapping forward navigation.
    pub(crate) fn next(&mut self) {
        if self.matches.is_empty() {
            return;
        }
        self.active = (self.active + 1) % self.matches.len();
        self.scroll_to_active = true;
    }

    /// Wrapping backward navigation.
    pub(crate) fn prev(&mut self) {
        if self.matches.is_empty() {
            return;
        }
        self.active = (self.active + self.matches.len() - 1) % self.matches.len();
        self.scroll_to_active = true;
    }

    /// One-shot request to bring the active match into view.
    pub(crate) fn take_scroll_request(&mut self) -> Option<SearchMatch> {
        if !self.scroll_to_active {
            return None;
        }
        self.scroll_to_active = false;
        self.active_match()
    }

    /// Status label: `1 of 2`, `No results`, or none while typing/scanning.
    pub(crate) fn counter_label(&self) -> Option<String> {
        if self.query.chars().count() < MIN_QUERY_LEN {
            return None;
        }
        if self.is_scanning() {
            return Some("Searching…".to_owned());
        }
        if self.matches.is_empty() {
            return Some("No results".to_owned());
        }
        Some(format!("{} of {}", self.active + 1, self.matches.len()))
    }
}

/// Append all non-overlapping case-insensitive occurrences, left to right.
fn scan_segment(
    text: &str,
    folded_query: &str,
    ascii: bool,
    segment: usize,
    out: &mut Vec<SearchMatch>,
) {
    if folded_query.is_empty() || text.is_empty() {
        return;
    }

    if ascii {
        // ASCII-folding preserves byte offsets, so a plain memmem scan over
        // the folded shadow yields valid ranges into the original text.
        let folded = text.to_ascii_lowercase();
        for start in memmem::find_iter(folded.as_bytes(), folded_query.as_bytes()) {
            out.push(SearchMatch {
                segment,
                start,
                end: start + folded_query.len(),
            });
        }
        return;
    }

    let mut pos = 0;
    while pos < text.len() {
        match fold_match_len(&text[pos..], folded_query) {
            Some(len) => {
                out.push(SearchMatch {
                    segment,
                    start: pos,
                    end: pos + len,
                });
                pos += len;
            }
            None => {
                let step = text[pos..].chars().next().map_or(1, char::len_utf8);
                pos += step;
            }
        }
    }
}

/// Bytes of `hay` consumed by a case-folded match of `needle` at its start.
fn fold_match_len(hay: &str, needle: &str) -> Option<usize> {
    let mut pending = needle;
    let mut consumed = 0usize;
    let mut buf = [0u8; 4];

    for ch in hay.chars() {
        for folded in ch.to_lowercase() {
            let folded = folded.encode_utf8(&mut buf);
            match pending.strip_prefix(&*folded) {
                Some(rest) => pending = rest,
                None => return None,
            }
        }
        consumed += ch.len_utf8();
        if pending.is_empty() {
            return Some(consumed);
        }
    }
    None
}
