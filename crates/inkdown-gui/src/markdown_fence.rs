#![forbid(unsafe_code)]

//! Line-oriented fence tracking for the source editor.
//!
//! Both the editor layouter and the formatter need to know whether a line
//! sits inside a fenced code block without running the full parser.

/// An open fence: closing requires the same marker character and at least as
/// many of them, with nothing but whitespace after.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FenceState {
    marker: u8,
    len: usize,
}

/// Advance fence state across `line`; true when the line is a fence
/// delimiter (opening or closing).
pub(crate) fn consume_fence_delimiter(line: &str, state: &mut Option<FenceState>) -> bool {
    let trimmed = line.trim_start();
    let Some(&marker) = trimmed.as_bytes().first() else {
        return false;
    };
    if marker != b'`' && marker != b'~' {
        return false;
    }

    let len = trimmed.bytes().take_while(|b| *b == marker).count();
    if len < 3 {
        return false;
    }
    let rest = &trimmed[len..];

    match *state {
        None => {
            *state = Some(FenceState { marker, len });
            true
        }
        Some(open) if open.marker == marker && len >= open.len && rest.trim().is_empty() => {
            *state = None;
            true
        }
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtick_fences_with_info_string() {
        let mut state = None;
        assert!(consume_fence_delimiter("```mermaid", &mut state));
        assert!(state.is_some());
        assert!(!consume_fence_delimiter("graph TD;", &mut state));
        assert!(state.is_some());
        assert!(consume_fence_delimiter("```", &mut state));
        assert!(state.is_none());
    }

    #[test]
    fn tilde_fences_close_only_on_matching_length() {
        let mut state = None;
        assert!(consume_fence_delimiter("~~~~", &mut state));
        assert!(!consume_fence_delimiter("~~~", &mut state));
        assert!(state.is_some());
        assert!(consume_fence_delimiter("~~~~~", &mut state));
        assert!(state.is_none());
    }

    #[test]
    fn mismatched_marker_does_not_close() {
        let mut state = None;
        assert!(consume_fence_delimiter("~~~", &mut state));
        assert!(!consume_fence_delimiter("```", &mut state));
        assert!(state.is_some());
    }

    #[test]
    fn close_with_trailing_info_is_not_a_close() {
        let mut state = None;
        assert!(consume_fence_delimiter("```rust", &mut state));
        assert!(!consume_fence_delimiter("```still-open", &mut state));
        assert!(state.is_some());
    }

    #[test]
    fn non_fence_lines_are_ignored() {
        let mut state = None;
        assert!(!consume_fence_delimiter("`inline`", &mut state));
        assert!(!consume_fence_delimiter("~~", &mut state));
        assert!(!consume_fence_delimiter("plain text", &mut state));
        assert!(!consume_fence_delimiter("", &mut state));
        assert!(state.is_none());
    }
}
