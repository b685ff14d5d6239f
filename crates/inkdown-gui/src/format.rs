#![forbid(unsafe_code)]

//! Format-document: whitespace and line-ending cleanup for the source
//! buffer, honoring `.editorconfig` settings discovered up the directory
//! tree.

use std::{fs, path::Path};

use crate::markdown_fence::{FenceState, consume_fence_delimiter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LineEnding {
    Lf,
    CrLf,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct FormatOptions {
    pub(crate) trim_trailing_whitespace: bool,
    pub(crate) insert_final_newline: bool,
    pub(crate) end_of_line: Option<LineEnding>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            trim_trailing_whitespace: true,
            insert_final_newline: true,
            end_of_line: None,
        }
    }
}

/// Clean up `source`. Fenced code content is left untouched, and two-space
/// Markdown hard breaks survive trailing-whitespace trimming.
pub(crate) fn format_source(source: &str, options: FormatOptions) -> String {
    let eol = match options.end_of_line {
        Some(LineEnding::CrLf) => "\r\n",
        Some(LineEnding::Lf) => "\n",
        None if source.contains("\r\n") => "\r\n",
        None => "\n",
    };
    let normalized = if source.contains('\r') {
        source.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        source.to_owned()
    };

    let mut out = String::with_capacity(normalized.len() + 2);
    let mut fence: Option<FenceState> = None;

    let mut lines = normalized.split('\n').peekable();
    while let Some(line) = lines.next() {
        let is_delimiter = consume_fence_delimiter(line, &mut fence);
        let in_fence = fence.is_some() || is_delimiter;

        if options.trim_trailing_whitespace && !in_fence {
            let hard_break = line
                .as_bytes()
                .iter()
                .rev()
                .take_while(|b| **b == b' ')
                .count()
                >= 2;
            out.push_str(line.trim_end_matches([' ', '\t']));
            if hard_break {
                out.push_str("  ");
            }
        } else {
            out.push_str(line);
        }

        if lines.peek().is_some() {
            out.push_str(eol);
        }
    }

    if options.insert_final_newline && !out.ends_with(eol) {
        out.push_str(eol);
    }

    out
}

/// Resolve options for `path` by walking `.editorconfig` files upwards until
/// one declares `root = true`.
pub(crate) fn options_for_path(path: Option<&Path>) -> FormatOptions {
    let mut options = FormatOptions::default();
    let Some(path) = path else {
        return options;
    };
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let Some(start) = path.parent() else {
        return options;
    };

    let mut resolved = Resolved::default();
    let mut dir = Some(start);
    while let Some(current) = dir {
        if let Ok(contents) = fs::read_to_string(current.join(".editorconfig")) {
            let root = resolved.absorb(&contents, file_name);
            if root {
                break;
            }
        }
        dir = current.parent();
    }

    if let Some(value) = resolved.trim_trailing_whitespace {
        options.trim_trailing_whitespace = value;
    }
    if let Some(value) = resolved.insert_final_newline {
        options.insert_final_newline = value;
    }
    options.end_of_line = resolved.end_of_line;
    options
}

/// Values picked up so far; nearest `.editorconfig` wins per key.
#[derive(Default, Clone, Copy)]
struct Resolved {
    trim_trailing_whitespace: Option<bool>,
    insert_final_newline: Option<bool>,
    end_of_line: Option<LineEnding>,
}

impl Resolved {
    /// Merge one file's matching sections; returns its `root` flag.
    fn absorb(&mut self, contents: &str, file_name: &str) -> bool {
        let mut root = false;
        let mut section_matches = false;

        for raw in contents.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(inner) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section_matches = section_matches_file(inner.trim(), file_name);
                continue;
            }

            let Some((key, value)) = split_key_value(line) else {
                continue;
            };

            if key.eq_ignore_ascii_case("root") {
                root = value.eq_ignore_ascii_case("true");
                continue;
            }
            if !section_matches {
                continue;
            }

            if key.eq_ignore_ascii_case("trim_trailing_whitespace") {
                if self.trim_trailing_whitespace.is_none() {
                    self.trim_trailing_whitespace = parse_bool(value);
                }
            } else if key.eq_ignore_ascii_case("insert_final_newline") {
                if self.insert_final_newline.is_none() {
                    self.insert_final_newline = parse_bool(value);
                }
            } else if key.eq_ignore_ascii_case("end_of_line") && self.end_of_line.is_none() {
                self.end_of_line = parse_eol(value);
            }
        }

        root
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find('=').or_else(|| line.find(':'))?;
    let (key, rest) = line.split_at(idx);
    Some((key.trim(), rest.get(1..)?.trim()))
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_eol(value: &str) -> Option<LineEnding> {
    if value.eq_ignore_ascii_case("lf") {
        Some(LineEnding::Lf)
    } else if value.eq_ignore_ascii_case("crlf") {
        Some(LineEnding::CrLf)
    } else {
        None
    }
}

/// Section patterns we understand: `*`, literal names, a single-`*` glob,
/// and `{a,b}` alternation expanded before matching.
fn section_matches_file(pattern: &str, file_name: &str) -> bool {
    if let Some(open) = pattern.find('{') {
        let Some(close) = pattern[open + 1..].find('}').map(|rel| open + 1 + rel) else {
            return glob_match(pattern, file_name);
        };
        let prefix = &pattern[..open];
        let suffix = pattern.get(close + 1..).unwrap_or_default();
        return pattern[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .any(|alt| glob_match(&format!("{prefix}{alt}{suffix}"), file_name));
    }

    pattern
        .split(',')
        .any(|p| glob_match(p.trim(), file_name))
}

fn glob_match(pattern: &str, mut text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    let mut parts = pattern.split('*');
    let start = parts.next().unwrap_or_default();
    let end = parts.next_back().unwrap_or_default();

    if !pattern.starts_with('*') {
        let Some(rest) = text.strip_prefix(start) else {
            return false;
        };
        text = rest;
    }
    if !pattern.ends_with('*') {
        let Some(rest) = text.strip_suffix(end) else {
            return false;
        };
        text = rest;
    }

    for seg in parts {
        if seg.is_empty() {
            continue;
        }
        let Some(found) = text.find(seg) else {
            return false;
        };
        text = &text[found + seg.len()..];
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_whitespace_but_keeps_hard_breaks() {
        let out = format_source("line   \nbreak  \nplain\t\n", FormatOptions::default());
        assert_eq!(out, "line\nbreak  \nplain\n");
    }

    #[test]
    fn fenced_code_is_left_untouched() {
        let src = "```\ncode   \n```\ntext   \n";
        let out = format_source(src, FormatOptions::default());
        assert_eq!(out, "```\ncode   \n```\ntext\n");
    }

    #[test]
    fn inserts_final_newline_and_respects_eol() {
        let out = format_source("a\nb", FormatOptions::default());
        assert_eq!(out, "a\nb\n");

        let crlf = format_source(
            "a\r\nb",
            FormatOptions {
                end_of_line: Some(LineEnding::CrLf),
                ..FormatOptions::default()
            },
        );
        assert_eq!(crlf, "a\r\nb\r\n");
    }

    #[test]
    fn preserves_existing_crlf_flavor_by_default() {
        let out = format_source("a  \r\nb\r\n", FormatOptions::default());
        assert_eq!(out, "a\r\nb\r\n");
    }

    #[test]
    fn editorconfig_sections_match_markdown_globs() {
        let mut resolved = Resolved::default();
        let root = resolved.absorb(
            "root = true\n\n[*.{md,markdown}]\ntrim_trailing_whitespace = false\nend_of_line = crlf\n",
            "notes.md",
        );
        assert!(root);
        assert_eq!(resolved.trim_trailing_whitespace, Some(false));
        assert_eq!(resolved.end_of_line, Some(LineEnding::CrLf));
    }

    #[test]
    fn non_matching_sections_are_ignored() {
        let mut resolved = Resolved::default();
        resolved.absorb("[*.py]\ninsert_final_newline = false\n", "notes.md");
        assert_eq!(resolved.insert_final_newline, None);
    }

    #[test]
    fn nearest_editorconfig_wins_per_key() {
        let mut resolved = Resolved::default();
        resolved.absorb("[*]\ninsert_final_newline = false\n", "notes.md");
        resolved.absorb("[*]\ninsert_final_newline = true\nend_of_line = lf\n", "notes.md");
        assert_eq!(resolved.insert_final_newline, Some(false));
        assert_eq!(resolved.end_of_line, Some(LineEnding::Lf));
    }
}
