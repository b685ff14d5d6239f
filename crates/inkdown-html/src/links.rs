#![forbid(unsafe_code)]

//! URL scheme allow-list for link and image destinations.
//!
//! Anything that is not plainly `http`, `https`, `mailto`, a same-document
//! fragment, or a relative path is rejected. Rejected destinations degrade to
//! plain text at the call site; they are never dropped silently.

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

/// Whether `dest` may be emitted as a live `href`/`src`.
#[must_use]
pub fn is_allowed(dest: &str) -> bool {
    // Control characters are how pseudo-scheme smuggling works
    // ("java\tscript:"), so their presence disqualifies the whole target.
    if dest.chars().any(|c| c.is_ascii_control()) {
        return false;
    }

    let dest = dest.trim_matches(' ');
    if dest.is_empty() {
        return false;
    }

    if dest.starts_with('#') {
        return true;
    }

    // Network-path references ("//host/…") inherit whatever scheme the
    // surrounding surface has. Not a relative path for our purposes.
    if dest.starts_with("//") {
        return false;
    }

    match split_scheme(dest) {
        Some(scheme) => ALLOWED_SCHEMES
            .iter()
            .any(|allowed| scheme.eq_ignore_ascii_case(allowed)),
        None => true,
    }
}

/// Extract the URL scheme, if `dest` has one.
///
/// A scheme is a leading run of `[a-zA-Z][a-zA-Z0-9+.-]*` terminated by `:`
/// before any `/`, `?`, or `#`. Everything else is a relative reference.
fn split_scheme(dest: &str) -> Option<&str> {
    let bytes = dest.as_bytes();
    if !bytes.first()?.is_ascii_alphabetic() {
        return None;
    }

    for (idx, byte) in bytes.iter().enumerate() {
        match byte {
            b':' => return Some(&dest[..idx]),
            b'/' | b'?' | b'#' => return None,
            b if b.is_ascii_alphanumeric() || matches!(b, b'+' | b'.' | b'-') => {}
            _ => return None,
        }
    }

    None
}
