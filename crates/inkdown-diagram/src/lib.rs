#![forbid(unsafe_code)]

//! Isolated diagram rendering.
//!
//! Diagram source is untrusted and its renderer is a large third-party
//! surface, so rendering happens on a dedicated worker thread reachable only
//! through channel messages — never a direct call from document code. Every
//! request carries a monotonic id and its own timeout, and every successful
//! render is passed through the structural SVG sanitizer before anything
//! downstream sees it.

mod backend;
pub mod sanitize;
pub mod service;

pub use backend::{DiagramBackend, MermaidBackend};
pub use service::{DiagramError, DiagramRequestId, DiagramService};
