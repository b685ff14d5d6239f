#![forbid(unsafe_code)]

//! Per-document diagram slots.
//!
//! Every recompile invalidates the previous render pass: all fences are
//! re-submitted to the isolation service, and completions are routed back by
//! request id. Responses belonging to a superseded pass miss the lookup
//! table and are dropped, so a stale render can never fill a fresh slot.

use std::collections::HashMap;

use inkdown_diagram::{DiagramError, DiagramRequestId, DiagramService};

use crate::document::Document;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Submitted; the rest of the document stays interactive while waiting.
    Pending,
    /// Sanitized SVG, ready to display.
    Ready(String),
    /// Scoped failure: this one diagram shows an error block.
    Failed(String),
}

pub(crate) struct DiagramSlots {
    seen_generation: u64,
    slots: Vec<SlotState>,
    by_request: HashMap<DiagramRequestId, usize>,
}

impl DiagramSlots {
    pub(crate) fn new() -> Self {
        Self {
            seen_generation: 0,
            slots: Vec::new(),
            by_request: HashMap::new(),
        }
    }

    /// Re-submit every diagram fence when the compiled document changed.
    pub(crate) fn sync(&mut self, doc: &Document, service: &mut DiagramService) {
        if doc.generation() == self.seen_generation {
            return;
        }
        self.seen_generation = doc.generation();
        self.by_request.clear();
        self.slots.clear();

        for diagram in &doc.compiled().diagrams {
            let id = service.submit(&diagram.source);
            self.by_request.insert(id, diagram.index);
            self.slots.push(SlotState::Pending);
        }
    }

    /// Route completed renders into their slots. True when anything changed.
    pub(crate) fn pump(&mut self, service: &mut DiagramService) -> bool {
        let mut changed = false;
        for (id, result) in service.poll() {
            let Some(&slot) = self.by_request.get(&id) else {
                // Completion for a superseded render pass.
                continue;
            };
            self.by_request.remove(&id);
            let state = match result {
                Ok(svg) => SlotState::Ready(svg),
                Err(DiagramError::Timeout) => {
                    SlotState::Failed("diagram renderer timed out".to_owned())
                }
                Err(err) => SlotState::Failed(err.to_string()),
            };
            if let Some(entry) = self.slots.get_mut(slot) {
                *entry = state;
                changed = true;
            }
        }
        changed
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&SlotState> {
        self.slots.get(index)
    }

    /// Stable per-content URI for the image cache.
    pub(crate) fn uri(&self, index: usize) -> String {
        format!("bytes://inkdown-diagram-{}-{index}.svg", self.seen_generation)
    }

    /// Any slot still waiting on the worker.
    pub(crate) fn any_pending(&self) -> bool {
        self.slots.iter().any(|slot| *slot == SlotState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_io::tests::make_temp_dir;
    use inkdown_diagram::DiagramBackend;
    use std::time::{Duration, Instant};

    struct EchoBackend;

    impl DiagramBackend for EchoBackend {
        fn render(&mut self, source: &str) -> Result<String, String> {
            Ok(format!("<svg><text>{}</text></svg>", source.trim()))
        }
    }

    fn pump_until_settled(slots: &mut DiagramSlots, service: &mut DiagramService) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while slots.any_pending() && Instant::now() < deadline {
            slots.pump(service);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn slots_fill_from_completions() {
        let dir = make_temp_dir("inkdown-diagram-slots-test");
        let path = dir.join("a.md");
        std::fs::write(&path, "```mermaid\nfirst\n```\n\n```mermaid\nsecond\n```\n").ok();
        let mut doc = Document::open(path).unwrap_or_default();

        let mut service = DiagramService::with_backend(|| EchoBackend);
        let mut slots = DiagramSlots::new();
        slots.sync(&doc, &mut service);
        assert_eq!(slots.slot(0), Some(&SlotState::Pending));
        assert_eq!(slots.slot(1), Some(&SlotState::Pending));

        pump_until_settled(&mut slots, &mut service);
        assert!(
            matches!(slots.slot(0), Some(SlotState::Ready(svg)) if svg.contains("first"))
        );
        assert!(
            matches!(slots.slot(1), Some(SlotState::Ready(svg)) if svg.contains("second"))
        );

        // Same generation: no re-submission.
        slots.sync(&doc, &mut service);
        assert!(!slots.any_pending());

        // A recompile re-submits everything.
        doc.commit_text("```mermaid\nthird\n```\n");
        slots.sync(&doc, &mut service);
        assert_eq!(slots.slot(0), Some(&SlotState::Pending));
        assert!(slots.slot(1).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn uri_changes_with_generation() {
        let dir = make_temp_dir("inkdown-diagram-uri-test");
        let path = dir.join("a.md");
        std::fs::write(&path, "```mermaid\nx\n```\n").ok();
        let mut doc = Document::open(path).unwrap_or_default();

        let mut service = DiagramService::with_backend(|| EchoBackend);
        let mut slots = DiagramSlots::new();
        slots.sync(&doc, &mut service);
        let before = slots.uri(0);

        doc.commit_text("```mermaid\ny\n```\n");
        slots.sync(&doc, &mut service);
        assert_ne!(before, slots.uri(0));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
