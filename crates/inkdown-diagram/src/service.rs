#![forbid(unsafe_code)]

//! Request/response plumbing between the document and the isolated renderer.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::backend::{DiagramBackend, MermaidBackend};
use crate::sanitize;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Monotonic per-process request id. Never reused, so a late response for a
/// timed-out request can never be matched to a newer one by coincidence.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiagramRequestId(u64);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DiagramError {
    /// The worker did not answer within the request's timeout.
    #[error("diagram renderer timed out")]
    Timeout,
    /// The renderer rejected the source.
    #[error("diagram failed to render: {0}")]
    Render(String),
    /// The worker thread died; pending requests are rejected and a new
    /// worker is spawned lazily on the next submission.
    #[error("diagram renderer is unavailable")]
    WorkerGone,
    /// The renderer answered with markup the structural sanitizer refused.
    #[error("diagram output failed sanitization")]
    UnsafeOutput,
}

enum ToWorker {
    Render { id: u64, source: String },
}

enum FromWorker {
    Ready,
    Rendered { id: u64, result: Result<String, String> },
}

struct Worker {
    to_worker: Sender<ToWorker>,
    from_worker: Receiver<FromWorker>,
    ready: bool,
}

type BackendFactory = Box<dyn Fn() -> Box<dyn DiagramBackend + Send> + Send>;

/// Owns the isolated rendering context and all in-flight requests.
///
/// Poll-driven: the UI loop calls [`DiagramService::poll`] every frame and
/// routes completions by id. The worker thread is the only place renderer
/// code runs; communication is message passing exclusively.
pub struct DiagramService {
    factory: BackendFactory,
    timeout: Duration,
    worker: Option<Worker>,
    /// Requests not yet sent because the context is still initializing.
    queue: VecDeque<ToWorker>,
    /// Deadline per in-flight id. Ids leave this set exactly once: on
    /// response, rejection, or timeout.
    pending: HashMap<u64, Instant>,
    /// Completions produced outside of `poll` (e.g. a send failure).
    ready_results: Vec<(DiagramRequestId, Result<String, DiagramError>)>,
    next_id: u64,
}

impl Default for DiagramService {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagramService {
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(MermaidBackend::new)
    }

    pub fn with_backend<F, B>(factory: F) -> Self
    where
        F: Fn() -> B + Send + 'static,
        B: DiagramBackend + Send + 'static,
    {
        Self {
            factory: Box::new(move || Box::new(factory())),
            timeout: DEFAULT_TIMEOUT,
            worker: None,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            ready_results: Vec::new(),
            next_id: 0,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Submit one diagram source for isolated rendering.
    ///
    /// The worker is spawned lazily on first use. While it initializes,
    /// submissions queue and later drain in FIFO order.
    pub fn submit(&mut self, source: &str) -> DiagramRequestId {
        self.ensure_worker();

        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, Instant::now() + self.timeout);

        let message = ToWorker::Render {
            id,
            source: source.to_owned(),
        };
        let sent = match self.worker.as_ref() {
            Some(worker) if worker.ready => worker.to_worker.send(message).is_ok(),
            Some(_) => {
                self.queue.push_back(message);
                true
            }
            None => false,
        };
        if !sent {
            self.handle_worker_gone();
        }

        DiagramRequestId(id)
    }

    /// Drain completions: sanitized SVG on success, a scoped error otherwise.
    ///
    /// Late worker responses for ids no longer pending are dropped here.
    pub fn poll(&mut self) -> Vec<(DiagramRequestId, Result<String, DiagramError>)> {
        let mut results = std::mem::take(&mut self.ready_results);

        loop {
            let Some(worker) = self.worker.as_mut() else {
                break;
            };
            match worker.from_worker.try_recv() {
                Ok(FromWorker::Ready) => {
                    worker.ready = true;
                    self.drain_queue();
                }
                Ok(FromWorker::Rendered { id, result }) => {
                    if self.pending.remove(&id).is_none() {
                        tracing::debug!(id, "ignoring late diagram response");
                        continue;
                    }
                    let outcome = match result {
                        Ok(svg) => sanitize::sanitize_svg(&svg).map_err(|_| {
                            tracing::warn!(id, "diagram output failed sanitization");
                            DiagramError::UnsafeOutput
                        }),
                        Err(message) => Err(DiagramError::Render(message)),
                    };
                    results.push((DiagramRequestId(id), outcome));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    results.append(&mut self.reject_all(&DiagramError::WorkerGone));
                    self.worker = None;
                    break;
                }
            }
        }

        // Independent per-request timeouts, enforced regardless of worker
        // health.
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.pending.remove(&id);
            tracing::debug!(id, "diagram request timed out");
            results.push((DiagramRequestId(id), Err(DiagramError::Timeout)));
        }

        results.sort_by_key(|(id, _)| *id);
        results
    }

    fn ensure_worker(&mut self) {
        if self.worker.is_some() {
            return;
        }

        let (to_worker, worker_rx) = channel::<ToWorker>();
        let (worker_tx, from_worker) = channel::<FromWorker>();
        let backend_factory = &self.factory;
        let mut backend = backend_factory();

        let spawned = thread::Builder::new()
            .name("inkdown-diagram".to_owned())
            .spawn(move || {
                if worker_tx.send(FromWorker::Ready).is_err() {
                    return;
                }
                while let Ok(ToWorker::Render { id, source }) = worker_rx.recv() {
                    let result = backend.render(&source);
                    if worker_tx.send(FromWorker::Rendered { id, result }).is_err() {
                        return;
                    }
                }
            });

        match spawned {
            Ok(_handle) => {
                self.worker = Some(Worker {
                    to_worker,
                    from_worker,
                    ready: false,
                });
            }
            Err(err) => {
                tracing::error!(%err, "failed to spawn diagram worker");
                self.worker = None;
            }
        }
    }

    fn drain_queue(&mut self) {
        while let Some(message) = self.queue.pop_front() {
            let sent = self
                .worker
                .as_ref()
                .is_some_and(|worker| worker.to_worker.send(message).is_ok());
            if !sent {
                self.handle_worker_gone();
                return;
            }
        }
    }

    fn handle_worker_gone(&mut self) {
        let mut rejected = self.reject_all(&DiagramError::WorkerGone);
        self.ready_results.append(&mut rejected);
        self.worker = None;
        self.queue.clear();
    }

    fn reject_all(
        &mut self,
        error: &DiagramError,
    ) -> Vec<(DiagramRequestId, Result<String, DiagramError>)> {
        let mut rejected: Vec<_> = self
            .pending
            .drain()
            .map(|(id, _)| (DiagramRequestId(id), Err(error.clone())))
            .collect();
        rejected.sort_by_key(|(id, _)| *id);
        rejected
    }

    /// Sever the worker channels, as if the isolated context crashed.
    #[cfg(test)]
    pub(crate) fn sever_worker(&mut self) {
        self.handle_worker_gone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InstantBackend;

    impl DiagramBackend for InstantBackend {
        fn render(&mut self, source: &str) -> Result<String, String> {
            if source.contains("bad") {
                Err("unsupported diagram".to_owned())
            } else {
                Ok(format!("<svg><text>{source}</text></svg>"))
            }
        }
    }

    struct SlowBackend {
        delay: Duration,
    }

    impl DiagramBackend for SlowBackend {
        fn render(&mut self, source: &str) -> Result<String, String> {
            thread::sleep(self.delay);
            Ok(format!("<svg><text>{source}</text></svg>"))
        }
    }

    struct HostileBackend;

    impl DiagramBackend for HostileBackend {
        fn render(&mut self, _source: &str) -> Result<String, String> {
            Ok("<svg><script>alert(1)</script><rect/></svg>".to_owned())
        }
    }

    fn poll_until(
        service: &mut DiagramService,
        want: usize,
        patience: Duration,
    ) -> Vec<(DiagramRequestId, Result<String, DiagramError>)> {
        let deadline = Instant::now() + patience;
        let mut collected = Vec::new();
        while collected.len() < want && Instant::now() < deadline {
            collected.append(&mut service.poll());
            thread::sleep(Duration::from_millis(2));
        }
        collected
    }

    #[test]
    fn renders_and_sanitizes_in_submission_order() {
        let mut service = DiagramService::with_backend(|| InstantBackend);
        let first = service.submit("one");
        let second = service.submit("two");
        assert_eq!(service.in_flight(), 2);

        let results = poll_until(&mut service, 2, Duration::from_secs(5));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, first);
        assert_eq!(results[1].0, second);
        assert!(results[0].1.as_deref().is_ok_and(|svg| svg.contains("one")));
        assert_eq!(service.in_flight(), 0);
    }

    #[test]
    fn render_failure_is_scoped_to_one_request() {
        let mut service = DiagramService::with_backend(|| InstantBackend);
        let good = service.submit("fine");
        let bad = service.submit("bad");

        let results = poll_until(&mut service, 2, Duration::from_secs(5));
        let by_id: HashMap<_, _> = results.into_iter().collect();
        assert!(by_id.get(&good).is_some_and(|r| r.is_ok()));
        assert!(matches!(
            by_id.get(&bad),
            Some(Err(DiagramError::Render(_)))
        ));
    }

    #[test]
    fn timeout_rejects_and_late_response_is_ignored() {
        let mut service = DiagramService::with_backend(|| SlowBackend {
            delay: Duration::from_millis(100),
        })
        .with_timeout(Duration::from_millis(10));
        let id = service.submit("slow");

        let results = poll_until(&mut service, 1, Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, id);
        assert_eq!(results[0].1, Err(DiagramError::Timeout));
        assert_eq!(service.in_flight(), 0);

        // The worker finishes eventually; its answer must go nowhere.
        thread::sleep(Duration::from_millis(150));
        assert!(service.poll().is_empty());
    }

    #[test]
    fn unsafe_output_is_rejected_not_passed_through() {
        let mut service = DiagramService::with_backend(|| HostileBackend);
        let id = service.submit("anything");
        let results = poll_until(&mut service, 1, Duration::from_secs(5));
        assert_eq!(results[0].0, id);
        // Sanitizer strips the script; the surviving markup is safe.
        assert!(
            results[0]
                .1
                .as_deref()
                .is_ok_and(|svg| !svg.contains("script") && svg.contains("rect"))
        );
    }

    #[test]
    fn worker_death_rejects_pending_and_respawns_lazily() {
        let mut service = DiagramService::with_backend(|| SlowBackend {
            delay: Duration::from_millis(50),
        });
        let doomed = service.submit("never");
        service.sever_worker();

        let results = poll_until(&mut service, 1, Duration::from_secs(5));
        assert!(results.iter().any(|(id, result)| {
            *id == doomed && matches!(result, Err(DiagramError::WorkerGone | DiagramError::Timeout))
        }));

        // A fresh submission spawns a new worker and completes.
        let revived = service.submit("again");
        let results = poll_until(&mut service, 1, Duration::from_secs(5));
        assert!(results.iter().any(|(id, result)| *id == revived && result.is_ok()));
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut service = DiagramService::with_backend(|| InstantBackend);
        let a = service.submit("a");
        let b = service.submit("b");
        service.sever_worker();
        let _ = poll_until(&mut service, 2, Duration::from_secs(5));
        let c = service.submit("c");
        assert!(a < b);
        assert!(b < c);
    }
}
