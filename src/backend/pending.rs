use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

/// How a run finished, per the gateway's lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Errored,
    Aborted,
}

/// Final state of a run: whatever text accumulated plus how it ended.
#[derive(Debug, PartialEq, Eq)]
pub struct RunResult {
    pub text: String,
    pub end: RunEnd,
}

struct PendingRun {
    run_id: Option<String>,
    text: String,
    tx: oneshot::Sender<RunResult>,
}

#[derive(Default)]
struct Inner {
    by_request: HashMap<String, PendingRun>,
    run_index: HashMap<String, String>,
}

/// Correlation table for outstanding gateway runs.
///
/// Entries are keyed by the request's idempotency key and bound to the
/// gateway-issued run id when the ack arrives. Assistant-stream events
/// carry cumulative snapshots, so each one replaces the accumulated text.
/// Resolution happens exactly once: completion removes the entry before
/// sending, and a timed-out waiter discards it so a late lifecycle event
/// finds nothing to resolve.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh request. The receiver resolves when the run
    /// completes; it errors if the entry is discarded first.
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<RunResult> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("pending table poisoned");
        inner.by_request.insert(
            request_id.to_string(),
            PendingRun {
                run_id: None,
                text: String::new(),
                tx,
            },
        );
        rx
    }

    /// Bind the gateway-issued run id to a registered request.
    pub fn bind_run(&self, request_id: &str, run_id: &str) {
        let mut guard = self.inner.lock().expect("pending table poisoned");
        let inner = &mut *guard;
        if let Some(run) = inner.by_request.get_mut(request_id) {
            run.run_id = Some(run_id.to_string());
            inner
                .run_index
                .insert(run_id.to_string(), request_id.to_string());
        }
    }

    /// Replace the accumulated text with the latest full snapshot.
    pub fn snapshot(&self, run_id: &str, text: &str) {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        let Some(request_id) = inner.run_index.get(run_id).cloned() else {
            return;
        };
        if let Some(run) = inner.by_request.get_mut(&request_id) {
            run.text = text.to_string();
        }
    }

    /// Resolve a run by its gateway id. No-op if the entry was already
    /// resolved or discarded.
    pub fn complete(&self, run_id: &str, end: RunEnd) {
        let run = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            let Some(request_id) = inner.run_index.remove(run_id) else {
                return;
            };
            inner.by_request.remove(&request_id)
        };
        if let Some(run) = run {
            let _ = run.tx.send(RunResult {
                text: run.text,
                end,
            });
        }
    }

    /// Resolve a run by its request id — used when the gateway rejects the
    /// request itself, before a run id exists.
    pub fn complete_request(&self, request_id: &str, end: RunEnd) {
        let run = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            let run = inner.by_request.remove(request_id);
            if let Some(ref run) = run {
                if let Some(ref run_id) = run.run_id {
                    inner.run_index.remove(run_id);
                }
            }
            run
        };
        if let Some(run) = run {
            let _ = run.tx.send(RunResult {
                text: run.text,
                end,
            });
        }
    }

    /// Drop an entry without resolving it. The waiter already gave up; a
    /// late completion must not resurrect the turn.
    pub fn discard(&self, request_id: &str) {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        if let Some(run) = inner.by_request.remove(request_id) {
            if let Some(ref run_id) = run.run_id {
                inner.run_index.remove(run_id);
            }
        }
    }

    /// Fail every outstanding run. Called when the gateway connection drops.
    pub fn fail_all(&self) {
        let runs: Vec<PendingRun> = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            inner.run_index.clear();
            inner.by_request.drain().map(|(_, run)| run).collect()
        };
        for run in runs {
            let _ = run.tx.send(RunResult {
                text: run.text,
                end: RunEnd::Errored,
            });
        }
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.inner.lock().expect("pending table poisoned").by_request.len()
    }
}
