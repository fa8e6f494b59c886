//! Per-target FIFO broker between tool handlers and the page-side runner.
//!
//! The producer awaits a future; the consumer polls for work and pushes
//! results back by id. There is no direct RPC between the two sides. A
//! dequeued entry stays in the pending table until it is resolved or
//! rejected, so a runner that crashes between dequeue and result surfaces
//! as a timeout rather than a lost job.

use crate::error::ExecError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Default deadline from enqueue to resolution
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit of work handed to the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScript {
    pub id: String,
    pub code: String,
}

struct Pending {
    target_id: String,
    code: String,
    resolver: oneshot::Sender<Result<String, ExecError>>,
}

#[derive(Default)]
struct Inner {
    /// Every execution awaiting a result, keyed by id
    pending: HashMap<String, Pending>,
    /// Per-target ids not yet handed to the runner, oldest first
    fifo: HashMap<String, VecDeque<String>>,
    next_id: u64,
}

/// The script execution queue
pub struct ScriptQueue {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl Default for ScriptQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptQueue {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_EXECUTION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            timeout,
        }
    }

    /// Queue a script for a target and await its result.
    ///
    /// Rejects with `Timeout` when no result arrives within the deadline,
    /// with `Cancelled` when the token fires first, and with `TargetClosed`
    /// or `Script` when the consumer side reports them. After any rejection
    /// the id is gone from the pending table, so a late `resolve` or
    /// `reject` for it is a no-op; ids are never reused.
    pub async fn enqueue(
        &self,
        target_id: &str,
        code: String,
        cancel: CancellationToken,
    ) -> Result<String, ExecError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = format!("exec-{}", inner.next_id);
            inner.pending.insert(
                id.clone(),
                Pending {
                    target_id: target_id.to_string(),
                    code,
                    resolver: tx,
                },
            );
            inner
                .fifo
                .entry(target_id.to_string())
                .or_default()
                .push_back(id.clone());
            id
        };
        tracing::debug!(target_id, %id, "queued script execution");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            result = tokio::time::timeout(self.timeout, rx) => match result {
                Ok(Ok(resolution)) => resolution,
                // Queue dropped while we were waiting
                Ok(Err(_)) => Err(ExecError::Cancelled),
                Err(_) => Err(ExecError::Timeout),
            },
        };

        if outcome.is_err() {
            self.remove(&id);
        }
        outcome
    }

    /// Hand the oldest queued script for a target to the runner.
    /// Serves each entry at most once; the pending entry itself remains
    /// until `resolve`/`reject`.
    pub fn dequeue(&self, target_id: &str) -> Option<PendingScript> {
        let mut inner = self.inner.lock();
        let id = inner.fifo.get_mut(target_id)?.pop_front()?;
        let code = inner.pending.get(&id)?.code.clone();
        Some(PendingScript { id, code })
    }

    /// Complete an execution with the runner's serialized result
    pub fn resolve(&self, id: &str, result: impl Into<String>) {
        let Some(pending) = self.take(id) else {
            tracing::debug!(%id, "dropping late resolve");
            return;
        };
        let _ = pending.resolver.send(Ok(result.into()));
    }

    /// Complete an execution with a runner-reported failure
    pub fn reject(&self, id: &str, error: impl Into<String>) {
        let Some(pending) = self.take(id) else {
            tracing::debug!(%id, "dropping late reject");
            return;
        };
        let _ = pending.resolver.send(Err(ExecError::Script(error.into())));
    }

    /// Reject every pending execution for a target that went away
    pub fn cancel_target(&self, target_id: &str) {
        let drained: Vec<Pending> = {
            let mut inner = self.inner.lock();
            inner.fifo.remove(target_id);
            let ids: Vec<String> = inner
                .pending
                .iter()
                .filter(|(_, p)| p.target_id == target_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.pending.remove(&id))
                .collect()
        };
        if !drained.is_empty() {
            tracing::debug!(target_id, count = drained.len(), "rejecting pending executions for closed target");
        }
        for pending in drained {
            let _ = pending.resolver.send(Err(ExecError::TargetClosed));
        }
    }

    /// Number of executions still awaiting a result for a target
    pub fn pending_for_target(&self, target_id: &str) -> usize {
        self.inner
            .lock()
            .pending
            .values()
            .filter(|p| p.target_id == target_id)
            .count()
    }

    fn take(&self, id: &str) -> Option<Pending> {
        let mut inner = self.inner.lock();
        let pending = inner.pending.remove(id)?;
        if let Some(queue) = inner.fifo.get_mut(&pending.target_id) {
            queue.retain(|queued| queued != id);
        }
        Some(pending)
    }

    fn remove(&self, id: &str) {
        self.take(id);
    }
}
