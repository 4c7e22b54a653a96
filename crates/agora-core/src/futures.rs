//! # Multiplexed Binding Stream
//!
//! Merges N pending remote sub-query handles into one pull-based binding
//! stream. A handle that fails or is interrupted never aborts the
//! consumer: the failure is recorded as a warning in the execution's
//! ledger, the handle is dropped, and iteration continues with whatever
//! the remaining participants deliver. The contract is "result may be
//! partial", never "query aborts because one participant is slow or down".
//!
//! Completion is observed through a `JoinSet` (first-completed-first-
//! served); each wait is bounded by the context's poll interval, so the
//! consuming task is never parked indefinitely on a single call, and the
//! optional query deadline bounds the waits of one whole query.

use crate::context::{RequestContext, UNKNOWN_TARGET};
use crate::types::{AgoraError, Binding};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

// =============================================================================
// PENDING HANDLE
// =============================================================================

/// An opaque reference to a remote sub-query's eventual result batch.
#[derive(Debug)]
pub struct PendingHandle {
    /// The remote participant or endpoint this handle waits on.
    pub target: String,
    task: JoinHandle<Result<Vec<Binding>, AgoraError>>,
}

impl PendingHandle {
    /// Spawn a sub-query future as a pending handle.
    #[must_use]
    pub fn spawn<F>(target: impl Into<String>, future: F) -> Self
    where
        F: std::future::Future<Output = Result<Vec<Binding>, AgoraError>> + Send + 'static,
    {
        Self {
            target: target.into(),
            task: tokio::spawn(future),
        }
    }
}

// =============================================================================
// MULTIPLEXED BINDINGS
// =============================================================================

/// Pull-based merge of many pending handles into one binding stream.
pub struct MultiplexedBindings {
    set: JoinSet<(String, Result<Vec<Binding>, AgoraError>)>,
    inner_aborts: Vec<AbortHandle>,
    current: VecDeque<Binding>,
    ctx: RequestContext,
    waited: Duration,
    closed: bool,
}

impl std::fmt::Debug for MultiplexedBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexedBindings")
            .field("pending", &self.set.len())
            .field("buffered", &self.current.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl MultiplexedBindings {
    /// Adopt a set of pending handles for merging.
    #[must_use]
    pub fn new(ctx: &RequestContext, handles: Vec<PendingHandle>) -> Self {
        let mut set = JoinSet::new();
        let mut inner_aborts = Vec::with_capacity(handles.len());
        for handle in handles {
            let PendingHandle { target, task } = handle;
            inner_aborts.push(task.abort_handle());
            set.spawn(async move {
                let result = match task.await {
                    Ok(result) => result,
                    Err(join) if join.is_cancelled() => {
                        Err(AgoraError::RemoteFailure("sub-query cancelled".to_string()))
                    }
                    Err(join) => Err(AgoraError::RemoteFailure(format!(
                        "sub-query task failed: {join}"
                    ))),
                };
                (target, result)
            });
        }
        Self {
            set,
            inner_aborts,
            current: VecDeque::new(),
            ctx: ctx.clone(),
            waited: Duration::ZERO,
            closed: false,
        }
    }

    /// Whether any binding may still be produced.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.closed && (!self.current.is_empty() || !self.set.is_empty())
    }

    /// Produce the next binding, or `None` once every handle is drained.
    ///
    /// Serves the currently adopted batch first; otherwise waits for the
    /// first handle to complete, one poll interval at a time. Failed
    /// handles are demoted to warnings and skipped.
    pub async fn next(&mut self) -> Option<Binding> {
        loop {
            if let Some(binding) = self.current.pop_front() {
                return Some(binding);
            }
            if self.closed || self.set.is_empty() {
                return None;
            }
            match tokio::time::timeout(self.ctx.poll_interval, self.set.join_next()).await {
                // Nothing ready within one poll interval; re-arm, honoring
                // the overall deadline when one is configured.
                Err(_elapsed) => {
                    self.waited += self.ctx.poll_interval;
                    if let Some(deadline) = self.ctx.query_deadline {
                        if self.waited >= deadline {
                            self.ctx.warn(
                                UNKNOWN_TARGET,
                                "Query deadline exceeded while awaiting remote batches: \
                                 result may be partial.",
                            );
                            self.close();
                            return None;
                        }
                    }
                }
                Ok(None) => return None,
                Ok(Some(Ok((_, Ok(bindings))))) => {
                    self.current.extend(bindings);
                }
                Ok(Some(Ok((target, Err(error))))) => {
                    tracing::debug!(remote = %target, %error, "Remote batch failed");
                    self.ctx
                        .warn(&target, "Failure invoking a remote batch: result may be partial.");
                }
                Ok(Some(Err(join))) => {
                    tracing::debug!(%join, "Remote batch wait interrupted");
                    self.ctx.warn(
                        UNKNOWN_TARGET,
                        "Timeout/Interruption invoking a remote batch: result may be partial.",
                    );
                }
            }
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<Binding> {
        let mut out = Vec::new();
        while let Some(binding) = self.next().await {
            out.push(binding);
        }
        out
    }

    /// Cancel every remaining handle and drop buffered results. Idempotent;
    /// cancellation is not reported as an error.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for abort in self.inner_aborts.drain(..) {
            abort.abort();
        }
        self.set.abort_all();
        self.current.clear();
    }
}

impl Drop for MultiplexedBindings {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// TESTS
// =============================================================================
