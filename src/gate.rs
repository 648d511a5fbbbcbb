//! Admission control for concurrent exports
//!
//! [`RateGate`] bounds the number of exports executing at once. Callers wait
//! on a tokio semaphore (suspended, never polling) up to a configurable
//! timeout; rejection on timeout is a normal outcome, not an error. The
//! acquired slot is represented by a [`SlotGuard`] that releases on drop, so
//! the slot comes back on every exit path, including cancellation.

use crate::types::{GateStatus, TaskId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Outcome of [`RateGate::acquire`]
#[derive(Debug)]
pub enum Admission {
    /// A slot was acquired; held until the guard drops
    Acquired(SlotGuard),
    /// The wait exceeded the timeout; nothing was acquired
    Rejected,
}

impl Admission {
    /// True if a slot was acquired
    pub fn is_acquired(&self) -> bool {
        matches!(self, Admission::Acquired(_))
    }
}

struct GateShared {
    max: usize,
    semaphore: Arc<Semaphore>,
    active: Mutex<HashSet<TaskId>>,
    queued: AtomicUsize,
    rejected_total: AtomicU64,
    completed_total: AtomicU64,
}

/// Counting admission gate for export slots
///
/// Cloning is cheap and shares the underlying state, so the gate can be
/// handed to every spawned export task.
#[derive(Clone)]
pub struct RateGate {
    shared: Arc<GateShared>,
}

impl RateGate {
    /// Create a gate admitting at most `max` concurrent exports
    ///
    /// `max` is clamped to at least 1; a gate that can never admit anything
    /// would deadlock every caller.
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            shared: Arc::new(GateShared {
                max,
                semaphore: Arc::new(Semaphore::new(max)),
                active: Mutex::new(HashSet::new()),
                queued: AtomicUsize::new(0),
                rejected_total: AtomicU64::new(0),
                completed_total: AtomicU64::new(0),
            }),
        }
    }

    /// Wait for an export slot, up to `timeout`
    ///
    /// While waiting the caller is counted in `queued`. On success the task
    /// id is added to the active set and a [`SlotGuard`] is returned; on
    /// timeout `Rejected` is returned and `rejected_total` is incremented.
    /// If the returned future is dropped mid-wait the queued count is still
    /// restored.
    pub async fn acquire(&self, task_id: &TaskId, timeout: Duration) -> Admission {
        let queued = QueuedToken::new(&self.shared);

        let permit = tokio::time::timeout(
            timeout,
            Arc::clone(&self.shared.semaphore).acquire_owned(),
        )
        .await;
        drop(queued);

        match permit {
            Ok(Ok(permit)) => {
                {
                    let mut active = self
                        .shared
                        .active
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    active.insert(task_id.clone());
                }
                tracing::debug!(task_id = %task_id, "export slot acquired");
                Admission::Acquired(SlotGuard {
                    _permit: permit,
                    shared: Arc::clone(&self.shared),
                    task_id: task_id.clone(),
                })
            }
            // The semaphore is never closed while the gate is alive
            Ok(Err(_)) | Err(_) => {
                self.shared.rejected_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(task_id = %task_id, "export slot wait timed out");
                Admission::Rejected
            }
        }
    }

    /// Non-blocking snapshot of gate counters
    pub fn status(&self) -> GateStatus {
        let active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        GateStatus {
            max: self.shared.max,
            active,
            queued: self.shared.queued.load(Ordering::Relaxed),
            rejected_total: self.shared.rejected_total.load(Ordering::Relaxed),
            completed_total: self.shared.completed_total.load(Ordering::Relaxed),
        }
    }

    /// Configured maximum concurrent exports
    pub fn max(&self) -> usize {
        self.shared.max
    }
}

/// Restores the queued count even if the acquire future is dropped mid-wait
struct QueuedToken<'a> {
    shared: &'a GateShared,
}

impl<'a> QueuedToken<'a> {
    fn new(shared: &'a GateShared) -> Self {
        shared.queued.fetch_add(1, Ordering::Relaxed);
        Self { shared }
    }
}

impl Drop for QueuedToken<'_> {
    fn drop(&mut self) {
        self.shared.queued.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An acquired export slot
///
/// Dropping the guard releases the semaphore permit, removes the task from
/// the active set, and counts the completion. There is no manual release, so
/// a slot can never be released twice or leak across an early return.
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    shared: Arc<GateShared>,
    task_id: TaskId,
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.task_id);
        drop(active);
        self.shared.completed_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task_id = %self.task_id, "export slot released");
    }
}
