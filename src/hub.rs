//! Per-task progress fan-out
//!
//! [`ProgressHub`] routes [`ProgressEvent`]s from the task runner to every
//! subscriber watching that task. Delivery is copy-on-broadcast over bounded
//! per-subscriber channels with `try_send`, so one slow or broken subscriber
//! can never block the runner or starve the other subscribers; a subscriber
//! whose buffer overflows is dropped silently.

use crate::types::{HubStats, ProgressEvent, TaskId, TaskSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Events buffered per subscriber before it is considered stuck
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Identifies one subscriber connection on a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Fan-out hub keyed by task id
///
/// Cloning is cheap and shares state; the hub is handed to both the task
/// runner (publish side) and the WebSocket layer (subscribe side).
#[derive(Clone)]
pub struct ProgressHub {
    subscribers: Arc<Mutex<HashMap<TaskId, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
}

impl ProgressHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a subscriber for a task
    ///
    /// The `connected` frame is queued immediately from the given snapshot.
    /// If the task is already terminal the matching terminal frame follows
    /// and the subscriber is not retained — the caller gets both frames and
    /// the channel then closes.
    pub fn connect(
        &self,
        snapshot: &TaskSnapshot,
    ) -> (SubscriberId, mpsc::Receiver<ProgressEvent>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        // The channel is fresh; these sends cannot fail on capacity
        let _ = tx.try_send(snapshot.connected_event());
        if let Some(terminal) = snapshot.terminal_event() {
            let _ = tx.try_send(terminal);
            tracing::debug!(
                task_id = %snapshot.task_id,
                status = %snapshot.status,
                "subscriber connected to finished task, not retained"
            );
            return (id, rx);
        }

        let mut subscribers = self.lock();
        subscribers
            .entry(snapshot.task_id.clone())
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!(task_id = %snapshot.task_id, "progress subscriber connected");
        (id, rx)
    }

    /// Deliver an event to every subscriber of a task
    ///
    /// The subscriber list is snapshotted first, so registrations racing with
    /// a broadcast see either the whole event or none of it. A terminal event
    /// takes the whole list out under the lock before delivery, so each
    /// subscriber is settled exactly once even if [`Self::finish_subscriber`]
    /// runs concurrently.
    pub fn publish(&self, task_id: &TaskId, event: ProgressEvent) {
        if event.is_terminal() {
            let Some(list) = self.lock().remove(task_id) else {
                return;
            };
            for sub in &list {
                let _ = sub.tx.try_send(event.clone());
            }
            return;
        }

        let targets: Vec<(SubscriberId, mpsc::Sender<ProgressEvent>)> = {
            let subscribers = self.lock();
            match subscribers.get(task_id) {
                Some(list) => list.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return,
            }
        };

        let mut stuck = Vec::new();
        for (id, tx) in &targets {
            if tx.try_send(event.clone()).is_err() {
                stuck.push(*id);
            }
        }
        if !stuck.is_empty() {
            tracing::debug!(
                task_id = %task_id,
                dropped = stuck.len(),
                "dropping subscribers that stopped draining"
            );
            let mut subscribers = self.lock();
            if let Some(list) = subscribers.get_mut(task_id) {
                list.retain(|s| !stuck.contains(&s.id));
                if list.is_empty() {
                    subscribers.remove(task_id);
                }
            }
        }
    }

    /// Settle one subscriber whose registration raced a terminal publish
    ///
    /// A subscriber registered from a pre-terminal snapshot misses a terminal
    /// event published between the snapshot read and registration. After
    /// re-reading the task record and finding it terminal, the caller hands
    /// the terminal frame here: the subscriber is removed under the lock and
    /// delivered to only if it was still registered, so a concurrent terminal
    /// publish (which takes the list out first) and this call never both
    /// reach the same subscriber.
    pub fn finish_subscriber(
        &self,
        task_id: &TaskId,
        subscriber_id: SubscriberId,
        terminal: ProgressEvent,
    ) {
        let removed = {
            let mut subscribers = self.lock();
            match subscribers.get_mut(task_id) {
                Some(list) => {
                    let found = list
                        .iter()
                        .position(|s| s.id == subscriber_id)
                        .map(|i| list.swap_remove(i));
                    if list.is_empty() {
                        subscribers.remove(task_id);
                    }
                    found
                }
                None => None,
            }
        };
        if let Some(sub) = removed {
            let _ = sub.tx.try_send(terminal);
            tracing::debug!(
                task_id = %task_id,
                "settled subscriber that registered after the task finished"
            );
        }
    }

    /// Remove one subscriber; unknown ids are ignored
    pub fn disconnect(&self, task_id: &TaskId, subscriber_id: SubscriberId) {
        let mut subscribers = self.lock();
        if let Some(list) = subscribers.get_mut(task_id) {
            list.retain(|s| s.id != subscriber_id);
            if list.is_empty() {
                subscribers.remove(task_id);
            }
        }
    }

    /// Non-blocking snapshot of live connections
    pub fn stats(&self) -> HubStats {
        let subscribers = self.lock();
        HubStats {
            connection_count: subscribers.values().map(Vec::len).sum(),
            task_ids: subscribers.keys().cloned().collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Vec<Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}
