//! Process-wide map of task id to live subscriber channels.
//!
//! Each subscriber owns a bounded `tokio::sync::mpsc` receiver. Publishing
//! never waits on a subscriber: a channel that is full or closed is
//! dropped from the registry and the remaining subscribers still receive
//! the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::event::ProgressEvent;

/// Default per-subscriber buffer.
const DEFAULT_CAPACITY: usize = 64;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription: keep `id` to unsubscribe, read events from
/// `receiver`.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<ProgressEvent>,
}

#[derive(Default)]
struct TaskSubscribers {
    senders: Vec<(SubscriptionId, mpsc::Sender<ProgressEvent>)>,
}

type TaskEntry = Arc<Mutex<TaskSubscribers>>;

/// Fan-out hub shared by the orchestrators and the WebSocket layer.
///
/// The outer map lock is held only for lookups and for inserting or
/// removing a task entry; delivery for one task never contends with
/// another task.
pub struct SubscriberRegistry {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SubscriberRegistry {
    /// Create a registry whose subscriber channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber for `task_id`.
    ///
    /// Succeeds whether or not an orchestrator is running for the task.
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        // Push while holding the outer read lock so a concurrent
        // `unsubscribe` cannot remove the entry between lookup and insert.
        {
            let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = tasks.get(task_id) {
                lock_entry(entry).senders.push((id, tx));
                return Subscription { id, receiver: rx };
            }
        }

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let entry = tasks.entry(task_id.to_string()).or_default();
        lock_entry(entry).senders.push((id, tx));
        tracing::debug!(task_id, subscription = id.0, "Subscriber registered");

        Subscription { id, receiver: rx }
    }

    /// Remove a subscription. Unknown handles are ignored.
    ///
    /// Removing the last subscriber of a task releases its map entry.
    pub fn unsubscribe(&self, task_id: &str, id: SubscriptionId) {
        let now_empty = {
            let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = tasks.get(task_id) else {
                return;
            };
            let mut subs = lock_entry(entry);
            subs.senders.retain(|(sid, _)| *sid != id);
            subs.senders.is_empty()
        };

        if now_empty {
            self.remove_if_empty(task_id);
        }
    }

    /// Deliver `event` to every subscriber of `task_id`.
    ///
    /// Returns the number of subscribers that accepted the event. Full or
    /// closed channels are dropped.
    pub fn publish(&self, task_id: &str, event: &ProgressEvent) -> usize {
        let entry = {
            let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
            match tasks.get(task_id) {
                Some(entry) => Arc::clone(entry),
                None => return 0,
            }
        };

        let (delivered, now_empty) = {
            let mut subs = lock_entry(&entry);
            let before = subs.senders.len();
            subs.senders.retain(|(id, tx)| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(task_id, subscription = id.0, "Subscriber lagging, dropped");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(task_id, subscription = id.0, "Subscriber disconnected");
                    false
                }
            });
            let delivered = subs.senders.len();
            if delivered < before {
                tracing::debug!(task_id, dropped = before - delivered, "Pruned subscribers");
            }
            (delivered, subs.senders.is_empty())
        };

        if now_empty {
            self.remove_if_empty(task_id);
        }

        delivered
    }

    /// Number of live subscribers for `task_id`.
    pub fn subscriber_count(&self, task_id: &str) -> usize {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks
            .get(task_id)
            .map(|entry| lock_entry(entry).senders.len())
            .unwrap_or(0)
    }

    /// Number of tasks with at least one registered subscriber.
    pub fn task_count(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every subscriber. Receivers observe their channel closing.
    pub fn close_all(&self) {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let count = tasks.len();
        tasks.clear();
        tracing::info!(tasks = count, "Closed all subscriptions");
    }

    fn remove_if_empty(&self, task_id: &str) {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let empty = tasks
            .get(task_id)
            .is_some_and(|entry| lock_entry(entry).senders.is_empty());
        if empty {
            tasks.remove(task_id);
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn lock_entry(entry: &TaskEntry) -> std::sync::MutexGuard<'_, TaskSubscribers> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
