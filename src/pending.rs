//! Pending request table.
//!
//! Correlates outbound request ids with the callers waiting on them. Every
//! entry settles at most once: the first of resolve, reject, timeout, delete
//! or cancel removes it from the table, and every later call for the same id
//! is a silent no-op.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{MessageId, MessageIdGenerator};
use crate::value::Value;

// ============================================================================
// Types
// ============================================================================

/// Map of message ids to waiting callers.
type EntryMap = FxHashMap<MessageId, PendingEntry>;

struct PendingEntry {
    tx: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
    /// Survives a table-wide cancel.
    dont_cancel: bool,
}

impl PendingEntry {
    fn settle(self, outcome: Result<Value>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        let _ = self.tx.send(outcome);
    }
}

// ============================================================================
// PendingRequest
// ============================================================================

/// Handle returned by [`PendingMessages::create`].
#[derive(Debug)]
pub struct PendingRequest {
    id: MessageId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingRequest {
    /// The allocated message id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Waits for the entry to settle.
    ///
    /// # Errors
    ///
    /// Returns the rejection error, or [`Error::ChannelClosed`] if the entry
    /// was deleted without being settled.
    pub async fn response(self) -> Result<Value> {
        self.rx.await?
    }
}

// ============================================================================
// PendingMessages
// ============================================================================

/// Table of requests awaiting a response.
pub struct PendingMessages {
    entries: Arc<Mutex<EntryMap>>,
    ids: MessageIdGenerator,
}

impl PendingMessages {
    /// Creates an empty table with its own id generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(EntryMap::default())),
            ids: MessageIdGenerator::new(),
        }
    }

    /// Allocates an id and registers a waiting caller.
    ///
    /// With a `timeout`, the entry rejects with [`Error::Timeout`] once it
    /// elapses. A `dont_cancel` entry is skipped by [`cancel`](Self::cancel).
    ///
    /// Must be called from within a tokio runtime when a timeout is given.
    pub fn create(&self, timeout: Option<Duration>, dont_cancel: bool) -> PendingRequest {
        let id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();

        let timer = timeout.map(|duration| {
            let entries = Arc::downgrade(&self.entries);
            tokio::spawn(Self::expire(entries, id.clone(), duration))
        });

        self.entries.lock().insert(
            id.clone(),
            PendingEntry {
                tx,
                timer,
                dont_cancel,
            },
        );

        PendingRequest { id, rx }
    }

    async fn expire(entries: Weak<Mutex<EntryMap>>, id: MessageId, duration: Duration) {
        tokio::time::sleep(duration).await;

        let Some(entries) = entries.upgrade() else {
            return;
        };
        let entry = entries.lock().remove(&id);

        if let Some(entry) = entry {
            let timeout_ms = duration.as_millis() as u64;
            debug!(message_id = %id, timeout_ms, "Pending request timed out");
            // The timer is this task; do not abort it.
            let _ = entry.tx.send(Err(Error::timeout(id, timeout_ms)));
        }
    }

    /// Settles an entry with a value. Returns `false` if it was not pending.
    pub fn resolve(&self, id: &MessageId, data: Value) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.settle(Ok(data));
                true
            }
            None => false,
        }
    }

    /// Settles an entry with an error. Returns `false` if it was not pending.
    pub fn reject(&self, id: &MessageId, error: Error) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Removes an entry without settling it.
    pub fn delete(&self, id: &MessageId) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Rejects every entry not marked `dont_cancel`. Returns how many were
    /// rejected.
    pub fn cancel(&self, error: &Error) -> usize {
        let cancelled: Vec<PendingEntry> = {
            let mut entries = self.entries.lock();
            let ids: Vec<MessageId> = entries
                .iter()
                .filter(|(_, entry)| !entry.dont_cancel)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        let count = cancelled.len();
        for entry in cancelled {
            entry.settle(Err(error.clone()));
        }

        if count > 0 {
            debug!(count, error = %error, "Cancelled pending requests");
        }
        count
    }

    /// Returns `true` if the id is still pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Returns the number of pending entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PendingMessages {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PendingMessages {
    fn drop(&mut self) {
        for (_, entry) in self.entries.lock().drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve() {
        let pending = PendingMessages::new();
        let request = pending.create(None, false);
        let id = request.id().clone();

        assert!(pending.resolve(&id, Value::from("done")));
        assert_eq!(request.response().await.unwrap(), Value::from("done"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let pending = PendingMessages::new();
        let request = pending.create(None, false);
        let id = request.id().clone();

        assert!(pending.resolve(&id, Value::Int(1)));
        assert!(!pending.resolve(&id, Value::Int(2)));
        assert!(!pending.reject(&id, Error::canceled("late")));
        assert!(!pending.delete(&id));
        assert_eq!(pending.cancel(&Error::canceled("late")), 0);

        assert_eq!(request.response().await.unwrap(), Value::Int(1));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let pending = PendingMessages::new();
        let first = pending.create(None, false);
        let second = pending.create(None, false);
        assert_ne!(first.id(), second.id());
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_removes() {
        let pending = PendingMessages::new();
        let request = pending.create(Some(Duration::from_millis(500)), false);
        let id = request.id().clone();

        let started = tokio::time::Instant::now();
        let err = request.response().await.unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(600));
        assert!(!pending.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_before_timeout_wins() {
        let pending = PendingMessages::new();
        let request = pending.create(Some(Duration::from_millis(100)), false);
        let id = request.id().clone();

        pending.resolve(&id, Value::Bool(true));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(request.response().await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_cancel_skips_dont_cancel() {
        let pending = PendingMessages::new();
        let normal = pending.create(None, false);
        let hook = pending.create(None, true);
        let hook_id = hook.id().clone();

        let count = pending.cancel(&Error::disconnected("localhost:1818"));
        assert_eq!(count, 1);

        let err = normal.response().await.unwrap_err();
        assert!(matches!(err, Error::Disconnected { ref host } if host == "localhost:1818"));

        assert!(pending.contains(&hook_id));
        pending.resolve(&hook_id, Value::Null);
        assert_eq!(hook.response().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_delete_does_not_settle() {
        let pending = PendingMessages::new();
        let request = pending.create(None, false);
        let id = request.id().clone();

        assert!(pending.delete(&id));
        assert!(matches!(request.response().await, Err(Error::ChannelClosed)));
    }
}
