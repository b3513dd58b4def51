//! Single-shot completion shared by any number of waiters.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;

// ============================================================================
// Resolvable
// ============================================================================

/// A value that is settled at most once and can be awaited many times.
///
/// Coalesced connects and disconnects hand every concurrent caller the same
/// `Resolvable`; whoever drives the operation resolves it and all waiters
/// observe the same outcome.
pub struct Resolvable<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> Resolvable<T> {
    /// Creates an unresolved instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Settles the value. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        {
            let mut slot = self.value.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
        }
        self.notify.notify_waiters();
        true
    }

    /// Returns `true` once settled.
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Returns the settled value without waiting.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Waits until settled and returns a clone of the value.
    pub async fn promise(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.get() {
                return value;
            }

            notified.await;
        }
    }
}

impl<T: Clone> Default for Resolvable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolvable")
            .field("resolved", &self.value.lock().is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[tokio::test]
    async fn test_all_waiters_see_value() {
        let resolvable = Arc::new(Resolvable::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let resolvable = Arc::clone(&resolvable);
                tokio::spawn(async move { resolvable.promise().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(resolvable.resolve(7));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 7);
        }
    }

    #[tokio::test]
    async fn test_resolve_is_single_shot() {
        let resolvable = Resolvable::new();
        assert!(resolvable.resolve("first"));
        assert!(!resolvable.resolve("second"));
        assert_eq!(resolvable.promise().await, "first");
    }

    #[test]
    fn test_is_resolved() {
        let resolvable = Resolvable::new();
        assert!(!resolvable.is_resolved());
        resolvable.resolve(());
        assert!(resolvable.is_resolved());
    }
}
