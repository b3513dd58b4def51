//! Typed event fan-out.
//!
//! Each emitter carries one closed event enum. Subscribers receive every
//! event emitted after they subscribe, in emission order, through an
//! unbounded channel. Listeners whose receiver was dropped are pruned on the
//! next emit.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;

// ============================================================================
// Types
// ============================================================================

/// Receiving side of a subscription.
pub type Subscription<E> = mpsc::UnboundedReceiver<E>;

struct Listeners<E> {
    senders: Vec<mpsc::UnboundedSender<E>>,
    /// Events held until the first subscriber arrives.
    backlog: Option<Vec<E>>,
}

// ============================================================================
// Emitter
// ============================================================================

/// Publish/subscribe point for one event type.
pub struct Emitter<E> {
    listeners: Mutex<Listeners<E>>,
}

impl<E: Clone> Emitter<E> {
    /// Creates an emitter that drops events nobody is subscribed to.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                senders: Vec::new(),
                backlog: None,
            }),
        }
    }

    /// Creates an emitter that holds events until the first subscriber.
    ///
    /// Transports use this so that nothing emitted between construction and
    /// the owning connection subscribing is lost.
    #[must_use]
    pub fn buffered() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                senders: Vec::new(),
                backlog: Some(Vec::new()),
            }),
        }
    }

    /// Subscribes to all subsequent events.
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.listeners.lock();

        if let Some(backlog) = listeners.backlog.take() {
            for event in backlog {
                let _ = tx.send(event);
            }
        }

        listeners.senders.push(tx);
        rx
    }

    /// Delivers an event to every live subscriber.
    pub fn emit(&self, event: E) {
        let mut listeners = self.listeners.lock();

        if listeners.senders.is_empty()
            && let Some(backlog) = listeners.backlog.as_mut()
        {
            backlog.push(event);
            return;
        }

        listeners
            .senders
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.senders.retain(|tx| !tx.is_closed());
        listeners.senders.len()
    }

    /// Drops every subscriber. Their streams end after draining.
    pub fn clear(&self) {
        self.listeners.lock().senders.clear();
    }
}

impl<E: Clone> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listeners.lock().senders.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
