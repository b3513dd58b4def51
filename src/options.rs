//! Connection and transport options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use corelink::{ConnectionOptions, KeepaliveOptions};
//!
//! let options = ConnectionOptions::new()
//!     .with_minimum_auto_reconnect(Duration::from_millis(200));
//! let keepalive = KeepaliveOptions::new().with_ping_interval(Duration::from_secs(5));
//! # let _ = (options, keepalive);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Minimum time between a disconnect and an implicit reconnect.
pub const MINIMUM_AUTO_RECONNECT: Duration = Duration::from_millis(1000);

/// Interval between keepalive pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Inactivity window after which a socket is considered dead.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum HTTP request body.
pub const MAX_PAYLOAD_BYTES: usize = 1000 * 1024;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Reconnect policy of a [`ConnectionToCore`](crate::ConnectionToCore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Minimum time after a disconnect before `send_request` reconnects.
    pub minimum_auto_reconnect: Duration,
    /// Whether `send_request` connects implicitly.
    pub auto_reconnect: bool,
}

impl ConnectionOptions {
    /// Creates the default options.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            minimum_auto_reconnect: MINIMUM_AUTO_RECONNECT,
            auto_reconnect: true,
        }
    }

    /// Sets the reconnect throttle window.
    #[inline]
    #[must_use]
    pub const fn with_minimum_auto_reconnect(mut self, window: Duration) -> Self {
        self.minimum_auto_reconnect = window;
        self
    }

    /// Enables or disables implicit reconnects.
    #[inline]
    #[must_use]
    pub const fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// KeepaliveOptions
// ============================================================================

/// Keepalive policy of socket transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveOptions {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Disconnect after this long without inbound traffic.
    pub inactivity_timeout: Duration,
}

impl KeepaliveOptions {
    /// Creates the default options.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            inactivity_timeout: INACTIVITY_TIMEOUT,
        }
    }

    /// Sets the ping interval.
    #[inline]
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the inactivity window.
    #[inline]
    #[must_use]
    pub const fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }
}

impl Default for KeepaliveOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HttpOptions
// ============================================================================

/// Limits of the one-shot HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    /// Largest accepted request body.
    pub max_payload_bytes: usize,
}

impl HttpOptions {
    /// Creates the default options.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    /// Sets the body limit.
    #[inline]
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
