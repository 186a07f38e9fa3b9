//! Connections configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use gateway_connections::ConnectionsOptions;
//!
//! let options = ConnectionsOptions::new()
//!     .with_user_agent("DiscordBot")
//!     .with_connect_poll_interval(Duration::from_millis(50));
//!
//! let from_file = ConnectionsOptions::from_json(r#"{ "cancel_on_abort": false }"#)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diagnostics::levels;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default granularity of the connection attempt's wait loop.
pub const DEFAULT_CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// ConnectionsOptions
// ============================================================================

/// Configuration of a [`Connections`](crate::Connections) instance.
///
/// Missing JSON fields take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsOptions {
    /// `User-Agent` added to resource requests that do not set one.
    pub user_agent: Option<String>,

    /// How often a connection attempt re-checks for completion or abort,
    /// in milliseconds.
    pub connect_poll_interval_ms: u64,

    /// Whether aborting a connection attempt also cancels its transport
    /// transaction.
    pub cancel_on_abort: bool,

    /// Minimum level forwarded when the connections sender is chained into
    /// a parent.
    pub connections_diagnostic_level: usize,

    /// Minimum level forwarded from each established connection.
    pub web_socket_diagnostic_level: usize,
}

impl Default for ConnectionsOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionsOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            user_agent: None,
            connect_poll_interval_ms: DEFAULT_CONNECT_POLL_INTERVAL.as_millis() as u64,
            cancel_on_abort: true,
            connections_diagnostic_level: levels::CONNECTIONS_INTERFACE,
            web_socket_diagnostic_level: levels::WEB_SOCKET_WRAPPER,
        }
    }

    /// Parses options from JSON and validates them.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the input is not valid JSON for this type
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the poll interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.connect_poll_interval_ms == 0 {
            return Err(Error::config("connect_poll_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Returns the poll interval as a [`Duration`], at least 1ms.
    #[inline]
    #[must_use]
    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms.max(1))
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionsOptions {
    /// Sets the default `User-Agent`.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the poll interval. Sub-millisecond intervals round up to 1ms.
    #[inline]
    #[must_use]
    pub fn with_connect_poll_interval(mut self, interval: Duration) -> Self {
        self.connect_poll_interval_ms = u64::try_from(interval.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        self
    }

    /// Sets whether abort cancels the transport transaction.
    #[inline]
    #[must_use]
    pub fn with_cancel_on_abort(mut self, cancel: bool) -> Self {
        self.cancel_on_abort = cancel;
        self
    }

    /// Sets the forwarding threshold of the connections sender.
    #[inline]
    #[must_use]
    pub fn with_connections_diagnostic_level(mut self, level: usize) -> Self {
        self.connections_diagnostic_level = level;
        self
    }

    /// Sets the forwarding threshold of established connections.
    #[inline]
    #[must_use]
    pub fn with_web_socket_diagnostic_level(mut self, level: usize) -> Self {
        self.web_socket_diagnostic_level = level;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionsOptions::default();
        assert!(options.user_agent.is_none());
        assert_eq!(options.connect_poll_interval(), Duration::from_millis(100));
        assert!(options.cancel_on_abort);
        assert_eq!(options.connections_diagnostic_level, 1);
        assert_eq!(options.web_socket_diagnostic_level, 0);
    }

    #[test]
    fn test_builder_chain() {
        let options = ConnectionsOptions::new()
            .with_user_agent("DiscordBot")
            .with_connect_poll_interval(Duration::from_micros(10))
            .with_cancel_on_abort(false)
            .with_web_socket_diagnostic_level(3);

        assert_eq!(options.user_agent.as_deref(), Some("DiscordBot"));
        assert_eq!(options.connect_poll_interval_ms, 1);
        assert!(!options.cancel_on_abort);
        assert_eq!(options.web_socket_diagnostic_level, 3);
    }

    #[test]
    fn test_poll_interval_bounds() {
        let huge = ConnectionsOptions::new().with_connect_poll_interval(Duration::MAX);
        assert_eq!(huge.connect_poll_interval_ms, u64::MAX);

        let zero = ConnectionsOptions {
            connect_poll_interval_ms: 0,
            ..ConnectionsOptions::default()
        };
        assert!(zero.validate().is_err());
        assert_eq!(zero.connect_poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_from_json_partial() {
        let options = ConnectionsOptions::from_json(r#"{ "user_agent": "DiscordBot" }"#)
            .expect("valid options");

        assert_eq!(options.user_agent.as_deref(), Some("DiscordBot"));
        assert_eq!(options.connect_poll_interval_ms, 100);
    }

    #[test]
    fn test_from_json_rejects_zero_interval() {
        let result = ConnectionsOptions::from_json(r#"{ "connect_poll_interval_ms": 0 }"#);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        let result = ConnectionsOptions::from_json("{ not json");
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_serialize_round_trip() {
        let options = ConnectionsOptions::new().with_cancel_on_abort(false);
        let json = serde_json::to_string(&options).expect("serialize");
        assert_eq!(ConnectionsOptions::from_json(&json).expect("parse"), options);
    }
}
