//! Error types for gateway connections.
//!
//! This module defines the failure taxonomy of the connection core.
//!
//! # Usage
//!
//! Connection and request failures are reported as values: a failed
//! WebSocket attempt yields `None` and a failed resource request yields a
//! synthetic [`Response`](crate::Response). [`Error`] values surface from
//! configuration parsing and from waiting on a [`Deferred`](crate::Deferred):
//!
//! ```ignore
//! use gateway_connections::{ConnectionsOptions, Result};
//!
//! fn load(json: &str) -> Result<ConnectionsOptions> {
//!     let options = ConnectionsOptions::from_json(json)?;
//!     Ok(options)
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Address | [`Error::InvalidAddress`] |
//! | Transport | [`Error::UnableToConnect`], [`Error::Broken`], [`Error::Timeout`] |
//! | Handshake | [`Error::HandshakeRejected`] |
//! | Caller | [`Error::Aborted`], [`Error::Canceled`] |
//! | Configuration | [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::diagnostics::levels;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// The `Display` text of each taxonomy variant is the diagnostic message
/// published when that failure occurs.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Address Errors
    // ========================================================================
    /// Target address could not be parsed.
    ///
    /// No network activity happens for an unparseable address.
    #[error("address \"{address}\" is invalid: {reason}")]
    InvalidAddress {
        /// The address as given by the caller.
        address: String,
        /// Parser diagnostic.
        reason: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport could not reach the server.
    #[error("unable to connect")]
    UnableToConnect,

    /// Peer broke the connection before a response completed.
    #[error("connection broken by peer")]
    Broken,

    /// Transport gave up waiting for the response.
    #[error("timeout waiting for response")]
    Timeout,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// The upgrade response did not engage a WebSocket.
    ///
    /// Either the peer answered with a status other than 101, or it answered
    /// 101 but the handshake check failed.
    #[error("{}", rejection_message(.status, .reason))]
    HandshakeRejected {
        /// Status code of the upgrade response.
        status: u16,
        /// Reason phrase of the upgrade response.
        reason: String,
    },

    // ========================================================================
    // Caller-Initiated
    // ========================================================================
    /// Connection attempt aborted by the caller.
    #[error("connection aborted")]
    Aborted,

    /// Resource request canceled by the caller.
    #[error("request canceled")]
    Canceled,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error (worker thread creation).
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The producing side of a deferred result went away without a value.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Renders the handshake rejection message, distinguishing a 101 that
/// failed the handshake check from any other status.
fn rejection_message(status: &u16, reason: &str) -> String {
    if *status == 101 {
        "connection upgraded, but failed to engage WebSocket".to_string()
    } else {
        format!("got back response: {status} {reason}")
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(status: u16, reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            status,
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the transport reported the failure.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::UnableToConnect | Self::Broken | Self::Timeout)
    }

    /// Returns `true` if the caller ended the operation.
    #[inline]
    #[must_use]
    pub fn is_caller_initiated(&self) -> bool {
        matches!(self, Self::Aborted | Self::Canceled)
    }

    /// Returns the severity at which this failure is published.
    #[must_use]
    pub fn diagnostic_level(&self) -> usize {
        match self {
            Self::InvalidAddress { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::ChannelClosed => levels::ERROR,
            Self::UnableToConnect
            | Self::Broken
            | Self::Timeout
            | Self::HandshakeRejected { .. }
            | Self::Aborted => levels::WARNING,
            Self::Canceled => levels::INFO,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
