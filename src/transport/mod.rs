//! Transport collaborator contracts.
//!
//! The connection core drives external engines it does not implement: an
//! HTTP-style request engine, and a WebSocket handshake/framing engine.
//! This module names the operations the core needs from them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  issue_request   ┌──────────────┐
//! │  Connections │─────────────────►│  Transport   │──► network
//! │              │◄─ completion ────│ (I/O thread) │
//! │              │◄─ upgrade ───────│              │
//! └──────┬───────┘                  └──────────────┘
//!        │ start/finish_open_as_client
//!        ▼
//! ┌──────────────┐   delegates      ┌──────────────┐
//! │WebSocketEngine──► WebSocket ────►│  consumer    │
//! └──────────────┘                  └──────────────┘
//! ```
//!
//! # Callback ordering
//!
//! Callbacks may run on any thread. For one transaction the transport
//! calls the upgrade hook (if any, and only on a successful upgrade) before
//! the completion hook, and calls the completion hook at most once.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `address` | Parsed request targets |
//! | `http` | Request/response/header types and transaction states |
//! | `tungstenite` | WebSocket engine on tokio-tungstenite |

// ============================================================================
// Submodules
// ============================================================================

/// Parsed request targets.
pub mod address;

/// Request/response types.
pub mod http;

/// WebSocket engine on tokio-tungstenite.
pub mod tungstenite;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use address::{Address, DEFAULT_SECURE_PORT};
pub use http::{Header, HttpRequest, HttpResponse, TransactionState};
pub use tungstenite::{TungsteniteEngine, TungsteniteSocket};

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::diagnostics::DiagnosticsSender;

// ============================================================================
// Transport
// ============================================================================

/// Called once when a transaction finishes.
pub type CompletionHook = Box<dyn FnOnce() + Send>;

/// Called with the response and the raw stream when a request asked for
/// the connection and the server switched protocols.
pub type UpgradeHook = Box<dyn FnOnce(&HttpResponse, Upgraded) + Send>;

/// An HTTP-style request engine.
pub trait Transport: Send + Sync {
    /// Starts a request.
    ///
    /// Passing an `upgrade` hook asks the transport to hand over the raw
    /// connection instead of closing or reusing it.
    fn issue_request(
        &self,
        request: HttpRequest,
        upgrade: Option<UpgradeHook>,
    ) -> Arc<dyn Transaction>;
}

/// One request/response exchange inside the transport.
pub trait Transaction: Send + Sync {
    /// Returns the current state.
    fn state(&self) -> TransactionState;

    /// Returns the response received so far.
    fn response(&self) -> HttpResponse;

    /// Installs the one-shot completion hook.
    ///
    /// If the transaction already finished, the hook runs immediately on
    /// the calling thread.
    fn set_completion_hook(&self, hook: CompletionHook);

    /// Abandons the transaction. Best effort; the completion hook may still
    /// run afterwards.
    fn cancel(&self);
}

// ============================================================================
// Raw connections
// ============================================================================

/// A byte stream handed over by the transport after an upgrade.
pub trait RawConnection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RawConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// The raw stream after a protocol switch.
pub struct Upgraded {
    /// The stream itself.
    pub connection: Box<dyn RawConnection>,
    /// Bytes the transport already read past the end of the response.
    pub trailer: Vec<u8>,
}

impl Upgraded {
    /// Wraps a stream with no trailing bytes.
    #[must_use]
    pub fn new(connection: Box<dyn RawConnection>) -> Self {
        Self {
            connection,
            trailer: Vec::new(),
        }
    }

    /// Sets the bytes read past the response.
    #[must_use]
    pub fn with_trailer(mut self, trailer: Vec<u8>) -> Self {
        self.trailer = trailer;
        self
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded")
            .field("trailer_len", &self.trailer.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WebSocket engine
// ============================================================================

/// Client side of the WebSocket opening handshake.
pub trait WebSocketEngine: Send + Sync {
    /// Adds the upgrade headers to `request` and returns the state needed
    /// to verify the server's answer.
    fn start_open_as_client(&self, request: &mut HttpRequest) -> Box<dyn ClientHandshake>;

    /// Sender for handshake diagnostics, if the engine publishes any.
    fn diagnostics(&self) -> Option<&DiagnosticsSender> {
        None
    }
}

/// A handshake waiting for the server's answer.
pub trait ClientHandshake: Send {
    /// Verifies the response and, if it completes the handshake, engages a
    /// WebSocket on the upgraded stream. `None` means the handshake failed.
    fn finish_open_as_client(
        self: Box<Self>,
        upgraded: Upgraded,
        response: &HttpResponse,
    ) -> Option<Arc<dyn WebSocket>>;
}

/// An established WebSocket.
pub trait WebSocket: Send + Sync {
    /// Sends a text message.
    fn send_text(&self, text: String);

    /// Sends a binary message.
    fn send_binary(&self, data: Vec<u8>);

    /// Starts the closing handshake.
    fn close(&self, code: u16, reason: &str);

    /// Replaces all inbound callbacks at once.
    fn set_delegates(&self, delegates: Delegates);

    /// Sender for this socket's own diagnostics, if it publishes any.
    fn diagnostics(&self) -> Option<&DiagnosticsSender> {
        None
    }
}

// ============================================================================
// Delegates
// ============================================================================

/// Receives a ping, pong or binary payload.
pub type PayloadDelegate = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// Receives a text message.
pub type TextDelegate = Box<dyn Fn(String) + Send + Sync>;

/// Receives a close status code and reason.
pub type CloseDelegate = Box<dyn Fn(u16, String) + Send + Sync>;

/// Inbound callbacks of a [`WebSocket`]. Unset callbacks drop the frame.
#[derive(Default)]
pub struct Delegates {
    /// Ping received.
    pub ping: Option<PayloadDelegate>,
    /// Pong received.
    pub pong: Option<PayloadDelegate>,
    /// Text message received.
    pub text: Option<TextDelegate>,
    /// Binary message received.
    pub binary: Option<PayloadDelegate>,
    /// Close frame received, or the stream ended.
    pub close: Option<CloseDelegate>,
}

impl Delegates {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ping callback.
    #[must_use]
    pub fn on_ping(mut self, f: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        self.ping = Some(Box::new(f));
        self
    }

    /// Sets the pong callback.
    #[must_use]
    pub fn on_pong(mut self, f: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        self.pong = Some(Box::new(f));
        self
    }

    /// Sets the text callback.
    #[must_use]
    pub fn on_text(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.text = Some(Box::new(f));
        self
    }

    /// Sets the binary callback.
    #[must_use]
    pub fn on_binary(mut self, f: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        self.binary = Some(Box::new(f));
        self
    }

    /// Sets the close callback.
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(u16, String) + Send + Sync + 'static) -> Self {
        self.close = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Delegates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegates")
            .field("ping", &self.ping.is_some())
            .field("pong", &self.pong.is_some())
            .field("text", &self.text.is_some())
            .field("binary", &self.binary.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}
