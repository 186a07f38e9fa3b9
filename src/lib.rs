//! Gateway Connections - race-free connection orchestration.
//!
//! This library turns callback-driven network transactions (an HTTP-style
//! request engine and a WebSocket upgrade handshake) into synchronous,
//! cancellable results that callers can block on or poll.
//!
//! # Architecture
//!
//! The core sits between a caller and two external engines:
//!
//! - **Transport**: issues requests, reports completion through one-shot
//!   hooks on its own threads
//! - **WebSocket engine**: adds handshake headers, engages a socket on the
//!   upgraded stream
//!
//! Key design principles:
//!
//! - Every request resolves exactly once, even when cancel races completion
//! - Each connection attempt runs on its own worker thread and can be
//!   aborted until the transport signals completion
//! - Text arriving before a handler is registered is buffered, then
//!   replayed in order
//! - Failures are values: a synthetic [`Response`] or `None`, plus one
//!   diagnostic message
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gateway_connections::{Connections, ResourceRequest, TungsteniteEngine};
//!
//! let connections = Connections::new(transport, Arc::new(TungsteniteEngine::current()?));
//!
//! let ping = connections.submit_resource_request(
//!     ResourceRequest::get("https://api.example.com/v1/ping"),
//! );
//! assert_eq!(ping.response.wait()?.status, 200);
//!
//! let request = connections.submit_websocket_request("wss://gateway.example.com/?v=6");
//! if let Some(ws) = request.web_socket.wait()? {
//!     ws.register_text_handler(|message| println!("{message}"));
//!     ws.send_text("hello");
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connections`] | [`Connections`], request manager, connection attempts, [`WebSocketConnection`] |
//! | [`diagnostics`] | Diagnostic event stream |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`sync`] | [`Deferred`] result slot and [`CancelHandle`] |
//! | [`transport`] | Transport and WebSocket engine contracts, tungstenite engine |

// ============================================================================
// Modules
// ============================================================================

/// Connection orchestration.
///
/// Use [`Connections::new()`] to issue resource and WebSocket requests.
pub mod connections;

/// Diagnostic event stream.
pub mod diagnostics;

/// Error types and result aliases.
///
/// Fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Result slots and cancellation handles.
pub mod sync;

/// Transport collaborator contracts.
///
/// Implement [`Transport`] to plug in a request engine; the bundled
/// [`TungsteniteEngine`] covers the WebSocket side.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connections::{
    ConnectAttempt, Connections, ConnectionsOptions, ResourceRequest, ResourceRequestManager,
    ResourceRequestTransaction, Response, WebSocketConnection, WebSocketRequestTransaction,
    connect_web_socket,
};

// Diagnostics
pub use diagnostics::{DiagnosticDelegate, DiagnosticsSender, Subscription};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::TransactionId;

// Synchronization
pub use sync::{CancelHandle, Deferred, Promise, deferred};

// Transport contracts
pub use transport::{
    Address, ClientHandshake, CompletionHook, Delegates, Header, HttpRequest, HttpResponse,
    Transaction, TransactionState, Transport, TungsteniteEngine, UpgradeHook, Upgraded, WebSocket,
    WebSocketEngine,
};
