//! Connection orchestration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Connections`] | Caller-facing interface |
//! | [`ResourceRequestManager`] | Tracks in-flight resource requests |
//! | [`ConnectAttempt`] | One WebSocket connection attempt |
//! | [`WebSocketConnection`] | Established connection with buffered delivery |
//! | [`ConnectionsOptions`] | Configuration |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection establishment.
pub mod connect;

/// Caller-facing interface.
pub mod core;

/// Configuration.
pub mod options;

/// Resource request manager.
pub mod resource;

/// Established connection with buffered text delivery.
pub mod web_socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connect::{ConnectAttempt, GOING_AWAY, connect_web_socket};
pub use core::{Connections, WebSocketRequestTransaction};
pub use options::{ConnectionsOptions, DEFAULT_CONNECT_POLL_INTERVAL};
pub use resource::{ResourceRequest, ResourceRequestManager, ResourceRequestTransaction, Response};
pub use web_socket::{BinaryHandler, CloseHandler, TextHandler, WebSocketConnection};
