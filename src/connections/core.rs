//! Caller-facing connection interface.
//!
//! [`Connections`] ties the pieces together: resource requests go through
//! the [`ResourceRequestManager`], WebSocket requests through a connection
//! attempt whose engaged socket is wrapped in a [`WebSocketConnection`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gateway_connections::{Connections, ResourceRequest, TungsteniteEngine};
//!
//! let connections = Connections::new(transport, Arc::new(TungsteniteEngine::current()?));
//!
//! let gateway = connections.submit_resource_request(
//!     ResourceRequest::get("https://discord.com/api/v6/gateway"),
//! );
//! let url: String = gateway.response.wait()?.json::<serde_json::Value>()?["url"]
//!     .as_str()
//!     .unwrap_or_default()
//!     .to_string();
//!
//! let request = connections.submit_websocket_request(&url);
//! if let Some(ws) = request.web_socket.wait()? {
//!     ws.register_text_handler(|message| println!("{message}"));
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::{DiagnosticDelegate, DiagnosticsSender, Subscription, levels};
use crate::sync::{CancelHandle, Deferred};
use crate::transport::{Transport, WebSocketEngine};

use super::connect::connect_web_socket_with;
use super::options::ConnectionsOptions;
use super::resource::{ResourceRequest, ResourceRequestManager, ResourceRequestTransaction};
use super::web_socket::WebSocketConnection;

// ============================================================================
// Constants
// ============================================================================

/// Level of the message announcing a WebSocket request.
const WEB_SOCKET_REQUEST_LEVEL: usize = 3;

// ============================================================================
// WebSocketRequestTransaction
// ============================================================================

/// Handle returned for a WebSocket request.
#[derive(Debug)]
pub struct WebSocketRequestTransaction {
    /// Resolves once with the connection, or `None` on any failure.
    pub web_socket: Deferred<Option<WebSocketConnection>>,
    /// Aborts the attempt if it has not completed yet.
    pub cancel: CancelHandle,
}

// ============================================================================
// Connections
// ============================================================================

/// Issues resource and WebSocket requests over one transport.
///
/// The engine's handshake diagnostics appear under `Connections/<engine>`,
/// and each established connection's under `Connections/WebSocketAdapter`.
pub struct Connections {
    manager: ResourceRequestManager,
    engine: Arc<dyn WebSocketEngine>,
    diagnostics: DiagnosticsSender,
    /// Forwards the engine's diagnostics while this instance lives.
    _engine_diagnostics: Option<Subscription>,
    options: ConnectionsOptions,
}

impl Connections {
    /// Creates an instance with default options.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, engine: Arc<dyn WebSocketEngine>) -> Self {
        Self::with_options(transport, engine, ConnectionsOptions::default())
    }

    /// Creates an instance with the given options.
    ///
    /// A zero poll interval is raised to 1ms.
    #[must_use]
    pub fn with_options(
        transport: Arc<dyn Transport>,
        engine: Arc<dyn WebSocketEngine>,
        mut options: ConnectionsOptions,
    ) -> Self {
        options.connect_poll_interval_ms = options.connect_poll_interval_ms.max(1);

        let diagnostics = DiagnosticsSender::new("Connections");
        let manager =
            ResourceRequestManager::new(transport, diagnostics.clone(), options.user_agent.clone());
        let engine_diagnostics = engine
            .diagnostics()
            .map(|sender| sender.subscribe_delegate(diagnostics.chain(), levels::WEB_SOCKET));

        Self {
            manager,
            engine,
            diagnostics,
            _engine_diagnostics: engine_diagnostics,
            options,
        }
    }

    /// Returns the options in effect.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionsOptions {
        &self.options
    }

    /// Returns the diagnostic sender.
    #[inline]
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsSender {
        &self.diagnostics
    }

    /// Returns the number of resource requests waiting for an outcome.
    #[inline]
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.manager.pending_count()
    }

    /// Subscribes to diagnostics published by this instance.
    pub fn subscribe_to_diagnostics(
        &self,
        delegate: DiagnosticDelegate,
        min_level: usize,
    ) -> Subscription {
        self.diagnostics.subscribe_delegate(delegate, min_level)
    }

    /// Forwards this instance's diagnostics into `parent` at the configured
    /// threshold, for as long as `parent` lives.
    pub fn chain_diagnostics(&self, parent: &DiagnosticsSender) {
        self.diagnostics
            .subscribe_delegate(parent.chain(), self.options.connections_diagnostic_level)
            .detach();
    }

    /// Issues a resource request.
    pub fn submit_resource_request(&self, request: ResourceRequest) -> ResourceRequestTransaction {
        self.manager.submit(request)
    }

    /// Starts a WebSocket connection attempt.
    pub fn submit_websocket_request(&self, uri: &str) -> WebSocketRequestTransaction {
        self.diagnostics
            .send(WEB_SOCKET_REQUEST_LEVEL, format!("WebSocket request for {uri}"));

        let parent = self.diagnostics.clone();
        let level = self.options.web_socket_diagnostic_level;
        let attempt = connect_web_socket_with(
            Arc::clone(self.manager.transport()),
            Arc::clone(&self.engine),
            uri,
            self.diagnostics.clone(),
            &self.options,
            move |socket| {
                let connection = WebSocketConnection::new(socket);
                connection
                    .diagnostics()
                    .subscribe_delegate(parent.chain(), level)
                    .detach();
                connection
            },
        );

        WebSocketRequestTransaction {
            web_socket: attempt.connection,
            cancel: attempt.abort,
        }
    }
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connections")
            .field("pending_requests", &self.pending_requests())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
