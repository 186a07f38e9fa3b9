//! WebSocket engine on tokio-tungstenite.
//!
//! The transport owns the HTTP exchange; this engine only contributes the
//! upgrade headers, verifies the `101 Switching Protocols` answer, and then
//! runs the WebSocket framing on the stream the transport hands over.
//!
//! # Event Loop
//!
//! Each engaged socket spawns one task on the configured runtime that
//! handles:
//!
//! - Outgoing messages and close requests from [`TungsteniteSocket`]
//! - Incoming frames, routed to the installed [`Delegates`]
//!
//! Inbound frames are not read until delegates are installed, so nothing the
//! server sends right after the handshake is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tracing::{debug, trace, warn};

use crate::diagnostics::{DiagnosticsSender, levels};
use crate::error::{Error, Result};

use super::{
    ClientHandshake, Delegates, HttpRequest, HttpResponse, Upgraded, WebSocket, WebSocketEngine,
};

// ============================================================================
// Constants
// ============================================================================

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// WebSocket protocol version sent in the upgrade request.
const WEB_SOCKET_VERSION: &str = "13";

/// Component name of the engine's and each socket's diagnostics.
const COMPONENT: &str = "WebSocket";

// ============================================================================
// TungsteniteEngine
// ============================================================================

/// [`WebSocketEngine`] that frames messages with tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct TungsteniteEngine {
    /// Runtime the per-socket event loops are spawned on.
    runtime: Handle,
    /// Framing limits, or tungstenite's defaults.
    config: Option<WebSocketConfig>,
    /// Handshake diagnostics.
    diagnostics: DiagnosticsSender,
}

impl TungsteniteEngine {
    /// Creates an engine spawning its event loops on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            config: None,
            diagnostics: DiagnosticsSender::new(COMPONENT),
        }
    }

    /// Creates an engine on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if called outside a tokio runtime.
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("no tokio runtime available: {e}")))?;
        Ok(Self::new(runtime))
    }

    /// Sets framing limits.
    #[must_use]
    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl WebSocketEngine for TungsteniteEngine {
    fn start_open_as_client(&self, request: &mut HttpRequest) -> Box<dyn ClientHandshake> {
        let key = generate_key();

        request.set_header("Connection", "Upgrade");
        request.set_header("Upgrade", "websocket");
        request.set_header("Sec-WebSocket-Version", WEB_SOCKET_VERSION);
        request.set_header("Sec-WebSocket-Key", key.clone());

        trace!(target = %request.target, "Upgrade headers added");

        Box::new(PendingHandshake {
            key,
            runtime: self.runtime.clone(),
            config: self.config.clone(),
            diagnostics: self.diagnostics.clone(),
        })
    }

    fn diagnostics(&self) -> Option<&DiagnosticsSender> {
        Some(&self.diagnostics)
    }
}

// ============================================================================
// PendingHandshake
// ============================================================================

/// Client handshake waiting for the server's answer.
struct PendingHandshake {
    key: String,
    runtime: Handle,
    config: Option<WebSocketConfig>,
    diagnostics: DiagnosticsSender,
}

impl ClientHandshake for PendingHandshake {
    fn finish_open_as_client(
        self: Box<Self>,
        upgraded: Upgraded,
        response: &HttpResponse,
    ) -> Option<Arc<dyn WebSocket>> {
        let Self {
            key,
            runtime,
            config,
            diagnostics,
        } = *self;

        if let Err(reason) = verify_upgrade(&key, response) {
            diagnostics.send(levels::WARNING, reason);
            return None;
        }

        let socket = TungsteniteSocket::spawn(
            &runtime,
            upgraded,
            config,
            DiagnosticsSender::new(COMPONENT),
        );
        Some(Arc::new(socket))
    }
}

/// Checks that `response` completes the opening handshake for `key`.
fn verify_upgrade(key: &str, response: &HttpResponse) -> std::result::Result<(), String> {
    if response.status != 101 {
        return Err(format!("expected status 101, got {}", response.status));
    }

    let upgrade = response.header("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(format!("unexpected Upgrade header \"{upgrade}\""));
    }

    let connection = response.header("Connection").unwrap_or_default();
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(format!("unexpected Connection header \"{connection}\""));
    }

    let expected = derive_accept_key(key.as_bytes());
    match response.header("Sec-WebSocket-Accept") {
        Some(accept) if accept.trim() == expected => Ok(()),
        Some(accept) => Err(format!("Sec-WebSocket-Accept mismatch: \"{accept}\"")),
        None => Err("missing Sec-WebSocket-Accept header".to_string()),
    }
}

// ============================================================================
// SocketCommand
// ============================================================================

/// Internal commands for the event loop.
enum SocketCommand {
    /// Send a data frame.
    Send(Message),
    /// Send a close frame.
    Close { code: u16, reason: String },
}

// ============================================================================
// TungsteniteSocket
// ============================================================================

/// An engaged WebSocket backed by a tokio task.
///
/// Dropping the last handle closes the connection.
pub struct TungsteniteSocket {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    /// Delegates (shared with event loop).
    delegates: Arc<Mutex<Option<Arc<Delegates>>>>,
    /// Signals the event loop to start reading.
    start_reading: Arc<Notify>,
    /// Per-socket diagnostics.
    diagnostics: DiagnosticsSender,
}

impl TungsteniteSocket {
    /// Spawns the event loop for an upgraded stream.
    fn spawn(
        runtime: &Handle,
        upgraded: Upgraded,
        config: Option<WebSocketConfig>,
        diagnostics: DiagnosticsSender,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let delegates: Arc<Mutex<Option<Arc<Delegates>>>> = Arc::new(Mutex::new(None));
        let start_reading = Arc::new(Notify::new());

        runtime.spawn(Self::run_event_loop(
            upgraded,
            config,
            command_rx,
            Arc::clone(&delegates),
            Arc::clone(&start_reading),
            diagnostics.clone(),
        ));

        Self {
            command_tx,
            delegates,
            start_reading,
            diagnostics,
        }
    }

    fn command(&self, command: SocketCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("WebSocket event loop already terminated");
        }
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        upgraded: Upgraded,
        config: Option<WebSocketConfig>,
        mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
        delegates: Arc<Mutex<Option<Arc<Delegates>>>>,
        start_reading: Arc<Notify>,
        diagnostics: DiagnosticsSender,
    ) {
        let Upgraded {
            connection,
            trailer,
        } = upgraded;
        let ws_stream =
            WebSocketStream::from_partially_read(connection, trailer, Role::Client, config).await;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let mut reading = delegates.lock().is_some();

        loop {
            tokio::select! {
                () = start_reading.notified(), if !reading => {
                    reading = true;
                    trace!("Delegates installed, reading frames");
                }

                // Incoming frames from the server
                message = ws_read.next(), if reading => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            dispatch(&delegates, |d| {
                                if let Some(on_text) = &d.text {
                                    on_text(text.as_str().to_owned());
                                }
                            });
                        }

                        Some(Ok(Message::Binary(data))) => {
                            dispatch(&delegates, |d| {
                                if let Some(on_binary) = &d.binary {
                                    on_binary(data.to_vec());
                                }
                            });
                        }

                        Some(Ok(Message::Ping(data))) => {
                            dispatch(&delegates, |d| {
                                if let Some(on_ping) = &d.ping {
                                    on_ping(data.to_vec());
                                }
                            });
                        }

                        Some(Ok(Message::Pong(data))) => {
                            dispatch(&delegates, |d| {
                                if let Some(on_pong) = &d.pong {
                                    on_pong(data.to_vec());
                                }
                            });
                        }

                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map_or(
                                (u16::from(CloseCode::Status), String::new()),
                                |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                            );
                            debug!(code, "WebSocket closed by remote");
                            // Flushes tungstenite's queued close reply.
                            let _ = ws_write.close().await;
                            dispatch(&delegates, |d| {
                                if let Some(on_close) = &d.close {
                                    on_close(code, reason.clone());
                                }
                            });
                            break;
                        }

                        Some(Ok(Message::Frame(_))) => {}

                        Some(Err(e)) => {
                            diagnostics.send(levels::WARNING, format!("WebSocket error: {e}"));
                            dispatch(&delegates, |d| {
                                if let Some(on_close) = &d.close {
                                    on_close(ABNORMAL_CLOSURE, e.to_string());
                                }
                            });
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            dispatch(&delegates, |d| {
                                if let Some(on_close) = &d.close {
                                    on_close(ABNORMAL_CLOSURE, String::new());
                                }
                            });
                            break;
                        }
                    }
                }

                // Commands from the socket handle
                command = command_rx.recv() => {
                    match command {
                        Some(SocketCommand::Send(message)) => {
                            if let Err(e) = ws_write.send(message).await {
                                warn!(error = %e, "Failed to send WebSocket message");
                                diagnostics
                                    .send(levels::WARNING, format!("WebSocket send failed: {e}"));
                            }
                        }

                        Some(SocketCommand::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
                                warn!(error = %e, "Failed to send close frame");
                            }
                            // Keep reading until the peer answers the close.
                        }

                        None => {
                            debug!("WebSocket handle dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("WebSocket event loop terminated");
    }
}

impl WebSocket for TungsteniteSocket {
    fn send_text(&self, text: String) {
        self.command(SocketCommand::Send(Message::text(text)));
    }

    fn send_binary(&self, data: Vec<u8>) {
        self.command(SocketCommand::Send(Message::binary(data)));
    }

    fn close(&self, code: u16, reason: &str) {
        self.command(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn set_delegates(&self, delegates: Delegates) {
        *self.delegates.lock() = Some(Arc::new(delegates));
        self.start_reading.notify_one();
    }

    fn diagnostics(&self) -> Option<&DiagnosticsSender> {
        Some(&self.diagnostics)
    }
}

/// Runs `f` on the current delegates without holding the lock.
fn dispatch(delegates: &Mutex<Option<Arc<Delegates>>>, f: impl FnOnce(&Delegates)) {
    let current = delegates.lock().clone();
    if let Some(current) = current {
        f(&current);
    }
}

// ============================================================================
// Tests
// ============================================================================
