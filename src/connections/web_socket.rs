//! Established WebSocket connection with buffered text delivery.
//!
//! Text messages that arrive before a handler is registered are buffered in
//! arrival order. Registering a handler replays the buffer into it before
//! returning; from then on messages go straight to the handler. No message
//! is delivered twice or dropped across that switch.
//!
//! Handlers are always invoked with the internal lock released, so a
//! handler may call back into its connection (send, close, register
//! another handler). While a replay is running, newly arriving text is
//! queued behind it, and a handler registered from inside the replay only
//! takes over once the batch being replayed has been delivered.
//!
//! The underlying socket's diagnostics are republished through the
//! connection's sender as `WebSocketAdapter/<socket>`.
//!
//! Binary and close frames are passed to their handlers if registered and
//! dropped otherwise. Pings and pongs are only traced.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::diagnostics::{DiagnosticDelegate, DiagnosticsSender, Subscription, levels};
use crate::transport::{Delegates, WebSocket};

// ============================================================================
// Types
// ============================================================================

/// Receives text messages.
pub type TextHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Receives binary messages.
pub type BinaryHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Receives the close code and reason.
pub type CloseHandler = Arc<dyn Fn(u16, String) + Send + Sync>;

/// Level at which received text messages are logged.
const RECEIVED_TEXT_LEVEL: usize = 3;

/// Component name of the connection's diagnostics.
const COMPONENT: &str = "WebSocketAdapter";

#[derive(Default)]
struct BufferState {
    /// Text not yet handed to a handler, in arrival order.
    buffered: VecDeque<String>,
    /// Handler for direct delivery. Only set while no replay is running.
    on_text: Option<TextHandler>,
    /// A replay is delivering the buffer.
    replaying: bool,
    /// Latest handler registered while a replay was running.
    replacement: Option<TextHandler>,
    on_binary: Option<BinaryHandler>,
    on_close: Option<CloseHandler>,
}

struct ConnectionInner {
    adaptee: Arc<dyn WebSocket>,
    diagnostics: DiagnosticsSender,
    state: Mutex<BufferState>,
}

// ============================================================================
// WebSocketConnection
// ============================================================================

/// An established WebSocket as handed to the caller.
///
/// Cloning yields another handle to the same connection. The underlying
/// socket is released when the last handle drops.
#[derive(Clone)]
pub struct WebSocketConnection {
    inner: Arc<ConnectionInner>,
}

impl WebSocketConnection {
    /// Takes ownership of an engaged socket and installs its delegates.
    #[must_use]
    pub fn new(adaptee: Arc<dyn WebSocket>) -> Self {
        let inner = Arc::new(ConnectionInner {
            adaptee,
            diagnostics: DiagnosticsSender::new(COMPONENT),
            state: Mutex::new(BufferState::default()),
        });

        if let Some(socket_diagnostics) = inner.adaptee.diagnostics() {
            socket_diagnostics
                .subscribe_delegate(inner.diagnostics.chain(), levels::WEB_SOCKET)
                .detach();
        }
        inner.adaptee.set_delegates(Self::delegates(Arc::downgrade(&inner)));
        Self { inner }
    }

    fn delegates(inner: Weak<ConnectionInner>) -> Delegates {
        let text = inner.clone();
        let binary = inner.clone();
        let close = inner;

        Delegates::new()
            .on_ping(|data| trace!(len = data.len(), "Ping received"))
            .on_pong(|data| trace!(len = data.len(), "Pong received"))
            .on_text(move |message| {
                if let Some(inner) = text.upgrade() {
                    inner.receive_text(message);
                }
            })
            .on_binary(move |data| {
                if let Some(inner) = binary.upgrade() {
                    inner.receive_binary(data);
                }
            })
            .on_close(move |code, reason| {
                if let Some(inner) = close.upgrade() {
                    inner.receive_close(code, reason);
                }
            })
    }

    /// Sends a text message.
    pub fn send_text(&self, text: impl Into<String>) {
        self.inner.adaptee.send_text(text.into());
    }

    /// Sends a binary message.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.inner.adaptee.send_binary(data.into());
    }

    /// Starts the closing handshake with `code`.
    pub fn close(&self, code: u16) {
        self.inner.adaptee.close(code, "");
    }

    /// Registers the text handler, first replaying anything buffered.
    ///
    /// Buffered messages are delivered to `handler` in arrival order before
    /// this returns. If a replay is already running (`handler` is being
    /// registered from inside another handler, or from another thread), the
    /// registration is handed to that replay: it finishes its current batch
    /// with the old handler and delivers everything after it to `handler`.
    pub fn register_text_handler<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let mut handler: TextHandler = Arc::new(handler);

        let mut state = self.inner.state.lock();
        if state.replaying {
            state.replacement = Some(handler);
            return;
        }
        if state.buffered.is_empty() {
            state.on_text = Some(handler);
            return;
        }

        state.replaying = true;
        state.on_text = None;
        loop {
            if let Some(replacement) = state.replacement.take() {
                handler = replacement;
            }
            if state.buffered.is_empty() {
                state.replaying = false;
                state.on_text = Some(handler);
                return;
            }

            // Messages arriving during the replay are queued behind the
            // batch and picked up by the next iteration.
            let batch = mem::take(&mut state.buffered);
            drop(state);

            trace!(count = batch.len(), "Replaying buffered text messages");
            for message in batch {
                handler(message);
            }

            state = self.inner.state.lock();
        }
    }

    /// Registers the binary handler.
    pub fn register_binary_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.inner.state.lock().on_binary = Some(Arc::new(handler));
    }

    /// Registers the close handler.
    pub fn register_close_handler<F>(&self, handler: F)
    where
        F: Fn(u16, String) + Send + Sync + 'static,
    {
        self.inner.state.lock().on_close = Some(Arc::new(handler));
    }

    /// Returns the number of buffered text messages.
    #[inline]
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.inner.state.lock().buffered.len()
    }

    /// Returns this connection's diagnostic sender.
    #[inline]
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsSender {
        &self.inner.diagnostics
    }

    /// Subscribes to this connection's diagnostics.
    pub fn subscribe_to_diagnostics(
        &self,
        delegate: DiagnosticDelegate,
        min_level: usize,
    ) -> Subscription {
        self.inner.diagnostics.subscribe_delegate(delegate, min_level)
    }
}

impl fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("buffered", &self.buffered_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionInner {
    fn receive_text(&self, message: String) {
        self.diagnostics.send(
            RECEIVED_TEXT_LEVEL,
            format!("Received Text Message: {message}"),
        );

        let handler = {
            let mut state = self.state.lock();
            match state.on_text.clone() {
                Some(handler) if !state.replaying => handler,
                _ => {
                    state.buffered.push_back(message);
                    return;
                }
            }
        };
        handler(message);
    }

    fn receive_binary(&self, data: Vec<u8>) {
        let handler = self.state.lock().on_binary.clone();
        match handler {
            Some(handler) => handler(data),
            None => trace!(len = data.len(), "Binary message dropped, no handler"),
        }
    }

    fn receive_close(&self, code: u16, reason: String) {
        trace!(code, %reason, "Close received");
        let handler = self.state.lock().on_close.clone();
        if let Some(handler) = handler {
            handler(code, reason);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
