//! WebSocket connection establishment.
//!
//! One attempt runs on its own worker thread:
//!
//! ```text
//! Idle ──► Connecting ──┬─► Established
//!   │                   ├─► Failed
//!   └─► Failed          └─► Aborted
//! ```
//!
//! The worker issues the upgrade request and then blocks on the attempt's
//! [`AttemptContext`] until either the transport signals completion or the
//! caller aborts. The first signal wins; a later one is ignored.
//!
//! Every terminal state publishes exactly one diagnostic and resolves the
//! caller's [`Deferred`] exactly once, with `None` for anything but
//! `Established`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::diagnostics::{DiagnosticsSender, levels};
use crate::error::{Error, Result};
use crate::sync::{CancelHandle, Deferred, deferred};
use crate::transport::{
    Address, HttpRequest, HttpResponse, Transaction, Transport, UpgradeHook, Upgraded, WebSocket,
    WebSocketEngine,
};

use super::options::ConnectionsOptions;

// ============================================================================
// Constants
// ============================================================================

/// Close code for a socket engaged by an attempt that was aborted.
pub const GOING_AWAY: u16 = 1001;

/// Name of the per-attempt worker thread.
const WORKER_THREAD_NAME: &str = "ws-connect";

// ============================================================================
// ConnectAttempt
// ============================================================================

/// Handle returned for a connection attempt.
pub struct ConnectAttempt<T> {
    /// Resolves once with the connection, or `None` if the attempt failed
    /// or was aborted.
    pub connection: Deferred<Option<T>>,
    /// Aborts the attempt if it has not completed yet.
    pub abort: CancelHandle,
}

impl<T> fmt::Debug for ConnectAttempt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectAttempt")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AttemptContext
// ============================================================================

/// What released the worker's wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptSignal {
    Completed,
    Aborted,
}

#[derive(Default)]
struct AttemptState {
    /// First signal received; later ones are dropped.
    signal: Option<AttemptSignal>,
    /// Socket engaged by the upgrade hook, not yet claimed by the worker.
    engaged: Option<Arc<dyn WebSocket>>,
}

/// State shared by the worker, the transport hooks and the abort handle.
#[derive(Default)]
struct AttemptContext {
    state: Mutex<AttemptState>,
    wake: Condvar,
}

impl AttemptContext {
    /// Records `signal` unless another one arrived first. Returns `true` if
    /// this call decided the outcome.
    fn signal(&self, signal: AttemptSignal) -> bool {
        let mut state = self.state.lock();
        if state.signal.is_some() {
            return false;
        }
        state.signal = Some(signal);
        self.wake.notify_all();
        true
    }

    /// Hands an engaged socket to the worker. Gives it back if the attempt
    /// was already aborted.
    fn engage(&self, socket: Arc<dyn WebSocket>) -> Option<Arc<dyn WebSocket>> {
        let mut state = self.state.lock();
        if state.signal == Some(AttemptSignal::Aborted) {
            return Some(socket);
        }
        state.engaged = Some(socket);
        None
    }

    fn take_engaged(&self) -> Option<Arc<dyn WebSocket>> {
        self.state.lock().engaged.take()
    }

    /// Blocks until a signal arrives, re-checking every `poll_interval`.
    fn wait(&self, poll_interval: Duration) -> AttemptSignal {
        let mut state = self.state.lock();
        loop {
            if let Some(signal) = state.signal {
                return signal;
            }
            let _ = self.wake.wait_for(&mut state, poll_interval);
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Starts a connection attempt and returns immediately.
///
/// The upgrade request is issued on `transport`; `engine` adds the
/// handshake headers and engages the socket on a `101` answer.
pub fn connect_web_socket(
    transport: Arc<dyn Transport>,
    engine: Arc<dyn WebSocketEngine>,
    uri: &str,
    diagnostics: DiagnosticsSender,
    options: &ConnectionsOptions,
) -> ConnectAttempt<Arc<dyn WebSocket>> {
    connect_web_socket_with(transport, engine, uri, diagnostics, options, |socket| socket)
}

/// Like [`connect_web_socket`], but converts the engaged socket with
/// `establish` on the worker before resolving.
pub(crate) fn connect_web_socket_with<T, F>(
    transport: Arc<dyn Transport>,
    engine: Arc<dyn WebSocketEngine>,
    uri: &str,
    diagnostics: DiagnosticsSender,
    options: &ConnectionsOptions,
    establish: F,
) -> ConnectAttempt<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn WebSocket>) -> T + Send + 'static,
{
    let context = Arc::new(AttemptContext::default());
    let (promise, connection) = deferred();

    let worker = Orchestrator {
        transport,
        engine,
        uri: uri.to_string(),
        diagnostics: diagnostics.clone(),
        context: Arc::clone(&context),
        poll_interval: options.connect_poll_interval(),
        cancel_on_abort: options.cancel_on_abort,
    };

    let spawned = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let outcome = worker.run().map(establish);
            promise.fulfill(outcome);
        });

    if let Err(e) = spawned {
        let e = Error::from(e);
        diagnostics.send(e.diagnostic_level(), e.to_string());
        return ConnectAttempt {
            connection: Deferred::ready(None),
            abort: CancelHandle::noop(),
        };
    }

    let context = Arc::downgrade(&context);
    let abort = CancelHandle::new(move || {
        if let Some(context) = context.upgrade()
            && context.signal(AttemptSignal::Aborted)
        {
            trace!("Connection attempt abort requested");
        }
    });

    ConnectAttempt { connection, abort }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs one attempt on the worker thread.
struct Orchestrator {
    transport: Arc<dyn Transport>,
    engine: Arc<dyn WebSocketEngine>,
    uri: String,
    diagnostics: DiagnosticsSender,
    context: Arc<AttemptContext>,
    poll_interval: Duration,
    cancel_on_abort: bool,
}

impl Orchestrator {
    fn run(self) -> Option<Arc<dyn WebSocket>> {
        match self.connect() {
            Ok(socket) => {
                self.diagnostics.send(levels::INFO, "Connection established.");
                Some(socket)
            }
            Err(e) => {
                debug!(uri = %self.uri, error = %e, "Connection attempt failed");
                self.diagnostics.send(e.diagnostic_level(), e.to_string());
                None
            }
        }
    }

    fn connect(&self) -> Result<Arc<dyn WebSocket>> {
        let mut address = Address::parse(&self.uri)?;
        address.apply_secure_default_port();

        self.diagnostics.send(levels::INFO, "Connecting...");

        let mut request = HttpRequest::new("GET", address);
        let handshake = self.engine.start_open_as_client(&mut request);

        let context = Arc::downgrade(&self.context);
        let upgrade: UpgradeHook = Box::new(move |response: &HttpResponse, upgraded: Upgraded| {
            let Some(socket) = handshake.finish_open_as_client(upgraded, response) else {
                return;
            };
            let leftover = match context.upgrade() {
                Some(context) => context.engage(socket),
                None => Some(socket),
            };
            if let Some(socket) = leftover {
                socket.close(GOING_AWAY, "connection aborted");
            }
        });

        let transaction = self.transport.issue_request(request, Some(upgrade));

        let context = Arc::downgrade(&self.context);
        transaction.set_completion_hook(Box::new(move || {
            if let Some(context) = context.upgrade() {
                context.signal(AttemptSignal::Completed);
            }
        }));

        match self.context.wait(self.poll_interval) {
            AttemptSignal::Aborted => Err(self.abandon(transaction.as_ref())),
            AttemptSignal::Completed => self.finish(transaction.as_ref()),
        }
    }

    /// Maps the completed transaction to the attempt's outcome.
    fn finish(&self, transaction: &dyn Transaction) -> Result<Arc<dyn WebSocket>> {
        let engaged = self.context.take_engaged();

        if let Some(failure) = transaction.state().failure() {
            if let Some(socket) = engaged {
                socket.close(GOING_AWAY, "");
            }
            return Err(failure);
        }

        engaged.ok_or_else(|| {
            let response = transaction.response();
            Error::handshake_rejected(response.status, response.reason)
        })
    }

    /// Releases whatever the aborted attempt still holds.
    fn abandon(&self, transaction: &dyn Transaction) -> Error {
        if let Some(socket) = self.context.take_engaged() {
            socket.close(GOING_AWAY, "connection aborted");
        }
        if self.cancel_on_abort {
            transaction.cancel();
        }
        Error::Aborted
    }
}

// ============================================================================
// Tests
// ============================================================================
