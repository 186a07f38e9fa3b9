//! Resource request manager.
//!
//! Tracks in-flight resource requests in a table keyed by
//! [`TransactionId`]. Each request can end in one of two ways: the
//! transport's completion hook fires, or the caller cancels. Whichever
//! removes the table entry first resolves the request; the other finds the
//! entry gone and does nothing.
//!
//! # Table Lifecycle
//!
//! ```text
//! submit ──► [id → {transaction, promise}] ──┬─ completion hook ─► response
//!                                            └─ cancel ─────────► 499
//! ```
//!
//! The table lock is never held while calling into the transport, emitting
//! diagnostics, or fulfilling a result.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::diagnostics::{DiagnosticsSender, levels};
use crate::error::{Error, Result};
use crate::identifiers::TransactionId;
use crate::sync::{CancelHandle, Deferred, Promise, deferred};
use crate::transport::http::find_header;
use crate::transport::{Address, Header, HttpRequest, HttpResponse, Transaction, Transport};

// ============================================================================
// ResourceRequest
// ============================================================================

/// A request submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Method, e.g. `GET`.
    pub method: String,
    /// Absolute target URI.
    pub uri: String,
    /// Header lines in order.
    pub headers: Vec<Header>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl ResourceRequest {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Creates a `GET` request.
    #[inline]
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    /// Creates a `POST` request.
    #[inline]
    #[must_use]
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new("POST", uri)
    }

    /// Appends a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

// ============================================================================
// Response
// ============================================================================

/// Outcome of a resource request.
///
/// Failures are reported as synthetic responses rather than errors; see
/// the associated status constants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Header lines in order.
    pub headers: Vec<Header>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl Response {
    /// Transport failed before a response arrived.
    pub const NO_RESPONSE: u16 = 0;

    /// Target could not be parsed.
    pub const BAD_REQUEST: u16 = 400;

    /// Caller canceled the request.
    pub const CLIENT_CLOSED_REQUEST: u16 = 499;

    /// Creates a response with a status and nothing else.
    #[inline]
    #[must_use]
    pub fn synthetic(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// The response a canceled request resolves with.
    #[inline]
    #[must_use]
    pub fn canceled() -> Self {
        Self::synthetic(Self::CLIENT_CLOSED_REQUEST)
    }

    /// Returns `true` for 2xx statuses.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns `true` if the request was canceled.
    #[inline]
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.status == Self::CLIENT_CLOSED_REQUEST
    }

    /// Returns the first header with the given name.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// [`Error::Json`](crate::Error::Json) if the body does not parse as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl From<HttpResponse> for Response {
    fn from(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

// ============================================================================
// ResourceRequestTransaction
// ============================================================================

/// Handle returned for a submitted request.
#[derive(Debug)]
pub struct ResourceRequestTransaction {
    /// Resolves exactly once with the response.
    pub response: Deferred<Response>,
    /// Cancels the request; the response then resolves with status 499.
    pub cancel: CancelHandle,
}

// ============================================================================
// Pending table
// ============================================================================

/// A request waiting for its outcome.
struct PendingTransaction {
    transaction: Arc<dyn Transaction>,
    response: Promise<Response>,
}

struct PendingTable {
    next_id: TransactionId,
    entries: FxHashMap<TransactionId, PendingTransaction>,
}

/// State shared between the manager, completion hooks and cancel handles.
struct ManagerShared {
    transport: Arc<dyn Transport>,
    pending: Mutex<PendingTable>,
    diagnostics: DiagnosticsSender,
    user_agent: Option<String>,
}

// ============================================================================
// ResourceRequestManager
// ============================================================================

/// Issues resource requests and resolves each exactly once.
///
/// Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct ResourceRequestManager {
    shared: Arc<ManagerShared>,
}

impl ResourceRequestManager {
    /// Creates a manager on top of `transport`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        diagnostics: DiagnosticsSender,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                transport,
                pending: Mutex::new(PendingTable {
                    next_id: TransactionId::FIRST,
                    entries: FxHashMap::default(),
                }),
                diagnostics,
                user_agent,
            }),
        }
    }

    /// Returns the transport requests are issued on.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Returns the number of requests still waiting for an outcome.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().entries.len()
    }

    /// Issues a request.
    ///
    /// The returned response resolves when the transport completes the
    /// request or when the caller cancels it, whichever happens first.
    /// A target that does not parse resolves immediately with status 400.
    pub fn submit(&self, request: ResourceRequest) -> ResourceRequestTransaction {
        let shared = &self.shared;
        let ResourceRequest {
            method,
            uri,
            headers,
            body,
        } = request;

        shared
            .diagnostics
            .send(0, format!("{method} request for {uri}"));

        let mut target = match Address::parse(&uri) {
            Ok(target) => target,
            Err(e) => {
                shared.diagnostics.send(e.diagnostic_level(), e.to_string());
                return ResourceRequestTransaction {
                    response: Deferred::ready(Response::synthetic(Response::BAD_REQUEST)),
                    cancel: CancelHandle::noop(),
                };
            }
        };
        target.apply_secure_default_port();

        let mut http_request = HttpRequest::new(method, target);
        http_request.headers = headers;
        http_request.body = body;
        if let Some(user_agent) = &shared.user_agent
            && http_request.header("User-Agent").is_none()
        {
            http_request.set_header("User-Agent", user_agent.clone());
        }

        let id = shared.pending.lock().next_id.take_next();
        let transaction = shared.transport.issue_request(http_request, None);

        let (promise, response) = deferred();
        {
            let mut pending = shared.pending.lock();
            let previous = pending.entries.insert(
                id,
                PendingTransaction {
                    transaction: Arc::clone(&transaction),
                    response: promise,
                },
            );
            debug_assert!(previous.is_none(), "transaction id {id} reused");
            trace!(%id, pending = pending.entries.len(), "Transaction registered");
        }

        // Installed after the entry exists; a transport that already
        // finished runs the hook right here.
        let weak = Arc::downgrade(shared);
        transaction.set_completion_hook(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.complete(id);
            }
        }));

        ResourceRequestTransaction {
            response,
            cancel: Self::cancel_handle(Arc::downgrade(shared), id),
        }
    }

    fn cancel_handle(shared: Weak<ManagerShared>, id: TransactionId) -> CancelHandle {
        CancelHandle::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.cancel(id);
            }
        })
    }
}

impl fmt::Debug for ResourceRequestManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRequestManager")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ManagerShared {
    /// Completion hook body. No-op if the request was canceled first.
    fn complete(&self, id: TransactionId) {
        let Some(entry) = self.pending.lock().entries.remove(&id) else {
            trace!(%id, "Completion after cancel ignored");
            return;
        };

        let response = self.translate(entry.transaction.as_ref());
        entry.response.fulfill(response);
    }

    /// Cancel handle body. No-op if the request already completed.
    fn cancel(&self, id: TransactionId) {
        let Some(entry) = self.pending.lock().entries.remove(&id) else {
            trace!(%id, "Cancel after completion ignored");
            return;
        };

        entry.response.fulfill(Response::canceled());
        entry.transaction.cancel();

        let canceled = Error::Canceled;
        self.diagnostics
            .send(canceled.diagnostic_level(), canceled.to_string());
        trace!(%id, "Transaction canceled");
    }

    /// Converts a finished transaction into the caller's response.
    fn translate(&self, transaction: &dyn Transaction) -> Response {
        if let Some(failure) = transaction.state().failure() {
            self.diagnostics
                .send(failure.diagnostic_level(), failure.to_string());
            return Response::synthetic(Response::NO_RESPONSE);
        }

        let response = transaction.response();
        self.report(&response);
        Response::from(response)
    }

    fn report(&self, response: &HttpResponse) {
        let diagnostics = &self.diagnostics;
        diagnostics.send(
            0,
            format!("Response: {} {}", response.status, response.reason),
        );
        diagnostics.send(0, "Headers: -----------------------");
        for header in &response.headers {
            diagnostics.send(0, format!("{}: {}", header.name, header.value));
        }
        diagnostics.send(0, "Body: --------------------------");
        if !response.body.is_empty() {
            diagnostics.send(0, String::from_utf8_lossy(&response.body));
        }
        diagnostics.send(0, "--------------------------------");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use crate::transport::TransactionState;
    use crate::transport::mock::MockTransport;

    fn manager(transport: &Arc<MockTransport>) -> ResourceRequestManager {
        ResourceRequestManager::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            DiagnosticsSender::new("Connections"),
            None,
        )
    }

    fn pong() -> HttpResponse {
        HttpResponse::new(200, "OK")
            .with_header("Content-Type", "text/plain")
            .with_body("pong")
    }

    #[test]
    fn test_completed_request_resolves_with_response() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let handle = manager.submit(ResourceRequest::get("https://api.example.com/v1/ping"));
        assert_eq!(manager.pending_count(), 1);

        let issued = transport.issued();
        assert_eq!(issued.len(), 1);
        issued[0].complete(TransactionState::Completed, pong());

        let response = handle.response.wait().expect("response");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"pong");
        assert_eq!(response.text(), "pong");
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_cancel_before_completion_resolves_499() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let handle = manager.submit(ResourceRequest::get("https://api.example.com/v1/ping"));
        handle.cancel.cancel();

        let issued = transport.issued();
        assert!(issued[0].was_canceled());

        // Late completion has no observable effect.
        issued[0].complete(TransactionState::Completed, pong());

        let response = handle.response.wait().expect("response");
        assert_eq!(response.status, 499);
        assert!(response.is_canceled());
        assert!(response.body.is_empty());
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let handle = manager.submit(ResourceRequest::get("https://api.example.com/v1/ping"));
        transport.issued()[0].complete(TransactionState::Completed, pong());
        handle.cancel.cancel();
        handle.cancel.cancel();

        let response = handle.response.wait().expect("response");
        assert_eq!(response.status, 200);
        assert!(!transport.issued()[0].was_canceled());
    }

    #[test]
    fn test_transport_failures_resolve_with_status_zero() {
        for state in [
            TransactionState::UnableToConnect,
            TransactionState::Broken,
            TransactionState::Timeout,
        ] {
            let transport = MockTransport::new();
            let manager = manager(&transport);

            let messages = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&messages);
            let _subscription = manager.shared.diagnostics.subscribe(
                move |_, level, message| sink.lock().push((level, message.to_string())),
                levels::WARNING,
            );

            let handle = manager.submit(ResourceRequest::get("http://api.example.com/"));
            transport.issued()[0].complete(state, HttpResponse::default());

            let response = handle.response.wait().expect("response");
            assert_eq!(response.status, Response::NO_RESPONSE);

            let expected = state.failure().map(|e| e.to_string());
            assert_eq!(
                messages.lock().last().map(|(_, m)| m.clone()),
                expected,
                "diagnostic for {state:?}"
            );
        }
    }

    #[test]
    fn test_unparseable_target_resolves_400_without_transport() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let handle = manager.submit(ResourceRequest::get("::not a uri::"));

        assert!(handle.response.is_ready());
        assert_eq!(handle.response.wait().expect("response").status, 400);
        assert!(transport.issued().is_empty());
        assert_eq!(manager.pending_count(), 0);
        handle.cancel.cancel();
    }

    #[test]
    fn test_secure_target_gets_default_port() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let _handle = manager.submit(ResourceRequest::get("https://api.example.com/v1/ping"));

        let request = transport.issued()[0].request().clone();
        assert_eq!(request.target.port(), Some(443));
        assert_eq!(request.method, "GET");
    }

    #[test]
    fn test_user_agent_added_unless_present() {
        let transport = MockTransport::new();
        let manager = ResourceRequestManager::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            DiagnosticsSender::new("Connections"),
            Some("DiscordBot".to_string()),
        );

        let _a = manager.submit(ResourceRequest::get("https://discord.com/api/gateway"));
        let _b = manager.submit(
            ResourceRequest::post("https://discord.com/api/channels")
                .with_header("user-agent", "Custom")
                .with_body("{}"),
        );

        let issued = transport.issued();
        assert_eq!(issued[0].request().header("User-Agent"), Some("DiscordBot"));
        assert_eq!(issued[1].request().header("User-Agent"), Some("Custom"));
        assert_eq!(issued[1].request().body, b"{}");
    }

    #[test]
    fn test_ids_are_unique_and_independent() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let first = manager.submit(ResourceRequest::get("http://example.com/1"));
        let second = manager.submit(ResourceRequest::get("http://example.com/2"));
        assert_eq!(manager.pending_count(), 2);

        first.cancel.cancel();
        transport.issued()[1].complete(TransactionState::Completed, pong());

        assert!(first.response.wait().expect("first").is_canceled());
        assert_eq!(second.response.wait().expect("second").status, 200);
    }

    #[test]
    fn test_response_diagnostics() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let _subscription = manager.shared.diagnostics.subscribe(
            move |_, _, message| sink.lock().push(message.to_string()),
            0,
        );

        let handle = manager.submit(ResourceRequest::get("https://api.example.com/v1/ping"));
        transport.issued()[0].complete(TransactionState::Completed, pong());
        let _ = handle.response.wait();

        let messages = messages.lock();
        assert_eq!(messages[0], "GET request for https://api.example.com/v1/ping");
        assert!(messages.contains(&"Response: 200 OK".to_string()));
        assert!(messages.contains(&"Content-Type: text/plain".to_string()));
        assert!(messages.contains(&"pong".to_string()));
    }

    #[test]
    fn test_json_body() {
        let response = Response::from(HttpResponse::new(200, "OK").with_body(r#"{"url":"wss://x"}"#));
        let value: serde_json::Value = response.json().expect("json");
        assert_eq!(value["url"], "wss://x");

        let invalid = Response::synthetic(200);
        assert!(matches!(invalid.json::<serde_json::Value>(), Err(Error::Json(_))));
    }

    #[test]
    fn test_dropped_manager_is_harmless() {
        let transport = MockTransport::new();
        let handle = manager(&transport).submit(ResourceRequest::get("http://example.com/"));

        // Pending promise dropped with the table.
        assert!(matches!(handle.response.wait(), Err(Error::ChannelClosed)));

        transport.issued()[0].complete(TransactionState::Completed, pong());
        handle.cancel.cancel();
    }

    #[test]
    fn test_cancel_races_completion() {
        for _ in 0..200 {
            let transport = MockTransport::new();
            let manager = manager(&transport);
            let handle = manager.submit(ResourceRequest::get("http://example.com/race"));
            let transaction = transport.issued().remove(0);

            let barrier = Arc::new(Barrier::new(2));
            let cancel = handle.cancel.clone();
            let cancel_barrier = Arc::clone(&barrier);
            let canceler = thread::spawn(move || {
                cancel_barrier.wait();
                cancel.cancel();
            });
            let completer = thread::spawn(move || {
                barrier.wait();
                transaction.complete(TransactionState::Completed, pong());
            });

            canceler.join().expect("canceler");
            completer.join().expect("completer");

            let mut response = handle.response;
            let status = response
                .wait_timeout(Duration::from_secs(5))
                .expect("resolved once")
                .expect("in time")
                .status;
            assert!(status == 200 || status == 499, "unexpected status {status}");
            assert_eq!(manager.pending_count(), 0);
        }
    }
}
