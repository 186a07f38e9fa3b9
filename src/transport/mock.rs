//! In-memory transport and WebSocket engine for tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::io::duplex;

use crate::diagnostics::{DiagnosticsSender, levels};

use super::{
    ClientHandshake, CompletionHook, Delegates, HttpRequest, HttpResponse, Transaction,
    TransactionState, Transport, Upgraded, UpgradeHook, WebSocket, WebSocketEngine,
};

/// Accept value the mock engine expects in a successful upgrade.
pub(crate) const MOCK_ACCEPT: &str = "mock-accept";

// ============================================================================
// MockTransport
// ============================================================================

/// Records issued requests; tests complete them by hand.
#[derive(Default)]
pub(crate) struct MockTransport {
    issued: Mutex<Vec<Arc<MockTransaction>>>,
    issued_changed: Condvar,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn issued(&self) -> Vec<Arc<MockTransaction>> {
        self.issued.lock().clone()
    }

    /// Waits for the `n`-th (zero-based) request to be issued.
    pub(crate) fn wait_for_request(&self, n: usize, timeout: Duration) -> Option<Arc<MockTransaction>> {
        let mut issued = self.issued.lock();
        if issued.len() <= n {
            let _ = self
                .issued_changed
                .wait_while_for(&mut issued, |issued| issued.len() <= n, timeout);
        }
        issued.get(n).cloned()
    }
}

impl Transport for MockTransport {
    fn issue_request(
        &self,
        request: HttpRequest,
        upgrade: Option<UpgradeHook>,
    ) -> Arc<dyn Transaction> {
        let transaction = Arc::new(MockTransaction::new(request, upgrade));
        self.issued.lock().push(Arc::clone(&transaction));
        self.issued_changed.notify_all();
        transaction
    }
}

// ============================================================================
// MockTransaction
// ============================================================================

struct TransactionInner {
    state: TransactionState,
    response: HttpResponse,
    completion: Option<CompletionHook>,
    upgrade: Option<UpgradeHook>,
    canceled: bool,
}

pub(crate) struct MockTransaction {
    request: HttpRequest,
    inner: Mutex<TransactionInner>,
}

impl MockTransaction {
    fn new(request: HttpRequest, upgrade: Option<UpgradeHook>) -> Self {
        Self {
            request,
            inner: Mutex::new(TransactionInner {
                state: TransactionState::InProgress,
                response: HttpResponse::default(),
                completion: None,
                upgrade,
                canceled: false,
            }),
        }
    }

    pub(crate) fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub(crate) fn was_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// Finishes the transaction, running the upgrade hook for a `101`
    /// response and then the completion hook.
    pub(crate) fn complete(&self, state: TransactionState, response: HttpResponse) {
        let (upgrade, completion) = {
            let mut inner = self.inner.lock();
            inner.state = state;
            inner.response = response.clone();
            (inner.upgrade.take(), inner.completion.take())
        };

        if state == TransactionState::Completed
            && response.status == 101
            && let Some(upgrade) = upgrade
        {
            let (client, _server) = duplex(64);
            upgrade(&response, Upgraded::new(Box::new(client)));
        }

        if let Some(completion) = completion {
            completion();
        }
    }

    /// Completes with a `101` carrying the mock accept value.
    pub(crate) fn complete_upgrade(&self) {
        self.complete(
            TransactionState::Completed,
            HttpResponse::new(101, "Switching Protocols")
                .with_header("Sec-WebSocket-Accept", MOCK_ACCEPT),
        );
    }
}

impl Transaction for MockTransaction {
    fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    fn response(&self) -> HttpResponse {
        self.inner.lock().response.clone()
    }

    fn set_completion_hook(&self, hook: CompletionHook) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            drop(inner);
            hook();
        } else {
            inner.completion = Some(hook);
        }
    }

    fn cancel(&self) {
        self.inner.lock().canceled = true;
    }
}

// ============================================================================
// MockEngine
// ============================================================================

/// Engages a [`MockSocket`] when the response carries [`MOCK_ACCEPT`].
pub(crate) struct MockEngine {
    sockets: Arc<Mutex<Vec<Arc<MockSocket>>>>,
    diagnostics: DiagnosticsSender,
}

impl MockEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            sockets: Arc::default(),
            diagnostics: DiagnosticsSender::new("WebSocket"),
        })
    }

    pub(crate) fn sockets(&self) -> Vec<Arc<MockSocket>> {
        self.sockets.lock().clone()
    }
}

impl WebSocketEngine for MockEngine {
    fn start_open_as_client(&self, request: &mut HttpRequest) -> Box<dyn ClientHandshake> {
        request.set_header("Upgrade", "websocket");
        Box::new(MockHandshake {
            sockets: Arc::clone(&self.sockets),
            diagnostics: self.diagnostics.clone(),
        })
    }

    fn diagnostics(&self) -> Option<&DiagnosticsSender> {
        Some(&self.diagnostics)
    }
}

struct MockHandshake {
    sockets: Arc<Mutex<Vec<Arc<MockSocket>>>>,
    diagnostics: DiagnosticsSender,
}

impl ClientHandshake for MockHandshake {
    fn finish_open_as_client(
        self: Box<Self>,
        _upgraded: Upgraded,
        response: &HttpResponse,
    ) -> Option<Arc<dyn WebSocket>> {
        if response.header("Sec-WebSocket-Accept") != Some(MOCK_ACCEPT) {
            self.diagnostics
                .send(levels::WARNING, "Sec-WebSocket-Accept mismatch");
            return None;
        }
        let socket = Arc::new(MockSocket::default());
        self.sockets.lock().push(Arc::clone(&socket));
        Some(socket)
    }
}

// ============================================================================
// MockSocket
// ============================================================================

/// Records what is sent; tests push inbound frames through its delegates.
pub(crate) struct MockSocket {
    sent_text: Mutex<Vec<String>>,
    sent_binary: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<Option<(u16, String)>>,
    delegates: Mutex<Option<Arc<Delegates>>>,
    diagnostics: DiagnosticsSender,
}

impl Default for MockSocket {
    fn default() -> Self {
        Self {
            sent_text: Mutex::default(),
            sent_binary: Mutex::default(),
            closed: Mutex::default(),
            delegates: Mutex::default(),
            diagnostics: DiagnosticsSender::new("WebSocket"),
        }
    }
}

impl MockSocket {
    /// Publishes on the socket's own diagnostics.
    pub(crate) fn report(&self, level: usize, message: &str) {
        self.diagnostics.send(level, message);
    }

    pub(crate) fn sent_text(&self) -> Vec<String> {
        self.sent_text.lock().clone()
    }

    pub(crate) fn sent_binary(&self) -> Vec<Vec<u8>> {
        self.sent_binary.lock().clone()
    }

    pub(crate) fn closed(&self) -> Option<(u16, String)> {
        self.closed.lock().clone()
    }

    pub(crate) fn has_delegates(&self) -> bool {
        self.delegates.lock().is_some()
    }

    fn current(&self) -> Option<Arc<Delegates>> {
        self.delegates.lock().clone()
    }

    pub(crate) fn receive_text(&self, text: &str) {
        if let Some(delegates) = self.current()
            && let Some(on_text) = &delegates.text
        {
            on_text(text.to_string());
        }
    }

    pub(crate) fn receive_binary(&self, data: &[u8]) {
        if let Some(delegates) = self.current()
            && let Some(on_binary) = &delegates.binary
        {
            on_binary(data.to_vec());
        }
    }

    pub(crate) fn receive_close(&self, code: u16, reason: &str) {
        if let Some(delegates) = self.current()
            && let Some(on_close) = &delegates.close
        {
            on_close(code, reason.to_string());
        }
    }

    pub(crate) fn receive_ping(&self, data: &[u8]) {
        if let Some(delegates) = self.current()
            && let Some(on_ping) = &delegates.ping
        {
            on_ping(data.to_vec());
        }
    }
}

impl WebSocket for MockSocket {
    fn send_text(&self, text: String) {
        self.sent_text.lock().push(text);
    }

    fn send_binary(&self, data: Vec<u8>) {
        self.sent_binary.lock().push(data);
    }

    fn close(&self, code: u16, reason: &str) {
        *self.closed.lock() = Some((code, reason.to_string()));
    }

    fn set_delegates(&self, delegates: Delegates) {
        *self.delegates.lock() = Some(Arc::new(delegates));
    }

    fn diagnostics(&self) -> Option<&DiagnosticsSender> {
        Some(&self.diagnostics)
    }
}
