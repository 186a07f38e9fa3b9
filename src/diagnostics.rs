//! Diagnostic event stream.
//!
//! Every component owns a [`DiagnosticsSender`] named after it. Messages are
//! published as `(component, level, message)` tuples to zero or more
//! subscribers, each with its own minimum level. Publishing is purely
//! observational and never affects the outcome of an operation.
//!
//! Each message is also emitted as a `tracing` event, so an application that
//! installs a subscriber sees the stream without subscribing explicitly.
//!
//! # Chaining
//!
//! A parent sender can collect the stream of a child component:
//!
//! ```ignore
//! let app = DiagnosticsSender::new("App");
//! let connections = DiagnosticsSender::new("Connections");
//! connections
//!     .subscribe_delegate(app.chain(), levels::CONNECTIONS_INTERFACE)
//!     .detach();
//! // app subscribers now see "App/Connections" messages
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

// ============================================================================
// Levels
// ============================================================================

/// Severity levels and per-component thresholds.
pub mod levels {
    /// Routine progress messages.
    pub const INFO: usize = 2;

    /// Something failed, but the process carries on.
    pub const WARNING: usize = 5;

    /// Something failed that the caller did not ask for.
    pub const ERROR: usize = 10;

    /// Default threshold for the connections interface.
    pub const CONNECTIONS_INTERFACE: usize = 1;

    /// Threshold for forwarding a WebSocket engine's or socket's
    /// messages into the layer that owns it.
    pub const WEB_SOCKET: usize = 0;

    /// Default threshold for forwarding a connection wrapper's messages
    /// into the connections interface.
    pub const WEB_SOCKET_WRAPPER: usize = 0;
}

// ============================================================================
// Types
// ============================================================================

/// Receives `(component, level, message)` tuples.
pub type DiagnosticDelegate = Arc<dyn Fn(&str, usize, &str) + Send + Sync>;

/// A registered subscriber.
struct Subscriber {
    /// Token handed out in the [`Subscription`].
    token: u64,
    /// Messages below this level are not delivered.
    min_level: usize,
    /// Callback.
    delegate: DiagnosticDelegate,
}

/// Shared state of a sender.
struct SenderInner {
    /// Component name.
    name: String,
    /// Subscribers in subscription order.
    subscribers: Mutex<SubscriberTable>,
}

#[derive(Default)]
struct SubscriberTable {
    next_token: u64,
    entries: Vec<Subscriber>,
}

// ============================================================================
// DiagnosticsSender
// ============================================================================

/// Publishes diagnostic messages on behalf of one component.
///
/// Cloning yields another handle to the same subscriber table.
#[derive(Clone)]
pub struct DiagnosticsSender {
    inner: Arc<SenderInner>,
}

impl fmt::Debug for DiagnosticsSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsSender")
            .field("name", &self.inner.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl DiagnosticsSender {
    /// Creates a sender for the named component.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                name: name.into(),
                subscribers: Mutex::new(SubscriberTable::default()),
            }),
        }
    }

    /// Returns the component name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of current subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().entries.len()
    }

    /// Subscribes a closure to messages at or above `min_level`.
    pub fn subscribe<F>(&self, delegate: F, min_level: usize) -> Subscription
    where
        F: Fn(&str, usize, &str) + Send + Sync + 'static,
    {
        self.subscribe_delegate(Arc::new(delegate), min_level)
    }

    /// Subscribes an existing delegate, such as one returned by [`chain`](Self::chain).
    pub fn subscribe_delegate(&self, delegate: DiagnosticDelegate, min_level: usize) -> Subscription {
        let mut table = self.inner.subscribers.lock();
        let token = table.next_token;
        table.next_token += 1;
        table.entries.push(Subscriber {
            token,
            min_level,
            delegate,
        });

        Subscription {
            sender: Arc::downgrade(&self.inner),
            token,
        }
    }

    /// Publishes a message from this component.
    pub fn send(&self, level: usize, message: impl AsRef<str>) {
        let message = message.as_ref();
        let component = self.inner.name.as_str();

        if level >= levels::ERROR {
            error!(component, level, "{message}");
        } else if level >= levels::WARNING {
            warn!(component, level, "{message}");
        } else if level >= levels::INFO {
            info!(component, level, "{message}");
        } else {
            debug!(component, level, "{message}");
        }

        self.inner.publish(component, level, message);
    }

    /// Returns a delegate that republishes another sender's messages
    /// through this one, under `"<this>/<other>"`.
    ///
    /// The delegate holds only a weak reference and goes quiet once every
    /// handle to this sender is dropped.
    #[must_use]
    pub fn chain(&self) -> DiagnosticDelegate {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |component: &str, level: usize, message: &str| {
            if let Some(inner) = weak.upgrade() {
                let nested = format!("{}/{}", inner.name, component);
                inner.publish(&nested, level, message);
            }
        })
    }
}

impl SenderInner {
    /// Delivers to every subscriber whose threshold admits `level`.
    ///
    /// Delegates run with the table unlocked so they may subscribe or
    /// unsubscribe from within the callback.
    fn publish(&self, component: &str, level: usize, message: &str) {
        let targets: Vec<DiagnosticDelegate> = {
            let table = self.subscribers.lock();
            table
                .entries
                .iter()
                .filter(|subscriber| level >= subscriber.min_level)
                .map(|subscriber| Arc::clone(&subscriber.delegate))
                .collect()
        };

        for delegate in targets {
            delegate(component, level, message);
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Keeps a subscriber registered; unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately; call detach() to keep it"]
pub struct Subscription {
    sender: Weak<SenderInner>,
    token: u64,
}

impl Subscription {
    /// Removes the subscriber now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keeps the subscriber registered for the sender's lifetime.
    pub fn detach(mut self) {
        self.sender = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.sender.upgrade() {
            let token = self.token;
            inner
                .subscribers
                .lock()
                .entries
                .retain(|subscriber| subscriber.token != token);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
