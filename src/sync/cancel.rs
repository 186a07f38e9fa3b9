//! Cancellation handles.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

// ============================================================================
// CancelHandle
// ============================================================================

/// Asks an in-flight operation to stop.
///
/// Handles hold only weak references to the operation, so calling
/// [`cancel`](Self::cancel) after the operation finished is a no-op, as is
/// calling it twice. Clones cancel the same operation.
#[derive(Clone)]
pub struct CancelHandle {
    action: Arc<dyn Fn() + Send + Sync>,
}

impl CancelHandle {
    /// Creates a handle that runs `action` on every call to `cancel`.
    pub(crate) fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    /// Creates a handle for an operation that already finished.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        (self.action)();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
