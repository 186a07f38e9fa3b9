//! Single-assignment, single-reader result slot.
//!
//! [`deferred`] returns a connected pair: the [`Promise`] is handed to the
//! producer (a transport callback, a worker thread) and the [`Deferred`] to
//! the synchronous caller.
//!
//! - [`Promise::fulfill`] consumes the promise, so a slot can be filled at
//!   most once.
//! - Dropping a promise without fulfilling it marks the slot abandoned and
//!   wakes the reader with [`Error::ChannelClosed`] instead of leaving it
//!   blocked forever.
//! - There is no cancellation primitive; a producer that wants to cancel
//!   fulfills with a sentinel value.
//!
//! # Example
//!
//! ```ignore
//! let (promise, result) = deferred();
//! std::thread::spawn(move || promise.fulfill(42));
//! assert_eq!(result.wait()?, 42);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

// ============================================================================
// Slot
// ============================================================================

/// Where the value lives between producer and consumer.
enum SlotState<T> {
    /// Nothing produced yet.
    Pending,
    /// Value waiting to be taken.
    Ready(T),
    /// Value already handed to the reader.
    Taken,
    /// Promise dropped without a value.
    Abandoned,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn new(state: SlotState<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            ready: Condvar::new(),
        })
    }
}

/// Creates a connected promise/deferred pair.
#[must_use]
pub fn deferred<T>() -> (Promise<T>, Deferred<T>) {
    let slot = Slot::new(SlotState::Pending);
    (
        Promise {
            slot: Some(Arc::clone(&slot)),
        },
        Deferred { slot },
    )
}

// ============================================================================
// Promise
// ============================================================================

/// Producing side of a deferred result.
pub struct Promise<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Promise<T> {
    /// Stores the value and wakes the reader.
    pub fn fulfill(mut self, value: T) {
        if let Some(slot) = self.slot.take() {
            let mut state = slot.state.lock();
            debug_assert!(
                matches!(*state, SlotState::Pending),
                "deferred slot resolved twice"
            );
            *state = SlotState::Ready(value);
            slot.ready.notify_all();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let mut state = slot.state.lock();
            if matches!(*state, SlotState::Pending) {
                *state = SlotState::Abandoned;
            }
            slot.ready.notify_all();
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

// ============================================================================
// Deferred
// ============================================================================

/// Consuming side of a deferred result.
pub struct Deferred<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Deferred<T> {
    /// Creates a deferred that is already fulfilled.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            slot: Slot::new(SlotState::Ready(value)),
        }
    }

    /// Returns `true` if a value is waiting to be taken.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.state.lock(), SlotState::Ready(_))
    }

    /// Blocks until the value is produced.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelClosed`] if the promise was dropped unfulfilled.
    pub fn wait(self) -> Result<T> {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(outcome) = Self::try_take(&mut state) {
                return outcome;
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Waits at most `timeout` for the value.
    ///
    /// Returns `Ok(None)` if nothing was produced in time; the deferred can be
    /// polled again afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelClosed`] if the promise was dropped unfulfilled, or if
    /// the value was already taken by an earlier poll.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        loop {
            if let Some(outcome) = Self::try_take(&mut state) {
                return outcome.map(Some);
            }
            if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                return Self::try_take(&mut state).transpose();
            }
        }
    }

    /// Waits for the value from async code without blocking the runtime.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelClosed`] if the promise was dropped unfulfilled.
    pub async fn wait_async(self) -> Result<T>
    where
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .map_err(|_| Error::ChannelClosed)?
    }

    /// Takes the value if one is present. `None` means still pending.
    fn try_take(state: &mut SlotState<T>) -> Option<Result<T>> {
        match mem::replace(state, SlotState::Taken) {
            SlotState::Ready(value) => Some(Ok(value)),
            SlotState::Pending => {
                *state = SlotState::Pending;
                None
            }
            SlotState::Abandoned => {
                *state = SlotState::Abandoned;
                Some(Err(Error::ChannelClosed))
            }
            SlotState::Taken => Some(Err(Error::ChannelClosed)),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("ready", &self.is_ready())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn test_fulfill_then_wait() {
        let (promise, result) = deferred();
        promise.fulfill("pong".to_string());

        assert!(result.is_ready());
        assert_eq!(result.wait().expect("value"), "pong");
    }

    #[test]
    fn test_wait_blocks_until_other_thread_fulfills() {
        let (promise, result) = deferred();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.fulfill(7_u32);
        });

        assert_eq!(result.wait().expect("value"), 7);
        producer.join().expect("producer");
    }

    #[test]
    fn test_wait_timeout_not_ready() {
        let (_promise, mut result) = deferred::<u32>();

        let started = Instant::now();
        let polled = result.wait_timeout(Duration::from_millis(30)).expect("poll");

        assert!(polled.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_timeout_ready() {
        let (promise, mut result) = deferred();
        promise.fulfill(1_u8);

        let polled = result.wait_timeout(Duration::from_millis(0)).expect("poll");
        assert_eq!(polled, Some(1));

        // Value has been handed out; a second poll reports the slot closed.
        assert!(matches!(
            result.wait_timeout(Duration::from_millis(0)),
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn test_poll_then_wait() {
        let (promise, mut result) = deferred();
        assert!(result.wait_timeout(Duration::from_millis(5)).expect("poll").is_none());

        promise.fulfill(3_i32);
        assert_eq!(result.wait().expect("value"), 3);
    }

    #[test]
    fn test_dropped_promise_wakes_reader() {
        let (promise, result) = deferred::<u32>();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            drop(promise);
        });

        assert!(matches!(result.wait(), Err(Error::ChannelClosed)));
        producer.join().expect("producer");
    }

    #[test]
    fn test_ready_constructor() {
        let result = Deferred::ready(5_u16);
        assert!(result.is_ready());
        assert_eq!(result.wait().expect("value"), 5);
    }

    #[tokio::test]
    async fn test_wait_async() {
        let (promise, result) = deferred();
        thread::spawn(move || promise.fulfill("async".to_string()));

        assert_eq!(result.wait_async().await.expect("value"), "async");
    }
}
