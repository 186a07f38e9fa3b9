//! Synchronization primitives shared by the connection components.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `deferred` | Single-assignment result slot ([`Promise`] / [`Deferred`]) |
//! | `cancel` | Cancellation handles ([`CancelHandle`]) |

// ============================================================================
// Submodules
// ============================================================================

/// Single-assignment, single-reader result slot.
pub mod deferred;

/// Cancellation handles.
pub mod cancel;

// ============================================================================
// Re-exports
// ============================================================================

pub use cancel::CancelHandle;
pub use deferred::{Deferred, Promise, deferred};
