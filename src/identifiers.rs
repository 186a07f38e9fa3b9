//! Type-safe identifiers.
//!
//! Newtype wrappers keep transaction ids from being mixed with other
//! integers such as status codes or ports.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// TransactionId
// ============================================================================

/// Identifies one in-flight resource request.
///
/// Allocated by the resource request manager under its table lock,
/// starting at 1 and increasing by one per submission. Ids are never reused
/// within the lifetime of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// The first id a manager hands out.
    pub const FIRST: Self = Self(1);

    /// Creates an id from a raw value. Returns `None` for 0.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns this id and advances `self` to the next one.
    #[inline]
    pub(crate) fn take_next(&mut self) -> Self {
        let current = *self;
        self.0 += 1;
        current
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
