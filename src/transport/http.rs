//! Request and response types exchanged with the transport.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::Address;

// ============================================================================
// Header
// ============================================================================

/// A single header line. Names compare case-insensitively on lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Creates a header.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Finds the first header with the given name.
pub(crate) fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

// ============================================================================
// HttpRequest
// ============================================================================

/// A request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method, e.g. `GET`.
    pub method: String,
    /// Where to send it.
    pub target: Address,
    /// Header lines in order.
    pub headers: Vec<Header>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: impl Into<String>, target: Address) -> Self {
        Self {
            method: method.into(),
            target,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Returns the first header with the given name.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replaces the header with the given name, or appends it.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|header| header.name.eq_ignore_ascii_case(&name))
        {
            Some(header) => header.value = value,
            None => self.headers.push(Header { name, value }),
        }
    }
}

// ============================================================================
// HttpResponse
// ============================================================================

/// A response as produced by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header lines in order.
    pub headers: Vec<Header>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a status line only.
    #[must_use]
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            ..Default::default()
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first header with the given name.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

// ============================================================================
// TransactionState
// ============================================================================

/// Where a transport transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Still running.
    InProgress,
    /// A response was received.
    Completed,
    /// The server could not be reached.
    UnableToConnect,
    /// The connection broke before the response completed.
    Broken,
    /// No response arrived in time.
    Timeout,
}

impl TransactionState {
    /// Returns `true` once the transaction has finished, for any reason.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Maps a finished transaction to its failure, if it failed.
    ///
    /// Completion signaled while the state still reads `InProgress` breaks
    /// the transport contract and is treated as a broken connection.
    #[must_use]
    pub fn failure(self) -> Option<Error> {
        match self {
            Self::Completed => None,
            Self::UnableToConnect => Some(Error::UnableToConnect),
            Self::Broken | Self::InProgress => Some(Error::Broken),
            Self::Timeout => Some(Error::Timeout),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
