//! Parsed target addresses.
//!
//! Wraps [`url::Url`] and keeps the explicitly configured port separately,
//! because `Url` normalizes a scheme's default port away and the transport
//! needs to know whether a port was actually chosen.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Port substituted for secure schemes without an explicit port.
pub const DEFAULT_SECURE_PORT: u16 = 443;

// ============================================================================
// Address
// ============================================================================

/// A parsed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Parsed URL.
    url: Url,
    /// Explicitly chosen port, if any.
    port: Option<u16>,
}

impl Address {
    /// Parses an absolute URL with a host.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if the input is not an absolute URL or has
    /// no host.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::invalid_address(input, e))?;
        if !url.has_host() {
            return Err(Error::invalid_address(input, "missing host"));
        }

        let port = url.port();
        Ok(Self { url, port })
    }

    /// Returns the scheme, lowercased.
    #[inline]
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Returns the host name or IP literal.
    #[inline]
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Returns `true` if a port was chosen explicitly.
    #[inline]
    #[must_use]
    pub fn has_port(&self) -> bool {
        self.port.is_some()
    }

    /// Returns the explicitly chosen port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Chooses a port explicitly.
    pub fn set_port(&mut self, port: u16) {
        self.port = Some(port);
        // Only fails for URLs without a host, which `parse` rejects.
        let _ = self.url.set_port(Some(port));
    }

    /// Returns the port the transport should dial.
    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.url.port_or_known_default())
    }

    /// Returns `true` for `https` and `wss`.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme(), "https" | "wss")
    }

    /// Substitutes [`DEFAULT_SECURE_PORT`] for secure schemes without an
    /// explicit port. Returns `true` if the port was changed.
    ///
    /// Some transports assume port 80 unless a port is set, even for
    /// secure schemes.
    pub fn apply_secure_default_port(&mut self) -> bool {
        if self.has_port() || !self.is_secure() {
            return false;
        }
        self.set_port(DEFAULT_SECURE_PORT);
        true
    }

    /// Returns the origin-form request target (`/path?query`).
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Returns the underlying URL.
    #[inline]
    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

// ============================================================================
// Tests
// ============================================================================
