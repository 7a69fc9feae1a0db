//! Credential provider boundary
//!
//! Token computation (NTLM, Kerberos, SPNEGO wrapping) lives behind
//! [`AuthContext`]; the session only drives the exchange and consumes the
//! resulting signing key.

use crate::error::Result;
use std::fmt;

/// Authenticating identity, compared case-insensitively
#[derive(Debug, Clone, Eq)]
pub struct Principal {
    pub domain: String,
    pub user: String,
}

impl Principal {
    pub fn new(domain: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            user: user.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("", "")
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.domain.eq_ignore_ascii_case(&other.domain) && self.user.eq_ignore_ascii_case(&other.user)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.user)
        } else {
            write!(f, "{}\\{}", self.domain, self.user)
        }
    }
}

/// Source of authentication contexts for one principal
pub trait Credentials: Send + Sync + fmt::Debug {
    /// Independent copy; sessions never share mutable authentication state
    fn clone_box(&self) -> Box<dyn Credentials>;

    fn principal(&self) -> Principal;

    fn is_anonymous(&self) -> bool;

    fn is_guest(&self) -> bool {
        false
    }

    /// Start an authentication exchange against `target_host`
    ///
    /// `initial_token` is the security blob of the negotiate response.
    fn create_context(
        &self,
        target_host: &str,
        target_domain: Option<&str>,
        initial_token: &[u8],
        signing: bool,
    ) -> Result<Box<dyn AuthContext>>;
}

/// One in-progress authentication exchange
pub trait AuthContext: Send {
    /// Consume the server token, produce the next client token if any
    fn init_sec_context(&mut self, token: &[u8]) -> Result<Option<Vec<u8>>>;

    fn is_established(&self) -> bool;

    /// Session key once established
    fn signing_key(&self) -> Option<Vec<u8>>;
}

/// Null session credentials
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousCredentials;

impl Credentials for AnonymousCredentials {
    fn clone_box(&self) -> Box<dyn Credentials> {
        Box::new(*self)
    }

    fn principal(&self) -> Principal {
        Principal::anonymous()
    }

    fn is_anonymous(&self) -> bool {
        true
    }

    fn create_context(
        &self,
        _target_host: &str,
        _target_domain: Option<&str>,
        _initial_token: &[u8],
        _signing: bool,
    ) -> Result<Box<dyn AuthContext>> {
        Ok(Box::new(AnonymousContext { sent: false }))
    }
}

/// Sends a single empty token
struct AnonymousContext {
    sent: bool,
}

impl AuthContext for AnonymousContext {
    fn init_sec_context(&mut self, _token: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        Ok(Some(Vec::new()))
    }

    fn is_established(&self) -> bool {
        self.sent
    }

    fn signing_key(&self) -> Option<Vec<u8>> {
        None
    }
}
