//! Client configuration

use crate::error::{Error, Result};
use crate::netbios::name::NETBIOS_NAME_MAX_LEN;
use crate::protocol::{Dialect, Smb2Capabilities};
use std::time::Duration;
use uuid::Uuid;

/// Default direct-hosted SMB port
pub const DEFAULT_PORT: u16 = 445;

/// NetBIOS session service port
pub const NETBIOS_PORT: u16 = 139;

/// SMB client configuration
///
/// Read-only once handed to a [`crate::SmbContext`]. Two contexts whose
/// configurations compare equal may share pooled transports.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Client GUID
    pub client_guid: Uuid,
    /// Lowest dialect offered
    pub min_dialect: Dialect,
    /// Highest dialect offered
    pub max_dialect: Dialect,
    /// Advertise signing support
    pub signing_enabled: bool,
    /// Require signing on every connection
    pub signing_enforced: bool,
    /// Require signing for IPC$ connections of authenticated users
    pub ipc_signing_enforced: bool,
    /// Request encryption from servers that support it
    pub encryption_enabled: bool,
    /// Maximum sessions per pooled transport, 0 for unlimited
    pub session_limit: usize,
    /// TCP connect timeout
    pub conn_timeout: Duration,
    /// Time to wait for a response
    pub response_timeout: Duration,
    /// Idle time after which an unused transport disconnects
    pub so_timeout: Duration,
    /// Session lifetime before it is swept, zero disables expiry
    pub session_timeout: Duration,
    /// Retries of a request after a transport fault
    pub max_request_retries: u32,
    /// Fall back to NetBIOS port 139 when 445 cannot be reached
    pub port139_failover: bool,
    /// Accept a guest session when authenticated logon was requested
    pub allow_guest_fallback: bool,
    /// NetBIOS calling name used on port 139
    pub local_name: String,
    /// Share used by [`crate::client::TransportPool::logon`]
    pub logon_share: Option<String>,
    /// Skip DFS referral resolution
    pub dfs_disabled: bool,
    /// Capabilities announced in SMB2 negotiate
    pub capabilities: Smb2Capabilities,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            min_dialect: Dialect::Smb202,
            max_dialect: Dialect::Smb311,
            signing_enabled: true,
            signing_enforced: false,
            ipc_signing_enforced: true,
            encryption_enabled: false,
            session_limit: 250,
            conn_timeout: Duration::from_secs(35),
            response_timeout: Duration::from_secs(30),
            so_timeout: Duration::from_secs(35),
            session_timeout: Duration::from_secs(35),
            max_request_retries: 2,
            port139_failover: false,
            allow_guest_fallback: false,
            local_name: String::from("RUST-SMB-CLIENT"),
            logon_share: None,
            dfs_disabled: false,
            capabilities: Smb2Capabilities::DFS
                | Smb2Capabilities::LARGE_MTU
                | Smb2Capabilities::ENCRYPTION,
        }
    }
}

impl ClientConfig {
    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.min_dialect > self.max_dialect {
            return Err(Error::InvalidParameter(format!(
                "minimum dialect {} is above maximum {}",
                self.min_dialect, self.max_dialect
            )));
        }
        if self.conn_timeout.is_zero() || self.response_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "connect and response timeouts must be non-zero".to_string(),
            ));
        }
        if self.local_name.len() > NETBIOS_NAME_MAX_LEN {
            return Err(Error::InvalidNetBiosName(format!(
                "calling name '{}' exceeds {} characters",
                self.local_name, NETBIOS_NAME_MAX_LEN
            )));
        }
        Ok(())
    }

    /// Whether the multi-protocol (SMB1 style) negotiate is needed
    pub fn offers_smb1(&self) -> bool {
        self.min_dialect == Dialect::Smb1
    }

    pub fn session_expiry(&self) -> Option<Duration> {
        if self.session_timeout.is_zero() {
            None
        } else {
            Some(self.session_timeout)
        }
    }
}
