//! Boundary to the message codec
//!
//! The core never interprets command payloads. It frames, signs, encrypts and
//! routes opaque [`Request`]/[`Response`] objects, and asks a [`Codec`] for
//! the handful of messages it must originate itself (negotiate, session
//! setup, logoff, tree connect and tree disconnect).

use super::dialect::Dialect;
use super::header::peek_status;
use super::negotiate::Negotiation;
use super::smb2_constants::{
    CipherId, HashAlgorithmId, SecurityMode, SessionFlags, ShareCapabilities, ShareFlags,
    ShareType, Smb2Capabilities,
};
use crate::error::{NtStatus, Result};
use bitflags::bitflags;
use std::time::Duration;
use uuid::Uuid;

bitflags! {
    /// Per-request send options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RequestParams: u8 {
        /// Surface the first transport fault instead of reconnecting
        const NO_RETRY = 0x01;
        /// Wait for the response without a deadline
        const NO_TIMEOUT = 0x02;
    }
}

/// Header values the transport assigns to each outgoing message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestHeader {
    pub message_id: u64,
    pub session_id: u64,
    pub tree_id: u32,
}

/// Outgoing message
pub trait Request: Send {
    /// Produce the wire bytes (SMB1 or SMB2 header included, no NetBIOS framing)
    fn encode(&mut self, header: &RequestHeader) -> Result<Vec<u8>>;

    /// Return to the pre-send state so the request can be issued again
    fn reset(&mut self);

    /// Response timeout for this request instead of the configured one
    fn override_timeout(&self) -> Option<Duration> {
        None
    }

    /// Close or disconnect style message that must not trigger DFS resolution
    fn is_teardown(&self) -> bool {
        false
    }

    /// Path the request addresses, relative to its share
    fn path(&self) -> Option<&str> {
        None
    }

    /// Redirect the request after DFS resolution
    fn set_resolved_path(&mut self, _server: &str, _share: &str, _path: &str) {}

    /// DFS resolution already rewrote the path since the last reset
    fn is_resolved_in_dfs(&self) -> bool {
        false
    }
}

/// Incoming message
pub trait Response: Send {
    /// Take the raw (verified, decrypted) message
    fn decode(&mut self, raw: &[u8]) -> Result<()>;

    fn status(&self) -> NtStatus;

    /// Forget anything received so far
    fn reset(&mut self);

    fn is_received(&self) -> bool;
}

/// Response that keeps the raw message
#[derive(Debug, Default, Clone)]
pub struct RawResponse {
    data: Vec<u8>,
    status: Option<NtStatus>,
}

impl RawResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Response for RawResponse {
    fn decode(&mut self, raw: &[u8]) -> Result<()> {
        self.status = Some(peek_status(raw)?);
        self.data = raw.to_vec();
        Ok(())
    }

    fn status(&self) -> NtStatus {
        self.status.unwrap_or(NtStatus::SUCCESS)
    }

    fn reset(&mut self) {
        self.data.clear();
        self.status = None;
    }

    fn is_received(&self) -> bool {
        self.status.is_some()
    }
}

/// Input for a negotiate request
#[derive(Debug, Clone)]
pub struct NegotiateParams {
    /// Multi-protocol negotiate (SMB1 framing) when false
    pub smb2_only: bool,
    pub dialects: Vec<Dialect>,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub client_guid: Uuid,
    /// Preauth integrity salt for 3.1.1
    pub salt: [u8; 32],
    pub hash_algorithms: Vec<HashAlgorithmId>,
    pub ciphers: Vec<CipherId>,
}

/// Input for one session setup round
#[derive(Debug, Clone)]
pub struct SessionSetupParams {
    pub session_id: u64,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub token: Vec<u8>,
}

/// Decoded session setup response
#[derive(Debug, Clone)]
pub struct SessionSetupReply {
    pub status: NtStatus,
    pub session_id: u64,
    pub flags: SessionFlags,
    pub token: Vec<u8>,
}

/// Decoded tree connect response
#[derive(Debug, Clone)]
pub struct TreeConnectReply {
    pub tree_id: u32,
    pub share_type: ShareType,
    pub share_flags: ShareFlags,
    pub capabilities: ShareCapabilities,
}

impl TreeConnectReply {
    pub fn is_dfs(&self) -> bool {
        self.share_flags.contains(ShareFlags::DFS)
            || self.capabilities.contains(ShareCapabilities::DFS)
    }
}

/// Builds and parses the messages the connection core originates
pub trait Codec: Send + Sync {
    fn negotiate_request(&self, params: &NegotiateParams) -> Result<Box<dyn Request>>;

    fn parse_negotiate(&self, raw: &[u8]) -> Result<Negotiation>;

    fn session_setup_request(
        &self,
        smb2: bool,
        params: &SessionSetupParams,
    ) -> Result<Box<dyn Request>>;

    fn parse_session_setup(&self, raw: &[u8]) -> Result<SessionSetupReply>;

    fn logoff_request(&self, smb2: bool) -> Result<Box<dyn Request>>;

    fn tree_connect_request(
        &self,
        smb2: bool,
        unc_path: &str,
        service: &str,
    ) -> Result<Box<dyn Request>>;

    fn parse_tree_connect(&self, raw: &[u8]) -> Result<TreeConnectReply>;

    fn tree_disconnect_request(&self, smb2: bool) -> Result<Box<dyn Request>>;
}
