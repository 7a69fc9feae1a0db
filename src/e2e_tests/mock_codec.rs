//! Minimal message codec for end-to-end tests
//!
//! Every message is a real SMB2 header followed by a tiny test-only body:
//!
//! | command         | request body                    | response body                              |
//! |-----------------|---------------------------------|--------------------------------------------|
//! | NEGOTIATE       | smb2_only u8, mode u16, n × u16 | revision u16, mode u16, caps u32, hash u16, cipher u16 |
//! | SESSION_SETUP   | token                           | session flags u16, token                   |
//! | TREE_CONNECT    | UNC path (UTF-8)                | share type u8, share flags u32, caps u32   |
//! | anything else   | path (UTF-8)                    | echoed path                                |

use crate::error::{Error, Result};
use crate::protocol::{
    CipherId, Codec, HashAlgorithmId, NegotiateParams, Negotiation, Request, RequestHeader,
    SecurityMode, SessionFlags, SessionSetupParams, SessionSetupReply, ShareCapabilities,
    ShareFlags, ShareType, Smb2Capabilities, Smb2Command, Smb2Header, Smb2Negotiation,
    TreeConnectReply,
};
use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;
use uuid::Uuid;

/// Request whose body is opaque to the connection core
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub command: Smb2Command,
    pub body: Vec<u8>,
    pub path: Option<String>,
    pub resolved: Option<(String, String, String)>,
    pub teardown: bool,
    pub timeout: Option<Duration>,
    pub resets: usize,
}

impl MockRequest {
    pub fn new(command: Smb2Command, body: Vec<u8>) -> Self {
        Self {
            command,
            body,
            path: None,
            resolved: None,
            teardown: false,
            timeout: None,
            resets: 0,
        }
    }

    /// Path-carrying request, subject to DFS resolution
    pub fn with_path(command: Smb2Command, path: &str) -> Self {
        let mut request = Self::new(command, path.as_bytes().to_vec());
        request.path = Some(path.to_string());
        request
    }

    fn teardown(command: Smb2Command) -> Self {
        let mut request = Self::new(command, Vec::new());
        request.teardown = true;
        request
    }
}

impl Request for MockRequest {
    fn encode(&mut self, header: &RequestHeader) -> Result<Vec<u8>> {
        let mut smb2 = Smb2Header::new(self.command);
        smb2.message_id = header.message_id;
        smb2.session_id = header.session_id;
        smb2.tree_id = header.tree_id;
        let mut raw = smb2.serialize();
        match &self.resolved {
            Some((_, _, path)) => raw.extend_from_slice(path.as_bytes()),
            None => raw.extend_from_slice(&self.body),
        }
        Ok(raw)
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.resolved = None;
    }

    fn override_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn is_teardown(&self) -> bool {
        self.teardown
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn set_resolved_path(&mut self, server: &str, share: &str, path: &str) {
        self.resolved = Some((server.to_string(), share.to_string(), path.to_string()));
    }

    fn is_resolved_in_dfs(&self) -> bool {
        self.resolved.is_some()
    }
}

/// [`Codec`] for the test body layout above
#[derive(Debug, Default, Clone, Copy)]
pub struct MockCodec;

impl MockCodec {
    fn parse(raw: &[u8], expected: Smb2Command) -> Result<(Smb2Header, &[u8])> {
        let header = Smb2Header::parse(raw)?;
        if header.command != expected {
            return Err(Error::Protocol(format!(
                "Expected {:?}, got {:?}",
                expected, header.command
            )));
        }
        Ok((header, &raw[Smb2Header::SIZE..]))
    }
}

impl Codec for MockCodec {
    fn negotiate_request(&self, params: &NegotiateParams) -> Result<Box<dyn Request>> {
        let mut body = vec![u8::from(params.smb2_only)];
        body.extend_from_slice(&params.security_mode.bits().to_le_bytes());
        for dialect in &params.dialects {
            body.extend_from_slice(&dialect.revision().unwrap_or(0).to_le_bytes());
        }
        Ok(Box::new(MockRequest::new(Smb2Command::Negotiate, body)))
    }

    fn parse_negotiate(&self, raw: &[u8]) -> Result<Negotiation> {
        let (_, body) = Self::parse(raw, Smb2Command::Negotiate)?;
        if body.len() < 12 {
            return Err(Error::BufferTooSmall {
                need: 12,
                have: body.len(),
            });
        }
        let hash = LittleEndian::read_u16(&body[8..10]);
        let cipher = LittleEndian::read_u16(&body[10..12]);
        Ok(Negotiation::Smb2(Smb2Negotiation {
            dialect_revision: LittleEndian::read_u16(&body[0..2]),
            security_mode: SecurityMode::from_bits_truncate(LittleEndian::read_u16(&body[2..4])),
            capabilities: Smb2Capabilities::from_bits_truncate(LittleEndian::read_u32(
                &body[4..8],
            )),
            server_guid: Uuid::nil(),
            max_transact_size: 65536,
            max_read_size: 65536,
            max_write_size: 65536,
            security_blob: Vec::new(),
            preauth_hash_algorithm: match hash {
                0 => None,
                id => Some(HashAlgorithmId::try_from(id)?),
            },
            cipher: match cipher {
                0 => None,
                id => Some(CipherId::try_from(id)?),
            },
        }))
    }

    fn session_setup_request(
        &self,
        _smb2: bool,
        params: &SessionSetupParams,
    ) -> Result<Box<dyn Request>> {
        Ok(Box::new(MockRequest::new(
            Smb2Command::SessionSetup,
            params.token.clone(),
        )))
    }

    fn parse_session_setup(&self, raw: &[u8]) -> Result<SessionSetupReply> {
        let (header, body) = Self::parse(raw, Smb2Command::SessionSetup)?;
        let flags = if body.len() >= 2 {
            SessionFlags::from_bits_truncate(LittleEndian::read_u16(&body[0..2]))
        } else {
            SessionFlags::empty()
        };
        Ok(SessionSetupReply {
            status: header.status.into(),
            session_id: header.session_id,
            flags,
            token: body.get(2..).unwrap_or_default().to_vec(),
        })
    }

    fn logoff_request(&self, _smb2: bool) -> Result<Box<dyn Request>> {
        Ok(Box::new(MockRequest::teardown(Smb2Command::Logoff)))
    }

    fn tree_connect_request(
        &self,
        _smb2: bool,
        unc_path: &str,
        _service: &str,
    ) -> Result<Box<dyn Request>> {
        Ok(Box::new(MockRequest::new(
            Smb2Command::TreeConnect,
            unc_path.as_bytes().to_vec(),
        )))
    }

    fn parse_tree_connect(&self, raw: &[u8]) -> Result<TreeConnectReply> {
        let (header, body) = Self::parse(raw, Smb2Command::TreeConnect)?;
        if body.len() < 9 {
            return Err(Error::BufferTooSmall {
                need: 9,
                have: body.len(),
            });
        }
        Ok(TreeConnectReply {
            tree_id: header.tree_id,
            share_type: ShareType::try_from(body[0])?,
            share_flags: ShareFlags::from_bits_truncate(LittleEndian::read_u32(&body[1..5])),
            capabilities: ShareCapabilities::from_bits_truncate(LittleEndian::read_u32(
                &body[5..9],
            )),
        })
    }

    fn tree_disconnect_request(&self, _smb2: bool) -> Result<Box<dyn Request>> {
        Ok(Box::new(MockRequest::teardown(Smb2Command::TreeDisconnect)))
    }
}
