//! NetBIOS over TCP (NBT) session service
//!
//! RFC 1001/1002 framing used on both SMB ports, and the session request
//! handshake needed on port 139.

use crate::error::{Error, Result};
use std::convert::TryFrom;

pub mod name;

use name::{session_name, NetBiosNameType};

/// Packet types of the session service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetBiosMessageType {
    SessionMessage = 0x00,
    SessionRequest = 0x81,
    PositiveResponse = 0x82,
    NegativeResponse = 0x83,
    RetargetResponse = 0x84,
    Keepalive = 0x85,
}

impl TryFrom<u8> for NetBiosMessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Self::SessionMessage,
            0x81 => Self::SessionRequest,
            0x82 => Self::PositiveResponse,
            0x83 => Self::NegativeResponse,
            0x84 => Self::RetargetResponse,
            0x85 => Self::Keepalive,
            other => {
                return Err(Error::InvalidHeader(format!(
                    "unknown NetBIOS packet type 0x{:02x}",
                    other
                )))
            }
        })
    }
}

/// NetBIOS Session Service header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetBiosHeader {
    /// Message type
    pub message_type: NetBiosMessageType,
    /// Length of the message payload
    pub length: u32,
}

impl NetBiosHeader {
    /// Maximum payload length: direct-hosted SMB uses 24 bits
    pub const MAX_LENGTH: u32 = 0x00FF_FFFF;

    /// Header size in bytes
    pub const SIZE: usize = 4;

    /// Create a new NetBIOS header
    pub fn new(message_type: NetBiosMessageType, length: u32) -> Result<Self> {
        if length > Self::MAX_LENGTH {
            return Err(Error::InvalidParameter(format!(
                "NetBIOS length {} exceeds maximum {}",
                length,
                Self::MAX_LENGTH
            )));
        }
        Ok(Self {
            message_type,
            length,
        })
    }

    /// Parse a NetBIOS header from bytes
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }

        let message_type = NetBiosMessageType::try_from(buf[0])?;
        let length = ((buf[1] as u32) << 16) | ((buf[2] as u32) << 8) | (buf[3] as u32);

        Ok(Self {
            message_type,
            length,
        })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.message_type as u8,
            ((self.length >> 16) & 0xFF) as u8,
            ((self.length >> 8) & 0xFF) as u8,
            (self.length & 0xFF) as u8,
        ]
    }
}

/// NetBIOS session message wrapper
#[derive(Debug, Clone)]
pub struct NetBiosMessage {
    pub header: NetBiosHeader,
    pub payload: Vec<u8>,
}

impl NetBiosMessage {
    /// Create a new session message
    pub fn session_message(payload: Vec<u8>) -> Result<Self> {
        let header = NetBiosHeader::new(NetBiosMessageType::SessionMessage, payload.len() as u32)?;
        Ok(Self { header, payload })
    }

    /// Session request naming the server (called) and this client (calling)
    pub fn session_request(called_name: &str, calling_name: &str) -> Result<Self> {
        let mut payload = session_name(called_name, NetBiosNameType::FileServer)?;
        payload.extend_from_slice(&session_name(calling_name, NetBiosNameType::Workstation)?);

        let header = NetBiosHeader::new(NetBiosMessageType::SessionRequest, payload.len() as u32)?;
        Ok(Self { header, payload })
    }

    /// Serialize the entire message to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NetBiosHeader::SIZE + self.payload.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse a complete NetBIOS message from bytes
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = NetBiosHeader::parse(buf)?;

        let total_len = NetBiosHeader::SIZE + header.length as usize;
        if buf.len() < total_len {
            return Err(Error::BufferTooSmall {
                need: total_len,
                have: buf.len(),
            });
        }

        let payload = buf[NetBiosHeader::SIZE..total_len].to_vec();
        Ok(Self { header, payload })
    }

    /// Interpret the answer to a session request
    pub fn check_session_response(&self) -> Result<()> {
        match self.header.message_type {
            NetBiosMessageType::PositiveResponse => Ok(()),
            NetBiosMessageType::NegativeResponse => {
                let error_code = self.payload.first().copied().unwrap_or(0);
                Err(Error::Transport(format!(
                    "NetBIOS session request rejected with error code: 0x{:02x}",
                    error_code
                )))
            }
            other => Err(Error::Protocol(format!(
                "Unexpected NetBIOS response type: {:?}",
                other
            ))),
        }
    }
}
