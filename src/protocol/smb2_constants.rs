//! SMB2/SMB3 protocol constants used by the connection core

use bitflags::bitflags;
use std::convert::TryFrom;

/// SMB2 Protocol ID
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 transform header Protocol ID (encrypted message)
pub const SMB2_TRANSFORM_MAGIC: [u8; 4] = [0xFD, b'S', b'M', b'B'];

/// SMB1 Protocol ID
pub const SMB1_MAGIC: [u8; 4] = [0xFF, b'S', b'M', b'B'];

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// Byte range of the signature inside the SMB2 header
pub const SMB2_SIGNATURE_OFFSET: usize = 48;
pub const SMB2_SIGNATURE_SIZE: usize = 16;

/// SMB2 Commands (opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x00,
    SessionSetup = 0x01,
    Logoff = 0x02,
    TreeConnect = 0x03,
    TreeDisconnect = 0x04,
    Create = 0x05,
    Close = 0x06,
    Flush = 0x07,
    Read = 0x08,
    Write = 0x09,
    Lock = 0x0A,
    Ioctl = 0x0B,
    Cancel = 0x0C,
    KeepAlive = 0x0D,
    QueryDirectory = 0x0E,
    Notify = 0x0F,
    GetInfo = 0x10,
    SetInfo = 0x11,
    Break = 0x12,
}

impl TryFrom<u16> for Smb2Command {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Negotiate),
            0x01 => Ok(Self::SessionSetup),
            0x02 => Ok(Self::Logoff),
            0x03 => Ok(Self::TreeConnect),
            0x04 => Ok(Self::TreeDisconnect),
            0x05 => Ok(Self::Create),
            0x06 => Ok(Self::Close),
            0x07 => Ok(Self::Flush),
            0x08 => Ok(Self::Read),
            0x09 => Ok(Self::Write),
            0x0A => Ok(Self::Lock),
            0x0B => Ok(Self::Ioctl),
            0x0C => Ok(Self::Cancel),
            0x0D => Ok(Self::KeepAlive),
            0x0E => Ok(Self::QueryDirectory),
            0x0F => Ok(Self::Notify),
            0x10 => Ok(Self::GetInfo),
            0x11 => Ok(Self::SetInfo),
            0x12 => Ok(Self::Break),
            _ => Err(crate::Error::ParseError(format!(
                "Invalid SMB2 command: 0x{:04x}",
                value
            ))),
        }
    }
}

bitflags! {
    /// SMB2 header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb2HeaderFlags: u32 {
        const SERVER_TO_REDIR = 0x00000001;
        const ASYNC_COMMAND = 0x00000002;
        const RELATED_OPERATIONS = 0x00000004;
        const SIGNED = 0x00000008;
        const DFS_OPERATIONS = 0x10000000;
        const REPLAY_OPERATION = 0x20000000;
    }
}

bitflags! {
    /// SMB2 negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// SMB1 negotiate security mode bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb1SecurityMode: u8 {
        const USER_SECURITY = 0x01;
        const ENCRYPT_PASSWORDS = 0x02;
        const SIGNATURES_ENABLED = 0x04;
        const SIGNATURES_REQUIRED = 0x08;
    }
}

bitflags! {
    /// SMB2 capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb2Capabilities: u32 {
        const DFS = 0x00000001;
        const LEASING = 0x00000002;
        const LARGE_MTU = 0x00000004;
        const MULTI_CHANNEL = 0x00000008;
        const PERSISTENT_HANDLES = 0x00000010;
        const DIRECTORY_LEASING = 0x00000020;
        const ENCRYPTION = 0x00000040;
    }
}

bitflags! {
    /// SESSION_SETUP response session flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u16 {
        const IS_GUEST = 0x0001;
        const IS_NULL = 0x0002;
        const ENCRYPT_DATA = 0x0004;
    }
}

bitflags! {
    /// Share flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareFlags: u32 {
        const DFS = 0x00000001;
        const DFS_ROOT = 0x00000002;
        const RESTRICT_EXCLUSIVE_OPENS = 0x00000100;
        const FORCE_SHARED_DELETE = 0x00000200;
        const ALLOW_NAMESPACE_CACHING = 0x00000400;
        const ACCESS_BASED_DIRECTORY_ENUM = 0x00000800;
        const ENCRYPT_DATA = 0x00008000;
    }
}

bitflags! {
    /// Share capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareCapabilities: u32 {
        const DFS = 0x00000008;
        const CONTINUOUS_AVAILABILITY = 0x00000010;
        const SCALEOUT = 0x00000020;
        const CLUSTER = 0x00000040;
        const ASYMMETRIC = 0x00000080;
    }
}

/// Share type reported by TREE_CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShareType {
    Disk = 0x01,
    Pipe = 0x02,
    Print = 0x03,
}

impl TryFrom<u8> for ShareType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Disk),
            0x02 => Ok(Self::Pipe),
            0x03 => Ok(Self::Print),
            _ => Err(crate::Error::ParseError(format!(
                "Unknown share type: 0x{:02x}",
                value
            ))),
        }
    }
}

/// Encryption cipher ids from the ENCRYPTION_CAPABILITIES negotiate context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CipherId {
    Aes128Ccm = 0x0001,
    Aes128Gcm = 0x0002,
    Aes256Ccm = 0x0003,
    Aes256Gcm = 0x0004,
}

impl CipherId {
    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CipherId::Aes128Ccm | CipherId::Aes128Gcm => 16,
            CipherId::Aes256Ccm | CipherId::Aes256Gcm => 32,
        }
    }

    /// Nonce length used on the wire (the transform header field is 16 bytes)
    pub fn nonce_len(self) -> usize {
        match self {
            CipherId::Aes128Ccm | CipherId::Aes256Ccm => 11,
            CipherId::Aes128Gcm | CipherId::Aes256Gcm => 12,
        }
    }
}

impl TryFrom<u16> for CipherId {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Aes128Ccm),
            0x0002 => Ok(Self::Aes128Gcm),
            0x0003 => Ok(Self::Aes256Ccm),
            0x0004 => Ok(Self::Aes256Gcm),
            _ => Err(crate::Error::Unsupported(format!(
                "Unknown cipher id: 0x{:04x}",
                value
            ))),
        }
    }
}

/// Hash algorithm ids from the PREAUTH_INTEGRITY_CAPABILITIES negotiate context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HashAlgorithmId {
    Sha512 = 0x0001,
}

impl TryFrom<u16> for HashAlgorithmId {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Sha512),
            _ => Err(crate::Error::Unsupported(format!(
                "Unknown preauth hash algorithm: 0x{:04x}",
                value
            ))),
        }
    }
}
