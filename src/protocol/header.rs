//! SMB2 protocol headers

use super::smb2_constants::*;
use crate::error::{Error, NtStatus, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::convert::TryFrom;

/// SMB2 Header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub structure_size: u16,
    pub credit_charge: u16,
    pub status: u32,
    pub command: Smb2Command,
    pub credit: u16,
    pub flags: Smb2HeaderFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub process_id: u32,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    pub const SIZE: usize = SMB2_HEADER_SIZE;

    pub fn new(command: Smb2Command) -> Self {
        Self {
            structure_size: 64,
            credit_charge: 0,
            status: 0,
            command,
            credit: 1,
            flags: Smb2HeaderFlags::empty(),
            next_command: 0,
            message_id: 0,
            process_id: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    /// Parse a sync SMB2 header
    ///
    /// Async headers carry an async id where the process and tree ids sit;
    /// those eight bytes are returned split across `process_id` and `tree_id`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                need: Self::SIZE,
                have: buf.len(),
            });
        }

        if buf[0..4] != SMB2_MAGIC {
            return Err(Error::InvalidHeader("Invalid SMB2 magic".into()));
        }

        let mut signature = [0u8; 16];
        signature.copy_from_slice(&buf[SMB2_SIGNATURE_OFFSET..SMB2_SIGNATURE_OFFSET + 16]);

        Ok(Self {
            structure_size: LittleEndian::read_u16(&buf[4..6]),
            credit_charge: LittleEndian::read_u16(&buf[6..8]),
            status: LittleEndian::read_u32(&buf[8..12]),
            command: Smb2Command::try_from(LittleEndian::read_u16(&buf[12..14]))?,
            credit: LittleEndian::read_u16(&buf[14..16]),
            flags: Smb2HeaderFlags::from_bits_truncate(LittleEndian::read_u32(&buf[16..20])),
            next_command: LittleEndian::read_u32(&buf[20..24]),
            message_id: LittleEndian::read_u64(&buf[24..32]),
            process_id: LittleEndian::read_u32(&buf[32..36]),
            tree_id: LittleEndian::read_u32(&buf[36..40]),
            session_id: LittleEndian::read_u64(&buf[40..48]),
            signature,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);

        // Protocol ID: 0xFE 'S' 'M' 'B'
        buf.extend_from_slice(&SMB2_MAGIC);
        // Writes into a Vec cannot fail
        let _ = buf.write_u16::<LittleEndian>(self.structure_size);
        let _ = buf.write_u16::<LittleEndian>(self.credit_charge);
        let _ = buf.write_u32::<LittleEndian>(self.status);
        let _ = buf.write_u16::<LittleEndian>(self.command as u16);
        let _ = buf.write_u16::<LittleEndian>(self.credit);
        let _ = buf.write_u32::<LittleEndian>(self.flags.bits());
        let _ = buf.write_u32::<LittleEndian>(self.next_command);
        let _ = buf.write_u64::<LittleEndian>(self.message_id);
        let _ = buf.write_u32::<LittleEndian>(self.process_id);
        let _ = buf.write_u32::<LittleEndian>(self.tree_id);
        let _ = buf.write_u64::<LittleEndian>(self.session_id);
        buf.extend_from_slice(&self.signature);

        buf
    }
}

/// Whether the message starts with the SMB2 protocol id
pub fn is_smb2_message(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0..4] == SMB2_MAGIC
}

/// Whether the message is wrapped in an SMB2 transform header
pub fn is_transform_message(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0..4] == SMB2_TRANSFORM_MAGIC
}

/// Read the NT status of a raw SMB1 or SMB2 response without a full parse
pub fn peek_status(buf: &[u8]) -> Result<NtStatus> {
    if is_smb2_message(buf) {
        if buf.len() < Smb2Header::SIZE {
            return Err(Error::BufferTooSmall {
                need: Smb2Header::SIZE,
                have: buf.len(),
            });
        }
        return Ok(NtStatus(LittleEndian::read_u32(&buf[8..12])));
    }
    if buf.len() >= 9 && buf[0..4] == SMB1_MAGIC {
        return Ok(NtStatus(LittleEndian::read_u32(&buf[5..9])));
    }
    Err(Error::InvalidHeader("Unknown protocol id".into()))
}

/// Read the SMB2 header flags in place
pub fn peek_flags(buf: &[u8]) -> Result<Smb2HeaderFlags> {
    if !is_smb2_message(buf) || buf.len() < Smb2Header::SIZE {
        return Err(Error::InvalidHeader("Not an SMB2 message".into()));
    }
    Ok(Smb2HeaderFlags::from_bits_truncate(LittleEndian::read_u32(
        &buf[16..20],
    )))
}

/// Interim response sent by the server before the real answer
pub fn is_interim_response(buf: &[u8]) -> bool {
    match (peek_status(buf), peek_flags(buf)) {
        (Ok(status), Ok(flags)) => {
            status == NtStatus::PENDING && flags.contains(Smb2HeaderFlags::ASYNC_COMMAND)
        }
        _ => false,
    }
}
