//! NetBIOS name encoding for the session service
//!
//! Only first-level encoding is needed: the client never resolves NetBIOS
//! names itself, it only names both ends of a port 139 session request.

use crate::error::{Error, Result};
use std::net::IpAddr;

/// Maximum NetBIOS name length (before padding)
pub const NETBIOS_NAME_MAX_LEN: usize = 15;

/// NetBIOS name length after padding
pub const NETBIOS_NAME_LEN: usize = 16;

/// NetBIOS encoded name length (after encoding, each byte becomes 2 bytes)
pub const NETBIOS_ENCODED_NAME_LEN: usize = 32;

/// Generic called name accepted by most servers
pub const SMBSERVER_NAME: &str = "*SMBSERVER";

/// NetBIOS name types (16th byte)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetBiosNameType {
    /// Workstation service
    Workstation = 0x00,
    /// File server service
    FileServer = 0x20,
}

/// Encode a NetBIOS name using the RFC 1001 algorithm
///
/// Each byte is split into two 4-bit values and added to 'A' (0x41)
/// For example: 'A' (0x41) becomes "EB" (0x45, 0x42)
pub fn encode_netbios_name(
    name: &str,
    name_type: NetBiosNameType,
) -> Result<[u8; NETBIOS_ENCODED_NAME_LEN]> {
    if name.len() > NETBIOS_NAME_MAX_LEN {
        return Err(Error::InvalidNetBiosName(format!(
            "Name '{}' exceeds maximum length {}",
            name, NETBIOS_NAME_MAX_LEN
        )));
    }

    let mut padded = [0x20u8; NETBIOS_NAME_LEN];
    padded[..name.len()].copy_from_slice(name.to_ascii_uppercase().as_bytes());
    padded[15] = name_type as u8;

    let mut encoded = [0u8; NETBIOS_ENCODED_NAME_LEN];
    for (i, &byte) in padded.iter().enumerate() {
        encoded[i * 2] = b'A' + ((byte >> 4) & 0x0F);
        encoded[i * 2 + 1] = b'A' + (byte & 0x0F);
    }

    Ok(encoded)
}

/// Length-prefixed encoded name with an empty scope, as carried in a session request
pub fn session_name(name: &str, name_type: NetBiosNameType) -> Result<Vec<u8>> {
    let encoded = encode_netbios_name(name, name_type)?;
    let mut result = Vec::with_capacity(NETBIOS_ENCODED_NAME_LEN + 2);
    result.push(NETBIOS_ENCODED_NAME_LEN as u8);
    result.extend_from_slice(&encoded);
    result.push(0);
    Ok(result)
}

/// Called names to try for a server, most specific first
///
/// A host name contributes its first label (truncated to 15 characters);
/// IP literals only get the generic `*SMBSERVER` name.
pub fn called_names(host_name: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(2);
    if host_name.parse::<IpAddr>().is_err() {
        let label = host_name.split('.').next().unwrap_or(host_name);
        if !label.is_empty() {
            let label: String = label.chars().take(NETBIOS_NAME_MAX_LEN).collect();
            names.push(label.to_ascii_uppercase());
        }
    }
    names.push(SMBSERVER_NAME.to_string());
    names
}
