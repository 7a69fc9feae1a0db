//! Negotiation outcome
//!
//! SMB1 and SMB2/3 negotiate responses share little: the legacy encryption
//! key only exists in the first family, cipher and preauth hash selection
//! only in the second. `Negotiation` keeps them apart and exposes the common
//! view through shared accessors.

use super::dialect::Dialect;
use super::smb2_constants::{
    CipherId, HashAlgorithmId, SecurityMode, Smb1SecurityMode, Smb2Capabilities,
};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use uuid::Uuid;

/// SMB1 NT LM 0.12 negotiate response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb1Negotiation {
    pub security_mode: Smb1SecurityMode,
    pub capabilities: u32,
    pub max_buffer_size: u32,
    pub max_mpx_count: u16,
    pub session_key: u32,
    /// Challenge for legacy (non extended security) authentication
    pub encryption_key: Option<Vec<u8>>,
    pub server_guid: Option<Uuid>,
    pub security_blob: Vec<u8>,
    pub domain_name: Option<String>,
}

/// SMB2/SMB3 negotiate response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Negotiation {
    pub dialect_revision: u16,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub server_guid: Uuid,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub security_blob: Vec<u8>,
    /// Preauth hash algorithm selected by a 3.1.1 server
    pub preauth_hash_algorithm: Option<HashAlgorithmId>,
    /// Cipher selected by a 3.1.1 server
    pub cipher: Option<CipherId>,
}

impl Smb2Negotiation {
    /// Server answered a multi-protocol negotiate with 0x02FF and expects an SMB2 negotiate
    pub fn is_wildcard(&self) -> bool {
        self.dialect_revision == super::dialect::SMB2_WILDCARD_REVISION
    }
}

/// Tagged negotiation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    Smb1(Smb1Negotiation),
    Smb2(Smb2Negotiation),
}

impl Negotiation {
    pub fn is_smb2(&self) -> bool {
        matches!(self, Negotiation::Smb2(_))
    }

    /// Selected dialect
    pub fn dialect(&self) -> Result<Dialect> {
        match self {
            Negotiation::Smb1(_) => Ok(Dialect::Smb1),
            Negotiation::Smb2(n) => Dialect::try_from(n.dialect_revision),
        }
    }

    pub fn capabilities(&self) -> u32 {
        match self {
            Negotiation::Smb1(n) => n.capabilities,
            Negotiation::Smb2(n) => n.capabilities.bits(),
        }
    }

    pub fn has_capability(&self, cap: u32) -> bool {
        self.capabilities() & cap == cap
    }

    pub fn signing_enabled(&self) -> bool {
        match self {
            Negotiation::Smb1(n) => n
                .security_mode
                .intersects(Smb1SecurityMode::SIGNATURES_ENABLED | Smb1SecurityMode::SIGNATURES_REQUIRED),
            Negotiation::Smb2(n) => n
                .security_mode
                .intersects(SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED),
        }
    }

    pub fn signing_required(&self) -> bool {
        match self {
            Negotiation::Smb1(n) => n
                .security_mode
                .contains(Smb1SecurityMode::SIGNATURES_REQUIRED),
            Negotiation::Smb2(n) => n.security_mode.contains(SecurityMode::SIGNING_REQUIRED),
        }
    }

    /// Sessions on this connection must install a signing digest
    ///
    /// SMB1 signs whenever both sides enable it, SMB2 only when required.
    pub fn signing_negotiated(&self) -> bool {
        match self {
            Negotiation::Smb1(_) => self.signing_enabled(),
            Negotiation::Smb2(_) => self.signing_required(),
        }
    }

    pub fn security_blob(&self) -> &[u8] {
        match self {
            Negotiation::Smb1(n) => &n.security_blob,
            Negotiation::Smb2(n) => &n.security_blob,
        }
    }

    pub fn max_transact_size(&self) -> u32 {
        match self {
            Negotiation::Smb1(n) => n.max_buffer_size,
            Negotiation::Smb2(n) => n.max_transact_size,
        }
    }

    pub fn max_read_size(&self) -> u32 {
        match self {
            Negotiation::Smb1(n) => n.max_buffer_size,
            Negotiation::Smb2(n) => n.max_read_size,
        }
    }

    pub fn max_write_size(&self) -> u32 {
        match self {
            Negotiation::Smb1(n) => n.max_buffer_size,
            Negotiation::Smb2(n) => n.max_write_size,
        }
    }

    /// Legacy SMB1 encryption key
    pub fn encryption_key(&self) -> Result<Option<&[u8]>> {
        match self {
            Negotiation::Smb1(n) => Ok(n.encryption_key.as_deref()),
            Negotiation::Smb2(_) => Err(Error::Unsupported(
                "SMB2 negotiation carries no server encryption key".to_string(),
            )),
        }
    }

    /// Preauth hash algorithm selected by the server
    pub fn preauth_hash_algorithm(&self) -> Result<Option<HashAlgorithmId>> {
        match self {
            Negotiation::Smb2(n) => Ok(n.preauth_hash_algorithm),
            Negotiation::Smb1(_) => Err(Error::Unsupported(
                "SMB1 has no preauth integrity".to_string(),
            )),
        }
    }

    /// Cipher selected by the server
    pub fn cipher(&self) -> Result<Option<CipherId>> {
        match self {
            Negotiation::Smb2(n) => Ok(n.cipher),
            Negotiation::Smb1(_) => Err(Error::Unsupported(
                "SMB1 has no transform encryption".to_string(),
            )),
        }
    }

    /// A transport with this negotiation may serve another caller
    pub fn can_reuse(&self, force_signing: bool) -> bool {
        !force_signing || self.signing_enabled()
    }

    /// Reject outcomes the client configuration forbids
    pub fn validate(&self, config: &ClientConfig) -> Result<()> {
        let dialect = self.dialect()?;
        if dialect < config.min_dialect || dialect > config.max_dialect {
            return Err(Error::Unsupported(format!(
                "Server selected {} outside the configured range {}..={}",
                dialect, config.min_dialect, config.max_dialect
            )));
        }
        if config.signing_enforced && !self.signing_enabled() {
            return Err(Error::Unsupported(
                "Signing is enforced but the server does not support it".to_string(),
            ));
        }
        if let Negotiation::Smb2(n) = self {
            if dialect == Dialect::Smb311 && n.preauth_hash_algorithm.is_none() {
                return Err(Error::Integrity(
                    "SMB 3.1.1 negotiation without preauth hash algorithm".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn smb2_negotiation(dialect: Dialect, security_mode: SecurityMode) -> Negotiation {
    Negotiation::Smb2(Smb2Negotiation {
        dialect_revision: dialect.revision().unwrap_or(0x0202),
        security_mode,
        capabilities: Smb2Capabilities::DFS | Smb2Capabilities::ENCRYPTION,
        server_guid: Uuid::nil(),
        max_transact_size: 65536,
        max_read_size: 65536,
        max_write_size: 65536,
        security_blob: Vec::new(),
        preauth_hash_algorithm: (dialect == Dialect::Smb311).then_some(HashAlgorithmId::Sha512),
        cipher: None,
    })
}
