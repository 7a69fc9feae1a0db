//! SMB2/SMB3 message signing

use super::kdf::derive_key;
use crate::error::{Error, Result};
use crate::protocol::{
    Dialect, Smb2HeaderFlags, SMB2_HEADER_SIZE, SMB2_SIGNATURE_OFFSET, SMB2_SIGNATURE_SIZE,
};
use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;

const FLAGS_RANGE: std::ops::Range<usize> = 16..20;
const SIG_RANGE: std::ops::Range<usize> =
    SMB2_SIGNATURE_OFFSET..SMB2_SIGNATURE_OFFSET + SMB2_SIGNATURE_SIZE;

/// MAC used for signing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    /// SMB 2.0.2 and 2.1
    HmacSha256,
    /// SMB 3.x
    AesCmac,
}

/// Signing key and algorithm of one session
pub struct SigningDigest {
    algorithm: SigningAlgorithm,
    key: [u8; 16],
}

impl std::fmt::Debug for SigningDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningDigest")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningDigest {
    /// Build the digest for a session key
    ///
    /// `preauth_hash` is required for SMB 3.1.1 and ignored otherwise.
    pub fn new(session_key: &[u8], dialect: Dialect, preauth_hash: Option<&[u8]>) -> Result<Self> {
        if !dialect.is_smb2() {
            return Err(Error::Unsupported(
                "SMB1 signing is handled by the message codec".to_string(),
            ));
        }

        let (algorithm, derived) = if dialect == Dialect::Smb311 {
            let context = preauth_hash.ok_or_else(|| {
                Error::Integrity("SMB 3.1.1 signing requires the preauth hash".to_string())
            })?;
            (
                SigningAlgorithm::AesCmac,
                derive_key(session_key, b"SMBSigningKey\0", context, 16)?,
            )
        } else if dialect.is_smb3() {
            (
                SigningAlgorithm::AesCmac,
                derive_key(session_key, b"SMB2AESCMAC\0", b"SmbSign\0", 16)?,
            )
        } else {
            (SigningAlgorithm::HmacSha256, session_key.to_vec())
        };

        let mut key = [0u8; 16];
        let n = derived.len().min(16);
        key[..n].copy_from_slice(&derived[..n]);
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Set the SIGNED flag and write the signature into an outgoing message
    pub fn sign(&self, message: &mut [u8]) -> Result<()> {
        check_len(message)?;
        let flags = u32::from_le_bytes([message[16], message[17], message[18], message[19]])
            | Smb2HeaderFlags::SIGNED.bits();
        message[FLAGS_RANGE].copy_from_slice(&flags.to_le_bytes());
        message[SIG_RANGE].fill(0);

        let signature = self.compute(message)?;
        message[SIG_RANGE].copy_from_slice(&signature);
        Ok(())
    }

    /// Verify the signature carried by an incoming message
    pub fn verify(&self, message: &[u8]) -> Result<()> {
        check_len(message)?;
        let mut copy = message.to_vec();
        let expected = copy[SIG_RANGE].to_vec();
        copy[SIG_RANGE].fill(0);

        let ok = match self.algorithm {
            SigningAlgorithm::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
                    .map_err(|e| Error::SigningError(e.to_string()))?;
                mac.update(&copy);
                mac.verify_truncated_left(&expected).is_ok()
            }
            SigningAlgorithm::AesCmac => {
                let mut mac = Cmac::<Aes128>::new_from_slice(&self.key)
                    .map_err(|e| Error::SigningError(e.to_string()))?;
                mac.update(&copy);
                mac.verify_truncated_left(&expected).is_ok()
            }
        };

        if ok {
            Ok(())
        } else {
            Err(Error::SigningError(
                "Signature verification failed".to_string(),
            ))
        }
    }

    fn compute(&self, data: &[u8]) -> Result<[u8; 16]> {
        let full = match self.algorithm {
            SigningAlgorithm::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
                    .map_err(|e| Error::SigningError(e.to_string()))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            SigningAlgorithm::AesCmac => {
                let mut mac = Cmac::<Aes128>::new_from_slice(&self.key)
                    .map_err(|e| Error::SigningError(e.to_string()))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        let mut signature = [0u8; 16];
        signature.copy_from_slice(&full[..16]);
        Ok(signature)
    }
}

fn check_len(message: &[u8]) -> Result<()> {
    if message.len() < SMB2_HEADER_SIZE {
        return Err(Error::BufferTooSmall {
            need: SMB2_HEADER_SIZE,
            have: message.len(),
        });
    }
    Ok(())
}
