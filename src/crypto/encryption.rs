//! SMB3 transform encryption
//!
//! Encrypted messages travel inside a 52-byte transform header:
//!
//! | offset | size | field                 |
//! |--------|------|-----------------------|
//! | 0      | 4    | 0xFD 'S' 'M' 'B'      |
//! | 4      | 16   | AEAD tag              |
//! | 20     | 16   | nonce (zero padded)   |
//! | 36     | 4    | original message size |
//! | 40     | 2    | reserved              |
//! | 42     | 2    | flags (encrypted = 1) |
//! | 44     | 8    | session id            |
//!
//! Bytes 20..52 are the associated data.

use super::kdf::derive_key;
use crate::error::{Error, Result};
use crate::protocol::{CipherId, Dialect, SMB2_TRANSFORM_MAGIC};
use aes::{Aes128, Aes256};
use aes_gcm::aead::{self, Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use byteorder::{ByteOrder, LittleEndian};
use ccm::consts::{U11, U16};
use ccm::Ccm;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};

type Aes128Ccm = Ccm<Aes128, U16, U11>;
type Aes256Ccm = Ccm<Aes256, U16, U11>;

/// Transform header size
pub const TRANSFORM_HEADER_SIZE: usize = 52;

const TAG_SIZE: usize = 16;
const AAD_OFFSET: usize = 20;
const FLAG_ENCRYPTED: u16 = 0x0001;

/// Keys and cipher of one encrypted session
pub struct EncryptionContext {
    dialect: Dialect,
    cipher: CipherId,
    encryption_key: Vec<u8>,
    decryption_key: Vec<u8>,
    nonce_salt: [u8; 4],
    nonce_counter: AtomicU64,
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("dialect", &self.dialect)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl EncryptionContext {
    /// Derive client-to-server and server-to-client keys for `cipher`
    pub fn new(
        dialect: Dialect,
        cipher: CipherId,
        session_key: &[u8],
        preauth_hash: Option<&[u8]>,
    ) -> Result<Self> {
        let (encryption_key, decryption_key) = if dialect == Dialect::Smb311 {
            let context = preauth_hash.ok_or_else(|| {
                Error::Integrity("SMB 3.1.1 encryption requires the preauth hash".to_string())
            })?;
            let len = cipher.key_len();
            (
                derive_key(session_key, b"SMBC2SCipherKey\0", context, len)?,
                derive_key(session_key, b"SMBS2CCipherKey\0", context, len)?,
            )
        } else if dialect.is_smb3() {
            if cipher != CipherId::Aes128Ccm {
                return Err(Error::Unsupported(format!(
                    "{:?} is not available before SMB 3.1.1",
                    cipher
                )));
            }
            (
                derive_key(session_key, b"SMB2AESCCM\0", b"ServerIn \0", 16)?,
                derive_key(session_key, b"SMB2AESCCM\0", b"ServerOut\0", 16)?,
            )
        } else {
            return Err(Error::Unsupported(format!(
                "Encryption is not supported by {}",
                dialect
            )));
        };

        let mut nonce_salt = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut nonce_salt);

        Ok(Self {
            dialect,
            cipher,
            encryption_key,
            decryption_key,
            nonce_salt,
            nonce_counter: AtomicU64::new(0),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cipher(&self) -> CipherId {
        self.cipher
    }

    /// Wrap a plain SMB2 message in a transform header
    pub fn encrypt_message(&self, message: &[u8], session_id: u64) -> Result<Vec<u8>> {
        let nonce = self.next_nonce();

        let mut out = vec![0u8; TRANSFORM_HEADER_SIZE];
        out[0..4].copy_from_slice(&SMB2_TRANSFORM_MAGIC);
        out[20..20 + nonce.len()].copy_from_slice(&nonce);
        LittleEndian::write_u32(&mut out[36..40], message.len() as u32);
        LittleEndian::write_u16(&mut out[42..44], FLAG_ENCRYPTED);
        LittleEndian::write_u64(&mut out[44..52], session_id);

        let sealed = self.seal(&nonce, message, &out[AAD_OFFSET..TRANSFORM_HEADER_SIZE])?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
        out[4..20].copy_from_slice(tag);
        out.extend_from_slice(ciphertext);
        Ok(out)
    }

    /// Unwrap a transform message into the plain SMB2 message
    pub fn decrypt_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        if message.len() < TRANSFORM_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                need: TRANSFORM_HEADER_SIZE,
                have: message.len(),
            });
        }
        if message[0..4] != SMB2_TRANSFORM_MAGIC {
            return Err(Error::InvalidHeader(
                "Missing transform header".to_string(),
            ));
        }

        let original_size = LittleEndian::read_u32(&message[36..40]) as usize;
        let ciphertext = &message[TRANSFORM_HEADER_SIZE..];
        if ciphertext.len() != original_size {
            return Err(Error::CryptoError(format!(
                "transform size mismatch: header says {}, got {}",
                original_size,
                ciphertext.len()
            )));
        }

        let nonce = &message[20..20 + self.cipher.nonce_len()];
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(&message[4..20]);

        self.open(nonce, &sealed, &message[AAD_OFFSET..TRANSFORM_HEADER_SIZE])
    }

    /// Server side of the same session: keys swapped
    #[cfg(test)]
    pub(crate) fn peer(&self) -> Self {
        Self {
            dialect: self.dialect,
            cipher: self.cipher,
            encryption_key: self.decryption_key.clone(),
            decryption_key: self.encryption_key.clone(),
            nonce_salt: [9, 9, 9, 9],
            nonce_counter: AtomicU64::new(0),
        }
    }

    /// Counter nonce; unique for the life of the context
    fn next_nonce(&self) -> Vec<u8> {
        let counter = self.nonce_counter.fetch_add(1, Ordering::SeqCst);
        let mut nonce = Vec::with_capacity(self.cipher.nonce_len());
        nonce.extend_from_slice(&counter.to_le_bytes());
        nonce.extend_from_slice(&self.nonce_salt[..self.cipher.nonce_len() - 8]);
        nonce
    }

    fn seal(&self, nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let key = &self.encryption_key;
        match self.cipher {
            CipherId::Aes128Ccm => seal_with::<Aes128Ccm>(key, nonce, msg, aad),
            CipherId::Aes128Gcm => seal_with::<Aes128Gcm>(key, nonce, msg, aad),
            CipherId::Aes256Ccm => seal_with::<Aes256Ccm>(key, nonce, msg, aad),
            CipherId::Aes256Gcm => seal_with::<Aes256Gcm>(key, nonce, msg, aad),
        }
    }

    fn open(&self, nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let key = &self.decryption_key;
        match self.cipher {
            CipherId::Aes128Ccm => open_with::<Aes128Ccm>(key, nonce, msg, aad),
            CipherId::Aes128Gcm => open_with::<Aes128Gcm>(key, nonce, msg, aad),
            CipherId::Aes256Ccm => open_with::<Aes256Ccm>(key, nonce, msg, aad),
            CipherId::Aes256Gcm => open_with::<Aes256Gcm>(key, nonce, msg, aad),
        }
    }
}

fn seal_with<A: Aead + KeyInit>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = A::new_from_slice(key)
        .map_err(|_| Error::CryptoError("invalid encryption key length".to_string()))?;
    cipher
        .encrypt(aead::Nonce::<A>::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| Error::CryptoError("message encryption failed".to_string()))
}

fn open_with<A: Aead + KeyInit>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = A::new_from_slice(key)
        .map_err(|_| Error::CryptoError("invalid decryption key length".to_string()))?;
    cipher
        .decrypt(aead::Nonce::<A>::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| Error::CryptoError("message authentication failed".to_string()))
}
