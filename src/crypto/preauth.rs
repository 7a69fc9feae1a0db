//! SMB 3.1.1 preauthentication integrity
//!
//! The negotiate exchange and every session setup message are folded into a
//! running hash `H = Hash(H_prev ‖ message)`. The connection-level value seeds
//! each session's chain; the final session value becomes the KDF context for
//! signing and encryption keys.

use crate::error::{Error, Result};
use crate::protocol::HashAlgorithmId;
use sha2::{Digest, Sha512};

/// Hash algorithm negotiated for preauth integrity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreauthHashAlgorithm {
    Sha512,
}

impl PreauthHashAlgorithm {
    pub fn digest_len(self) -> usize {
        match self {
            PreauthHashAlgorithm::Sha512 => 64,
        }
    }

    /// All-zero starting value
    pub fn initial(self) -> Vec<u8> {
        vec![0u8; self.digest_len()]
    }

    /// `Hash(prior ‖ message)`
    pub fn chain(self, prior: &[u8], message: &[u8]) -> Vec<u8> {
        match self {
            PreauthHashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(prior);
                hasher.update(message);
                hasher.finalize().to_vec()
            }
        }
    }
}

impl From<HashAlgorithmId> for PreauthHashAlgorithm {
    fn from(id: HashAlgorithmId) -> Self {
        match id {
            HashAlgorithmId::Sha512 => PreauthHashAlgorithm::Sha512,
        }
    }
}

/// Running preauth hash of one session setup
#[derive(Debug, Clone)]
pub struct PreauthIntegrity {
    session_id: u64,
    algorithm: PreauthHashAlgorithm,
    hash: Vec<u8>,
    valid: bool,
}

impl PreauthIntegrity {
    /// Start a session chain from the connection hash
    pub fn new(algorithm: PreauthHashAlgorithm, connection_hash: Vec<u8>) -> Self {
        Self {
            session_id: 0,
            algorithm,
            hash: connection_hash,
            valid: true,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    pub fn algorithm(&self) -> PreauthHashAlgorithm {
        self.algorithm
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Current hash value; fails once the context has been invalidated
    pub fn hash(&self) -> Result<&[u8]> {
        if !self.valid {
            return Err(Error::Integrity(
                "preauth integrity context is invalid".to_string(),
            ));
        }
        Ok(&self.hash)
    }

    /// Fold the next raw message into the chain
    pub fn update(&mut self, message: &[u8]) -> Result<()> {
        if !self.valid {
            return Err(Error::Integrity(
                "preauth integrity context is invalid".to_string(),
            ));
        }
        self.hash = self.algorithm.chain(&self.hash, message);
        Ok(())
    }

    /// Compare against a value computed elsewhere; a mismatch invalidates permanently
    pub fn verify(&mut self, expected: &[u8]) -> Result<()> {
        if self.hash()? != expected {
            self.invalidate();
            return Err(Error::Integrity(
                "preauth integrity hash mismatch".to_string(),
            ));
        }
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}
