//! SP800-108 counter-mode key derivation with HMAC-SHA256

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derive `out_len` bytes (16 or 32) from `key` for `label` and `context`
///
/// Ko = HMAC-SHA256(Ki, i ‖ Label ‖ 0x00 ‖ Context ‖ L) with i = 1 and L in bits,
/// both big-endian 32-bit. One block covers every SMB key size.
pub fn derive_key(key: &[u8], label: &[u8], context: &[u8], out_len: usize) -> Result<Vec<u8>> {
    if out_len != 16 && out_len != 32 {
        return Err(Error::CryptoError(format!(
            "unsupported derived key length {}",
            out_len
        )));
    }

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::CryptoError(format!("invalid KDF key: {}", e)))?;
    mac.update(&1u32.to_be_bytes());
    mac.update(label);
    mac.update(&[0u8]);
    mac.update(context);
    mac.update(&((out_len as u32) * 8).to_be_bytes());

    let block = mac.finalize().into_bytes();
    Ok(block[..out_len].to_vec())
}
