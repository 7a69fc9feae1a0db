//! Connection security primitives: key derivation, preauth integrity,
//! message signing and transform encryption

pub mod encryption;
pub mod kdf;
pub mod preauth;
pub mod signing;

pub use encryption::{EncryptionContext, TRANSFORM_HEADER_SIZE};
pub use preauth::{PreauthHashAlgorithm, PreauthIntegrity};
pub use signing::{SigningAlgorithm, SigningDigest};
