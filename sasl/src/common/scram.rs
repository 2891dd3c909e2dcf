//! Hashing primitives and nonce sources for SCRAM-SHA-1.

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use hmac::{digest::InvalidLength, Hmac, Mac};
use pbkdf2::pbkdf2;
use sha1::{Digest, Sha1};

use crate::client::MechanismError;

type HmacSha1 = Hmac<Sha1>;

/// Size in bytes of a SHA-1 digest, and so of every value derived below.
pub const SHA1_OUTPUT_SIZE: usize = 20;

/// Hashes the data with SHA-1.
pub fn sha1(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

/// HMAC-SHA-1 (RFC 2104) of `message` under `key`.
pub fn hmac_sha1(key: &[u8], message: &[u8]) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// PBKDF2 (RFC 2898) with HMAC-SHA-1, deriving a single 20 byte block.
///
/// This is the `Hi()` function of RFC 5802.
pub fn pbkdf2_sha1(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, InvalidLength> {
    let mut result = vec![0; SHA1_OUTPUT_SIZE];
    pbkdf2::<HmacSha1>(password, salt, iterations, &mut result)?;
    Ok(result)
}

/// Where SCRAM client nonces come from.
pub trait NonceSource {
    /// Returns a fresh printable nonce, which must not contain `,`.
    fn nonce(&self) -> Result<String, MechanismError>;
}

/// The default nonce source, backed by the operating system's RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomNonce;

impl NonceSource for RandomNonce {
    fn nonce(&self) -> Result<String, MechanismError> {
        let mut data = [0u8; 24];
        getrandom::getrandom(&mut data).map_err(|_| MechanismError::CannotGenerateNonce)?;
        Ok(Base64.encode(data))
    }
}

/// Always hands out the same nonce, for reproducible exchanges in tests.
#[derive(Clone, Debug)]
pub struct FixedNonce(String);

impl FixedNonce {
    /// Creates a source returning `nonce` every time.
    pub fn new<N: Into<String>>(nonce: N) -> FixedNonce {
        FixedNonce(nonce.into())
    }
}

impl NonceSource for FixedNonce {
    fn nonce(&self) -> Result<String, MechanismError> {
        Ok(self.0.clone())
    }
}
