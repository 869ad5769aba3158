//! The Crypto Context collaborator (spec §3, §6).
//!
//! The codec never inspects cipher internals: it only calls `encrypt`/
//! `decrypt` on whatever is installed for a session. A concrete stream
//! cipher is provided so the crate is exercisable end to end without a
//! second external repository supplying the cipher.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encrypt failed: {0}")]
    Encrypt(String),
    #[error("decrypt failed: {0}")]
    Decrypt(String),
}

/// External collaborator: `encrypt(payload) -> ciphertext`,
/// `decrypt(payload) -> plaintext`.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// A ChaCha20 stream cipher keyed once at session establishment. The nonce
/// is carried as an 8-byte prefix on the ciphertext so `decrypt` does not
/// need out-of-band state; this keeps `Cipher` itself stateless across
/// calls, matching the "codec never inspects internal state" contract.
pub struct ChaCha20Cipher {
    key: Zeroizing<[u8; 32]>,
}

impl ChaCha20Cipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    fn apply(&self, nonce: &[u8; 12], data: &mut [u8]) {
        let mut cipher = ChaCha20::new(self.key.as_ref().into(), nonce.into());
        cipher.apply_keystream(data);
    }
}

impl Cipher for ChaCha20Cipher {
    fn encrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; 12];
        rand::Rng::fill(&mut rand::thread_rng(), &mut nonce[4..]);
        let mut out = Vec::with_capacity(12 + payload.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(payload);
        self.apply(&nonce, &mut out[12..]);
        Ok(out)
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < 12 {
            return Err(CryptoError::Decrypt("ciphertext shorter than nonce".into()));
        }
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&payload[..12]);
        let mut out = payload[12..].to_vec();
        self.apply(&nonce, &mut out);
        Ok(out)
    }
}
