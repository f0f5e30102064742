//! Decryption engines
//!
//! The worker delegates the actual cryptography to a [`DecryptionEngine`].
//! Two engines ship with the crate: [`MirrorEngine`], the byte-reversal
//! demo cipher used by the scripted walkthrough, and [`SharedKeyEngine`],
//! ChaCha20-Poly1305 under a symmetric key the worker holds.

use std::fmt::{self, Debug};

use async_trait::async_trait;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;

use unseal_core::Identity;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Why an engine could not produce a plaintext.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The blob is not in the shape this engine expects.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// The cryptographic operation itself failed.
    #[error("decryption failed: {0}")]
    Failed(String),
}

/// Turns stored ciphertext blobs back into plaintexts.
///
/// The requesting party is passed through so that engines binding
/// ciphertexts to an audience can refuse mismatched requests; the
/// bundled engines ignore it.
#[async_trait]
pub trait DecryptionEngine: Send + Sync {
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        requester: &Identity,
    ) -> Result<Vec<u8>, EngineError>;
}

/// The demo cipher: ciphertext is the plaintext reversed.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorEngine;

impl MirrorEngine {
    /// Produce a blob this engine can open.
    pub fn seal(plaintext: &[u8]) -> Vec<u8> {
        plaintext.iter().rev().copied().collect()
    }
}

#[async_trait]
impl DecryptionEngine for MirrorEngine {
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        _requester: &Identity,
    ) -> Result<Vec<u8>, EngineError> {
        Ok(ciphertext.iter().rev().copied().collect())
    }
}

/// ChaCha20-Poly1305 under a symmetric key the worker holds.
///
/// Blobs are framed as nonce || ciphertext, the layout
/// [`SharedKeyEngine::seal`] produces.
#[derive(Clone)]
pub struct SharedKeyEngine {
    key: [u8; KEY_SIZE],
}

impl SharedKeyEngine {
    /// Generate an engine with a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Create an engine from raw key bytes.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use with caution).
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Encrypt a plaintext into the nonce || ciphertext framing.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }
}

impl Debug for SharedKeyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the key
        write!(f, "SharedKeyEngine(..)")
    }
}

#[async_trait]
impl DecryptionEngine for SharedKeyEngine {
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        _requester: &Identity,
    ) -> Result<Vec<u8>, EngineError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(EngineError::Malformed(
                "blob too short for nonce".to_string(),
            ));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| EngineError::Failed(e.to_string()))?;

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &ciphertext[NONCE_SIZE..])
            .map_err(|e| EngineError::Failed(e.to_string()))
    }
}
