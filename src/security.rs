//! Artifact verification: SHA-256 integrity plus Ed25519 authenticity.
//!
//! Used by the downloadexec task and by binary self-upgrade. Verification
//! is all-or-nothing; callers must not execute anything a failed
//! verification touched.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// How the verifying key is supplied: a preloaded key id, or the key
/// itself inline (base64, 32 bytes).
#[derive(Debug, Clone)]
pub enum KeyRef {
    Id(String),
    Inline(String),
}

#[derive(Default)]
pub struct Verifier {
    keys: HashMap<String, VerifyingKey>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key_id: &str, key: VerifyingKey) {
        self.keys.insert(key_id.to_string(), key);
    }

    /// Loads a key from its base64 encoding, as carried in config files
    /// and upgrade messages.
    pub fn add_key_b64(&mut self, key_id: &str, key_b64: &str) -> Result<()> {
        let key = decode_key(key_b64)?;
        self.add_key(key_id, key);
        Ok(())
    }

    /// Checks the SHA-256 digest of `bytes` against `sha256_hex`
    /// (constant-time), then verifies the Ed25519 `signature_b64` with
    /// the referenced key. Any failure means the bytes must not be used.
    pub fn verify(
        &self,
        bytes: &[u8],
        sha256_hex: &str,
        signature_b64: &str,
        key: &KeyRef,
    ) -> Result<()> {
        self.verify_digest(bytes, sha256_hex)?;
        self.verify_signature(bytes, signature_b64, key)
    }

    /// SHA-256 only; used when a workflow supplies no signature.
    pub fn verify_digest(&self, bytes: &[u8], sha256_hex: &str) -> Result<()> {
        let expected = hex::decode(sha256_hex)
            .map_err(|_| Error::InvalidInput("sha256 is not valid hex".to_string()))?;
        let actual = Sha256::digest(bytes);
        let matches = expected.len() == actual.len()
            && actual.as_slice().ct_eq(expected.as_slice()).unwrap_u8() == 1;
        if !matches {
            return Err(Error::IntegrityFailure {
                context: "sha256 digest".to_string(),
            });
        }
        Ok(())
    }

    pub fn verify_signature(
        &self,
        bytes: &[u8],
        signature_b64: &str,
        key: &KeyRef,
    ) -> Result<()> {
        let sig_bytes = BASE64
            .decode(signature_b64)
            .map_err(|_| Error::InvalidInput("signature is not valid base64".to_string()))?;
        let sig_bytes: [u8; SIGNATURE_LENGTH] = sig_bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "signature must be {SIGNATURE_LENGTH} bytes"
            ))
        })?;
        let signature = Signature::from_bytes(&sig_bytes);

        let verifying_key = match key {
            KeyRef::Id(id) => *self
                .keys
                .get(id)
                .ok_or_else(|| Error::UnknownKey(id.clone()))?,
            KeyRef::Inline(b64) => decode_key(b64)?,
        };

        verifying_key
            .verify_strict(bytes, &signature)
            .map_err(|_| Error::SignatureFailure)
    }
}

fn decode_key(key_b64: &str) -> Result<VerifyingKey> {
    let key_bytes = BASE64
        .decode(key_b64)
        .map_err(|_| Error::InvalidInput("public key is not valid base64".to_string()))?;
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = key_bytes.try_into().map_err(|_| {
        Error::InvalidInput(format!("public key must be {PUBLIC_KEY_LENGTH} bytes"))
    })?;
    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| Error::InvalidInput("public key is not a valid Ed25519 point".to_string()))
}

/// Hex digest helper shared by tests and the upgrade path.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
