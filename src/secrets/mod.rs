//! Encrypted remote persistence of the session credential.
//!
//! Values are sealed against the store's public key before they leave the
//! process; only the store can open them.

mod github;

pub use github::GithubSecretStore;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;
use secrecy::SecretString;

use crate::error::RotateError;

/// Destination for the rotated session credential.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Seal `plaintext` and publish it under `name`.
    async fn rotate(&self, name: &str, plaintext: &SecretString) -> Result<(), RotateError>;
}

/// Store used when no destination is configured. Every rotation is a soft failure.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredSecretStore;

#[async_trait]
impl SecretStore for UnconfiguredSecretStore {
    async fn rotate(&self, _name: &str, _plaintext: &SecretString) -> Result<(), RotateError> {
        Err(RotateError::NotConfigured)
    }
}

/// A value sealed for one recipient key. Consumed by the publish call.
pub struct SealedSecret {
    encrypted_value: String,
    key_id: String,
}

impl SealedSecret {
    /// Base64 of the sealed box.
    pub fn encrypted_value(&self) -> &str {
        &self.encrypted_value
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret")
            .field("encrypted_value", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Seal `plaintext` for the holder of the base64 X25519 `public_key`.
///
/// Output is a libsodium `crypto_box_seal` box: an ephemeral public key
/// followed by the XSalsa20-Poly1305 ciphertext.
pub fn seal(public_key: &str, key_id: &str, plaintext: &[u8]) -> Result<SealedSecret, RotateError> {
    let key_bytes = BASE64
        .decode(public_key.trim())
        .map_err(|e| RotateError::InvalidKey(e.to_string()))?;
    let key_bytes: [u8; crypto_box::KEY_SIZE] = key_bytes.try_into().map_err(|bytes: Vec<u8>| {
        RotateError::InvalidKey(format!(
            "expected {} bytes, got {}",
            crypto_box::KEY_SIZE,
            bytes.len()
        ))
    })?;

    let sealed = PublicKey::from(key_bytes)
        .seal(&mut OsRng, plaintext)
        .map_err(|_| RotateError::Seal)?;

    Ok(SealedSecret {
        encrypted_value: BASE64.encode(sealed),
        key_id: key_id.to_string(),
    })
}
