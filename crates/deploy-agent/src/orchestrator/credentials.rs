use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential encryption key is not configured")]
    MissingKey,

    #[error("credential encryption key is invalid: {0}")]
    InvalidKey(String),

    #[error("credential encryption failed")]
    Encrypt,

    #[error("stored credential cannot be decrypted: {0}")]
    Decrypt(String),
}

impl CredentialError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingKey => "encryption_key_missing",
            Self::InvalidKey(_) => "encryption_key_invalid",
            Self::Encrypt => "encryption_failed",
            Self::Decrypt(_) => "decryption_failed",
        }
    }
}

/// AES-256-GCM with a random nonce prefixed to the ciphertext, base64 encoded.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CredentialCipher")
            .field("cipher", &"<redacted>")
            .finish()
    }
}

impl CredentialCipher {
    /// # Errors
    /// Returns [`CredentialError::InvalidKey`] unless the key is base64 for 32 bytes.
    pub fn from_base64_key(key: &str) -> Result<Self, CredentialError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|error| CredentialError::InvalidKey(error.to_string()))?;
        if bytes.len() != KEY_LEN {
            return Err(CredentialError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|error| CredentialError::InvalidKey(error.to_string()))?;
        Ok(Self { cipher })
    }

    /// # Errors
    /// Returns [`CredentialError::Encrypt`] if the cipher rejects the input.
    pub fn encrypt(&self, value: &str) -> Result<String, CredentialError> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|_| CredentialError::Encrypt)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// # Errors
    /// Returns [`CredentialError::Decrypt`] for malformed input, a wrong key or
    /// non-UTF-8 plaintext.
    pub fn decrypt(&self, encrypted_value: &str) -> Result<String, CredentialError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encrypted_value)
            .map_err(|error| CredentialError::Decrypt(error.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CredentialError::Decrypt("value too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CredentialError::Decrypt("authentication tag mismatch".to_string()))?;
        String::from_utf8(plaintext).map_err(|error| CredentialError::Decrypt(error.to_string()))
    }
}

/// A fresh base64 key for `encryption_key`.
#[must_use]
pub fn generate_key() -> String {
    let mut key = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}
