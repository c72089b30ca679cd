//! Password-at-rest encryption.
//!
//! Portal passwords are stored AES-256-GCM encrypted as
//! base64(nonce || ciphertext). The symmetric key is stretched once from the
//! configured secret with HMAC-SHA256 and held for the process lifetime.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = hmac::Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("encrypted value too short")]
    TooShort,

    #[error("decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Stretch an arbitrary-length secret into a 256-bit key.
fn derive_key(secret: &str) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"scbadash-vault-v1")
        .expect("HMAC accepts any key length");
    mac.update(secret.as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

/// Symmetric cipher for credential storage.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Build a vault from the configured secret. The derivation runs once;
    /// the resulting cipher is shared for the process lifetime.
    pub fn from_secret(secret: &str) -> Self {
        let key = derive_key(secret);
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is valid for AES-256");
        Self { cipher }
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value back to plaintext.
    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let combined = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        if combined.len() < 13 {
            return Err(VaultError::TooShort);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Decrypt)?;

        Ok(String::from_utf8(plaintext)?)
    }
}
