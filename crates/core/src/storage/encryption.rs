use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::config::EncryptionKey;
use crate::errors::CoreError;

/// A secret sealed with AES-256-GCM: 12-byte nonce plus ciphertext with the
/// 16-byte authentication tag appended.
///
/// One value type per stored secret, with a single encode/decode boundary
/// for persistence, instead of nonce/tag/ciphertext threaded through call
/// sites as separate columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

/// Encrypt a plaintext secret under the process-wide key with a fresh
/// random nonce.
pub fn seal(plaintext: &str, key: &EncryptionKey) -> Result<EncryptedSecret, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CoreError::Encryption(format!("Failed to create cipher: {e}")))?;
    let nonce = generate_nonce()?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| CoreError::Encryption(format!("Encryption failed: {e}")))?;

    Ok(EncryptedSecret { nonce, ciphertext })
}

impl EncryptedSecret {
    /// Decrypt back to the plaintext secret.
    ///
    /// Verifies the authentication tag automatically. Returns
    /// `CoreError::Decryption` if the key is wrong or the data has been
    /// tampered with.
    pub fn open(&self, key: &EncryptionKey) -> Result<String, CoreError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CoreError::Encryption(format!("Failed to create cipher: {e}")))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map_err(|_| CoreError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CoreError::Decryption)
    }

    /// Encode for storage as `base64(nonce).base64(ciphertext||tag)`.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}",
            BASE64.encode(self.nonce),
            BASE64.encode(&self.ciphertext)
        )
    }

    /// Parse the storage encoding produced by [`EncryptedSecret::encode`].
    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let (nonce_part, ciphertext_part) = encoded
            .split_once('.')
            .ok_or(CoreError::Decryption)?;

        let nonce_bytes = BASE64.decode(nonce_part).map_err(|_| CoreError::Decryption)?;
        let nonce: [u8; 12] = nonce_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Decryption)?;
        let ciphertext = BASE64
            .decode(ciphertext_part)
            .map_err(|_| CoreError::Decryption)?;

        Ok(Self { nonce, ciphertext })
    }
}

/// Generate cryptographically secure random bytes for a nonce.
fn generate_nonce() -> Result<[u8; 12], CoreError> {
    let mut nonce = [0u8; 12];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| CoreError::Encryption(format!("Failed to generate random nonce: {e}")))?;
    Ok(nonce)
}
