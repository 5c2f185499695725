use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::errors::CoreError;

/// Generate a PKCE code verifier: 32 random bytes, URL-safe base64
/// (43 characters, within the RFC 7636 43..128 range).
pub fn generate_code_verifier() -> Result<String, CoreError> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<32>()?))
}

/// Derive the S256 code challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate an opaque `state` value for CSRF protection of the redirect.
pub fn generate_state() -> Result<String, CoreError> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes::<16>()?))
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CoreError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| CoreError::Encryption(format!("Failed to generate random bytes: {e}")))?;
    Ok(bytes)
}
