use thiserror::Error;

/// Unified error type for the entire saxofolio-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Credential lifecycle ────────────────────────────────────────
    #[error("No brokerage connection found. Please connect your account.")]
    NotConnected,

    #[error("Brokerage session expired. Please reconnect your account.")]
    SessionExpired,

    #[error("Missing PKCE code verifier. Please reconnect your account.")]
    MissingVerifier,

    #[error("Token exchange failed: {status} {body}")]
    TokenExchangeFailed { status: u16, body: String },

    // ── Brokerage read API ──────────────────────────────────────────
    #[error("Brokerage API returned 401. Your session may have expired. Please reconnect.")]
    UpstreamUnauthorized,

    #[error("Brokerage API rate limited. Please try again shortly.")]
    UpstreamRateLimited,

    #[error("Brokerage API error {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    // ── Crypto ──────────────────────────────────────────────────────
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed — wrong key or corrupted ciphertext")]
    Decryption,

    // ── Configuration ───────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Persistence ─────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Whether this error means the stored credential is dead and the user
    /// must go through the OAuth flow again. The refresh caller uses this to
    /// force-expire the cached credential so later reads don't retry a
    /// doomed refresh.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            CoreError::SessionExpired | CoreError::UpstreamUnauthorized
        )
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // Sanitize error message: strip query parameters from URLs so
        // client keys never leak into logs.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<aes_gcm::Error> for CoreError {
    fn from(_: aes_gcm::Error) -> Self {
        CoreError::Decryption
    }
}

impl From<diesel::result::Error> for CoreError {
    fn from(e: diesel::result::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<diesel::result::ConnectionError> for CoreError {
    fn from(e: diesel::result::ConnectionError) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(e: r2d2::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}
