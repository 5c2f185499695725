use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::errors::CoreError;

/// Which Saxo OpenAPI environment the app talks to.
/// SIM is the sandbox; LIVE is real money.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaxoEnvironment {
    Sim,
    Live,
}

impl SaxoEnvironment {
    /// Base URL of the OAuth authorization/token server.
    pub fn auth_base_url(&self) -> &'static str {
        match self {
            SaxoEnvironment::Live => "https://live.logonvalidation.net",
            SaxoEnvironment::Sim => "https://sim.logonvalidation.net",
        }
    }

    /// Base URL of the bearer-authenticated read API.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            SaxoEnvironment::Live => "https://gateway.saxobank.com/openapi",
            SaxoEnvironment::Sim => "https://gateway.saxobank.com/sim/openapi",
        }
    }
}

impl std::str::FromStr for SaxoEnvironment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(SaxoEnvironment::Live),
            "sim" => Ok(SaxoEnvironment::Sim),
            other => Err(CoreError::Config(format!(
                "SAXO_ENV must be \"sim\" or \"live\", got \"{other}\""
            ))),
        }
    }
}

/// The process-wide AES-256 key protecting tokens at rest.
///
/// Loaded once from configuration; a malformed key is a fatal construction
/// error so the app refuses to start rather than silently failing to
/// protect secrets.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Parse a base64-encoded key. Must decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CoreError> {
        let bytes = BASE64.decode(encoded).map_err(|_| {
            CoreError::Config("TOKEN_ENCRYPTION_KEY must be a valid base64 string".into())
        })?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CoreError::Config(format!(
                "TOKEN_ENCRYPTION_KEY must be exactly 32 bytes (got {})",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Never expose key material through Debug output.
impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Process configuration for the core: OAuth app identity and the token
/// encryption key.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OAuth client id issued by Saxo ("AppKey").
    pub app_key: String,
    /// OAuth client secret; absent for public (PKCE-only) clients.
    pub app_secret: Option<String>,
    /// Redirect URI registered with the brokerage app.
    pub redirect_uri: String,
    pub environment: SaxoEnvironment,
    pub encryption_key: EncryptionKey,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Required: `SAXO_APP_KEY`, `SAXO_REDIRECT_URI`, `TOKEN_ENCRYPTION_KEY`.
    /// Optional: `SAXO_APP_SECRET`, `SAXO_ENV` (defaults to "sim").
    pub fn from_env() -> Result<Self, CoreError> {
        let app_key = require_env("SAXO_APP_KEY")?;
        let redirect_uri = require_env("SAXO_REDIRECT_URI")?;
        let encryption_key = EncryptionKey::from_base64(&require_env("TOKEN_ENCRYPTION_KEY")?)?;
        let app_secret = std::env::var("SAXO_APP_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        let environment = match std::env::var("SAXO_ENV") {
            Ok(value) => value.parse()?,
            Err(_) => SaxoEnvironment::Sim,
        };

        Ok(Self {
            app_key,
            app_secret,
            redirect_uri,
            environment,
            encryption_key,
        })
    }
}

fn require_env(name: &str) -> Result<String, CoreError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Config(format!("Missing required environment variable: {name}")))
}
