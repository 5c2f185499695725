use chrono::{DateTime, Utc};

use crate::storage::encryption::EncryptedSecret;

/// A user's link to the brokerage. At most one per user; owns the
/// credential and the mirrored account list.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    /// Saxo ClientKey, learned from the first client-info fetch and reused
    /// to scope balance/position queries.
    pub client_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The encrypted OAuth token pair for one connection.
///
/// Secrets are `None` while the record is a placeholder created at the
/// start of the OAuth flow (only the code verifier is populated then).
/// A placeholder carries epoch expiries, so every validity check treats
/// it as expired.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub connection_id: String,
    pub access_token: Option<EncryptedSecret>,
    pub refresh_token: Option<EncryptedSecret>,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
    /// PKCE verifier from the original authorization. Saxo's refresh grant
    /// requires it again on every refresh, so it lives with the tokens.
    pub code_verifier: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The authorization redirect handed to the UI at the start of the OAuth
/// flow. `state` must round-trip through the provider for CSRF protection.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}
