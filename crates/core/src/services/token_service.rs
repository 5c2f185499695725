use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::EncryptionKey;
use crate::errors::CoreError;
use crate::models::credential::{AuthorizationRequest, Connection, Credential};
use crate::providers::saxo::oauth::{AuthProvider, TokenResponse};
use crate::providers::saxo::pkce;
use crate::storage::encryption;
use crate::storage::store::Store;

/// Tolerance before the access-token expiry at which the token is already
/// considered stale. Absorbs clock skew and request latency.
const ACCESS_EXPIRY_BUFFER_SECS: i64 = 60;

/// When the refresh token itself gets this close to expiry, refresh
/// proactively even if the access token is still valid. Keeps the rolling
/// session alive as long as the app is used now and then.
const PROACTIVE_REFRESH_WINDOW_SECS: i64 = 15 * 60;

/// Saxo sometimes omits `refresh_token_expires_in`; assume the SIM minimum
/// rather than persisting an expiry downstream checks would read as
/// already-expired.
const REFRESH_EXPIRES_FALLBACK_SECS: u64 = 3600;

/// Owns the encrypted OAuth credential: PKCE handshake, validity checks,
/// transparent refresh, storage.
pub struct TokenService {
    store: Arc<Store>,
    auth: Arc<dyn AuthProvider>,
    key: EncryptionKey,
}

impl TokenService {
    pub fn new(store: Arc<Store>, auth: Arc<dyn AuthProvider>, key: EncryptionKey) -> Self {
        Self { store, auth, key }
    }

    // ── OAuth flow orchestration ────────────────────────────────────

    /// Start the PKCE flow: make sure a connection row exists, stash a
    /// fresh verifier in a placeholder credential, and hand back the
    /// authorization redirect.
    pub fn begin_authorization(&self, user_id: &str) -> Result<AuthorizationRequest, CoreError> {
        let code_verifier = pkce::generate_code_verifier()?;
        let state = pkce::generate_state()?;

        let connection = self.store.upsert_connection(user_id)?;
        self.store
            .init_placeholder_credential(&connection.id, &code_verifier)?;

        let url = self.auth.authorization_url(&code_verifier, &state)?;
        Ok(AuthorizationRequest { url, state })
    }

    /// Finish the PKCE flow after the redirect: exchange the authorization
    /// code using the stashed verifier and persist the encrypted pair.
    pub async fn complete_authorization(&self, user_id: &str, code: &str) -> Result<(), CoreError> {
        let connection = self.require_connection(user_id)?;
        let credential = self
            .store
            .find_credential(&connection.id)?
            .ok_or(CoreError::NotConnected)?;
        let code_verifier = credential.code_verifier.ok_or(CoreError::MissingVerifier)?;

        let tokens = self.auth.exchange_code(code, &code_verifier).await?;
        self.store_tokens(&connection.id, &tokens, &code_verifier)?;

        log::info!("brokerage connection established for user {user_id}");
        Ok(())
    }

    /// Drop the connection, cascading to the credential and mirrored
    /// accounts.
    pub fn disconnect(&self, user_id: &str) -> Result<bool, CoreError> {
        let deleted = self.store.delete_connection(user_id)?;
        if deleted {
            log::info!("brokerage connection removed for user {user_id}");
        }
        Ok(deleted)
    }

    /// Mark the stored credential as dead (both expiries to the epoch).
    /// Used when the upstream API says 401 regardless of what local
    /// expiries claim.
    pub fn invalidate(&self, user_id: &str) -> Result<(), CoreError> {
        if let Some(connection) = self.store.find_connection(user_id)? {
            self.store.invalidate_credential(&connection.id)?;
        }
        Ok(())
    }

    // ── Token validity / refresh ────────────────────────────────────

    /// Return an access token that is guaranteed valid right now,
    /// refreshing (and persisting the new pair) when needed.
    ///
    /// This read has a deliberate write side effect: a refresh rolls the
    /// session forward, so regular use keeps the connection alive without
    /// re-authorization.
    pub async fn ensure_fresh_access_token(&self, user_id: &str) -> Result<String, CoreError> {
        let connection = self.require_connection(user_id)?;
        let credential = self
            .store
            .find_credential(&connection.id)?
            .ok_or(CoreError::NotConnected)?;

        let now = Utc::now();
        let access_valid = credential.access_token_expires_at
            > now + Duration::seconds(ACCESS_EXPIRY_BUFFER_SECS);
        let refresh_expiring = credential.refresh_token_expires_at
            <= now + Duration::seconds(PROACTIVE_REFRESH_WINDOW_SECS);

        if access_valid && !refresh_expiring {
            let sealed = credential
                .access_token
                .as_ref()
                .ok_or(CoreError::NotConnected)?;
            return sealed.open(&self.key);
        }

        if credential.refresh_token_expires_at < now {
            return Err(CoreError::SessionExpired);
        }

        self.refresh_and_store(user_id, &connection, &credential)
            .await
    }

    async fn refresh_and_store(
        &self,
        user_id: &str,
        connection: &Connection,
        credential: &Credential,
    ) -> Result<String, CoreError> {
        let sealed_refresh = credential
            .refresh_token
            .as_ref()
            .ok_or(CoreError::SessionExpired)?;
        let refresh_token = sealed_refresh.open(&self.key)?;
        let code_verifier = credential
            .code_verifier
            .clone()
            .ok_or(CoreError::MissingVerifier)?;

        log::info!("refreshing brokerage access token for user {user_id}");
        let tokens = self.auth.refresh_token(&refresh_token, &code_verifier).await?;
        self.store_tokens(&connection.id, &tokens, &code_verifier)?;

        Ok(tokens.access_token)
    }

    /// Seal both tokens (independent nonces) and upsert the credential in
    /// a single write. The verifier is stored alongside because the next
    /// refresh needs it again.
    pub fn store_tokens(
        &self,
        connection_id: &str,
        tokens: &TokenResponse,
        code_verifier: &str,
    ) -> Result<(), CoreError> {
        let access = encryption::seal(&tokens.access_token, &self.key)?;
        let refresh = encryption::seal(&tokens.refresh_token, &self.key)?;

        let now = Utc::now();
        let refresh_expires_in = match tokens.refresh_token_expires_in {
            Some(secs) if secs > 0 => secs,
            _ => REFRESH_EXPIRES_FALLBACK_SECS,
        };
        let access_expires_at = now + Duration::seconds(tokens.expires_in as i64);
        let refresh_expires_at = now + Duration::seconds(refresh_expires_in as i64);

        self.store.upsert_tokens(
            connection_id,
            &access,
            &refresh,
            access_expires_at,
            refresh_expires_at,
            code_verifier,
        )
    }

    fn require_connection(&self, user_id: &str) -> Result<Connection, CoreError> {
        self.store
            .find_connection(user_id)?
            .ok_or(CoreError::NotConnected)
    }
}
