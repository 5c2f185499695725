use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::CoreError;
use super::pkce;

/// Token pair returned by the OAuth token endpoint.
///
/// `refresh_token_expires_in` is sometimes absent from Saxo responses;
/// callers must apply a conservative fallback instead of persisting an
/// undefined expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(default)]
    pub refresh_token_expires_in: Option<u64>,
}

/// Trait abstraction over the OAuth token endpoint, so the credential
/// lifecycle can be exercised in tests without a live authorization server.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Build the PKCE S256 authorization redirect URL.
    fn authorization_url(&self, code_verifier: &str, state: &str) -> Result<String, CoreError>;

    /// `grant_type=authorization_code` exchange after the redirect.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, CoreError>;

    /// `grant_type=refresh_token` renewal. Saxo requires the original PKCE
    /// verifier on every refresh.
    async fn refresh_token(
        &self,
        refresh_token: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, CoreError>;
}

/// OAuth client for Saxo's logon server.
pub struct SaxoAuthProvider {
    http: Client,
    auth_base_url: &'static str,
    app_key: String,
    app_secret: Option<String>,
    redirect_uri: String,
}

impl SaxoAuthProvider {
    pub fn new(config: &AppConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            auth_base_url: config.environment.auth_base_url(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, CoreError> {
        let res = self
            .http
            .post(format!("{}/token", self.auth_base_url))
            .form(params)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            // Surface the provider's body for diagnostics; it never contains
            // the verifier or the resulting tokens.
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::TokenExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        res.json::<TokenResponse>().await.map_err(CoreError::from)
    }
}

#[async_trait]
impl AuthProvider for SaxoAuthProvider {
    fn authorization_url(&self, code_verifier: &str, state: &str) -> Result<String, CoreError> {
        let challenge = pkce::code_challenge(code_verifier);
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.auth_base_url),
            &[
                ("response_type", "code"),
                ("client_id", self.app_key.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state),
            ],
        )
        .map_err(|e| CoreError::Config(format!("Invalid authorization URL: {e}")))?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, CoreError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.app_key.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        // Confidential clients also send their secret.
        if let Some(secret) = self.app_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        self.token_request(&params).await
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, CoreError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.app_key.as_str()),
            ("refresh_token", refresh_token),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = self.app_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        self.token_request(&params).await
    }
}
