pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use std::sync::Arc;

use config::AppConfig;
use errors::CoreError;
use models::credential::AuthorizationRequest;
use models::snapshot::{Holding, PortfolioSnapshot, SnapshotSummary};
use providers::saxo::client::{ChartRange, SaxoClient};
use providers::saxo::oauth::{AuthProvider, SaxoAuthProvider};
use services::snapshot_service::SnapshotService;
use services::token_service::TokenService;
use storage::store::Store;

/// Main entry point for the SaxoFolio core library.
///
/// Wires the store, the OAuth provider and the read-API client into the
/// two services, and exposes the operations HTTP route handlers call.
#[must_use]
pub struct SaxoFolio {
    store: Arc<Store>,
    tokens: Arc<TokenService>,
    snapshots: SnapshotService,
    client: Arc<SaxoClient>,
}

impl SaxoFolio {
    /// Open (or create) the database at `database_url`, run migrations,
    /// and wire all services. Fails fast on a bad encryption key or an
    /// unreachable database.
    pub fn new(config: AppConfig, database_url: &str) -> Result<Self, CoreError> {
        let pool = Arc::new(storage::db::create_pool(database_url)?);
        let store = Arc::new(Store::new(pool));

        let auth: Arc<dyn AuthProvider> = Arc::new(SaxoAuthProvider::new(&config));
        let client = Arc::new(SaxoClient::new(&config));
        let tokens = Arc::new(TokenService::new(
            store.clone(),
            auth,
            config.encryption_key.clone(),
        ));
        let snapshots = SnapshotService::new(store.clone(), tokens.clone(), client.clone());

        Ok(Self {
            store,
            tokens,
            snapshots,
            client,
        })
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Start the OAuth PKCE flow. The caller redirects the user to the
    /// returned URL and must verify `state` on the way back.
    pub fn connect_start(&self, user_id: &str) -> Result<AuthorizationRequest, CoreError> {
        self.tokens.begin_authorization(user_id)
    }

    /// Finish the OAuth flow with the authorization code from the redirect.
    pub async fn connect_complete(&self, user_id: &str, code: &str) -> Result<(), CoreError> {
        self.tokens.complete_authorization(user_id, code).await
    }

    /// Remove the brokerage connection and everything hanging off it.
    pub fn disconnect(&self, user_id: &str) -> Result<bool, CoreError> {
        self.tokens.disconnect(user_id)
    }

    // ── Portfolio ───────────────────────────────────────────────────

    /// Build and persist a fresh snapshot.
    ///
    /// When the build fails because the session is dead (local expiry or an
    /// upstream 401), the stored credential is force-expired best-effort so
    /// the UI immediately shows "reconnect required" instead of retrying
    /// with a dead token. The original error still propagates.
    pub async fn refresh_portfolio(&self, user_id: &str) -> Result<SnapshotSummary, CoreError> {
        match self.snapshots.build_snapshot(user_id).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                if err.requires_reconnect() {
                    if let Err(invalidate_err) = self.tokens.invalidate(user_id) {
                        // Best-effort; don't mask the original error.
                        log::warn!(
                            "failed to invalidate credential for user {user_id}: {invalidate_err}"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// The dashboard read: most recent snapshot with its holdings.
    pub fn latest_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<(PortfolioSnapshot, Vec<Holding>)>, CoreError> {
        self.store.latest_snapshot(user_id)
    }

    /// Recent snapshots (newest first) for history charts.
    pub fn snapshot_history(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<PortfolioSnapshot>, CoreError> {
        self.store.snapshot_history(user_id, limit)
    }

    // ── Instrument lookups (same token path as the snapshot builder) ──

    pub async fn quote(
        &self,
        user_id: &str,
        uic: i64,
        asset_type: &str,
    ) -> Result<serde_json::Value, CoreError> {
        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        self.client.info_price(&token, uic, asset_type).await
    }

    pub async fn chart(
        &self,
        user_id: &str,
        uic: i64,
        asset_type: &str,
        range: ChartRange,
    ) -> Result<serde_json::Value, CoreError> {
        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        self.client.chart_data(&token, uic, asset_type, range).await
    }

    pub async fn search_instruments(
        &self,
        user_id: &str,
        keywords: &str,
        asset_types: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        self.client
            .search_instruments(&token, keywords, asset_types)
            .await
    }

    pub async fn instrument_details(
        &self,
        user_id: &str,
        uic: i64,
        asset_type: &str,
    ) -> Result<serde_json::Value, CoreError> {
        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        self.client.instrument_details(&token, uic, asset_type).await
    }
}

impl std::fmt::Debug for SaxoFolio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaxoFolio").finish_non_exhaustive()
    }
}
