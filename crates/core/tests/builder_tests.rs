// ═══════════════════════════════════════════════════════════════════
// Builder Tests — full snapshot pipeline against a canned brokerage
// ═══════════════════════════════════════════════════════════════════

use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use saxofolio_core::config::EncryptionKey;
use saxofolio_core::errors::CoreError;
use saxofolio_core::providers::saxo::client::{
    AccountData, AccountsResponse, Balance, BrokerageApi, ClientInfo, DisplayAndFormat,
    Position, PositionBase, PositionView, PositionsResponse,
};
use saxofolio_core::providers::saxo::oauth::{AuthProvider, TokenResponse};
use saxofolio_core::services::snapshot_service::SnapshotService;
use saxofolio_core::services::token_service::TokenService;
use saxofolio_core::storage::db::create_pool;
use saxofolio_core::storage::encryption::seal;
use saxofolio_core::storage::store::Store;

// ── Mock auth (same shape as in the token tests) ────────────────────

struct MockAuth {
    refresh_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl AuthProvider for MockAuth {
    fn authorization_url(&self, _code_verifier: &str, state: &str) -> Result<String, CoreError> {
        Ok(format!("https://sim.logonvalidation.net/authorize?state={state}"))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _code_verifier: &str,
    ) -> Result<TokenResponse, CoreError> {
        Ok(self.response())
    }

    async fn refresh_token(
        &self,
        _refresh_token: &str,
        _code_verifier: &str,
    ) -> Result<TokenResponse, CoreError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response())
    }
}

impl MockAuth {
    fn response(&self) -> TokenResponse {
        TokenResponse {
            access_token: "refreshed-access".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: 1200,
            refresh_token: "refreshed-refresh".to_string(),
            refresh_token_expires_in: Some(7200),
        }
    }
}

// ── Mock brokerage ──────────────────────────────────────────────────

struct MockApi {
    positions: Vec<Position>,
    balance: Balance,
    accounts: Vec<AccountData>,
    tokens_seen: Mutex<Vec<String>>,
    fail_positions_unauthorized: AtomicBool,
}

impl MockApi {
    fn new(positions: Vec<Position>, balance: Balance) -> Self {
        Self {
            positions,
            balance,
            accounts: vec![
                AccountData {
                    account_key: "ak-1".to_string(),
                    account_id: "16164583".to_string(),
                    display_name: Some("Main".to_string()),
                    currency: "EUR".to_string(),
                    account_type: Some("Normal".to_string()),
                },
                AccountData {
                    account_key: "ak-2".to_string(),
                    account_id: "16164584".to_string(),
                    display_name: None,
                    currency: "USD".to_string(),
                    account_type: Some("Normal".to_string()),
                },
            ],
            tokens_seen: Mutex::new(Vec::new()),
            fail_positions_unauthorized: AtomicBool::new(false),
        }
    }

    fn record(&self, token: &str) {
        self.tokens_seen.lock().unwrap().push(token.to_string());
    }
}

#[async_trait::async_trait]
impl BrokerageApi for MockApi {
    async fn client_info(&self, access_token: &str) -> Result<ClientInfo, CoreError> {
        self.record(access_token);
        Ok(ClientInfo {
            client_key: "ck-test".to_string(),
            default_account_key: Some("ak-1".to_string()),
            default_currency: Some("EUR".to_string()),
            client_id: Some("16164583".to_string()),
            name: Some("Test Client".to_string()),
        })
    }

    async fn accounts(&self, access_token: &str) -> Result<AccountsResponse, CoreError> {
        self.record(access_token);
        Ok(AccountsResponse {
            data: self.accounts.clone(),
        })
    }

    async fn balances(&self, access_token: &str, _client_key: &str) -> Result<Balance, CoreError> {
        self.record(access_token);
        Ok(self.balance.clone())
    }

    async fn positions(
        &self,
        access_token: &str,
        _client_key: &str,
    ) -> Result<PositionsResponse, CoreError> {
        self.record(access_token);
        if self.fail_positions_unauthorized.load(Ordering::SeqCst) {
            return Err(CoreError::UpstreamUnauthorized);
        }
        Ok(PositionsResponse {
            data: self.positions.clone(),
            count: Some(self.positions.len() as i64),
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct TestEnv {
    _dir: TempDir,
    store: Arc<Store>,
    auth: Arc<MockAuth>,
    api: Arc<MockApi>,
    tokens: Arc<TokenService>,
    snapshots: SnapshotService,
}

fn setup(api: MockApi) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("builder.db");
    let pool = Arc::new(create_pool(db_path.to_str().unwrap()).unwrap());
    let store = Arc::new(Store::new(pool));
    let auth = Arc::new(MockAuth {
        refresh_calls: AtomicUsize::new(0),
    });
    let key = EncryptionKey::from_bytes([3u8; 32]);
    let tokens = Arc::new(TokenService::new(store.clone(), auth.clone(), key.clone()));
    let api = Arc::new(api);
    let snapshots = SnapshotService::new(store.clone(), tokens.clone(), api.clone());

    // A connected user with a comfortably valid credential.
    let connection = store.upsert_connection("user-1").unwrap();
    store
        .upsert_tokens(
            &connection.id,
            &seal("seeded-access", &key).unwrap(),
            &seal("seeded-refresh", &key).unwrap(),
            Utc::now() + Duration::hours(1),
            Utc::now() + Duration::hours(4),
            "seeded-verifier",
        )
        .unwrap();

    TestEnv {
        _dir: dir,
        store,
        auth,
        api,
        tokens,
        snapshots,
    }
}

fn stock(symbol: &str, amount: f64, market_value: f64, pnl: f64) -> Position {
    Position {
        position_id: Some(format!("pos-{symbol}-{amount}")),
        net_position_id: None,
        position_base: PositionBase {
            account_id: Some("16164583".to_string()),
            amount,
            asset_type: "Stock".to_string(),
            uic: 211,
            status: Some("Open".to_string()),
            open_price: None,
        },
        position_view: Some(PositionView {
            market_value: Some(market_value),
            market_value_in_base_currency: Some(market_value),
            profit_loss_on_trade: Some(pnl),
            ..Default::default()
        }),
        display_and_format: Some(DisplayAndFormat {
            symbol: Some(symbol.to_string()),
            description: Some(format!("{symbol} Inc.")),
            currency: Some("USD".to_string()),
        }),
    }
}

fn balance(cash: f64, total: f64) -> Balance {
    Balance {
        cash_balance: cash,
        total_value: total,
        currency: Some("EUR".to_string()),
        unrealized_positions_value: None,
        non_margin_positions_value: None,
        open_positions_count: None,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Happy path
// ═══════════════════════════════════════════════════════════════════

mod happy_path {
    use super::*;

    #[tokio::test]
    async fn builds_and_persists_a_snapshot() {
        let env = setup(MockApi::new(
            vec![
                stock("AAPL", 10.0, 1000.0, 50.0),
                stock("AAPL", 5.0, 550.0, 25.0),
                stock("VWCE", 20.0, 2000.0, -10.0),
            ],
            balance(450.0, 4000.0),
        ));

        let summary = env.snapshots.build_snapshot("user-1").await.unwrap();
        assert_eq!(summary.holdings_count, 2);
        assert!((summary.total_value - 4000.0).abs() < 1e-9);
        assert!((summary.cash_balance - 450.0).abs() < 1e-9);
        assert!((summary.unrealized_pnl - 65.0).abs() < 1e-9);
        assert_eq!(summary.currency, "EUR");
        assert!((summary.asset_breakdown["Stocks"] - 3550.0).abs() < 1e-9);
        assert!((summary.asset_breakdown["Cash"] - 450.0).abs() < 1e-9);

        let (snapshot, holdings) = env.store.latest_snapshot("user-1").unwrap().unwrap();
        assert_eq!(snapshot.id, summary.snapshot_id);
        assert_eq!(holdings.len(), 2);
    }

    #[tokio::test]
    async fn tranches_are_consolidated_in_the_stored_holdings() {
        let env = setup(MockApi::new(
            vec![
                stock("AAPL", 10.0, 1000.0, 0.0),
                stock("AAPL", 5.0, 550.0, 0.0),
            ],
            balance(0.0, 1550.0),
        ));

        env.snapshots.build_snapshot("user-1").await.unwrap();

        let (_, holdings) = env.store.latest_snapshot("user-1").unwrap().unwrap();
        assert_eq!(holdings.len(), 1);
        let merged = &holdings[0];
        assert_eq!(merged.symbol, "AAPL");
        assert!((merged.quantity - 15.0).abs() < 1e-9);
        assert!((merged.market_value - 1550.0).abs() < 1e-9);
        assert!((merged.current_price - 1550.0 / 15.0).abs() < 1e-9);
        assert!((merged.weight - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn client_key_is_recorded_on_the_connection() {
        let env = setup(MockApi::new(vec![], balance(100.0, 100.0)));
        env.snapshots.build_snapshot("user-1").await.unwrap();

        let connection = env.store.find_connection("user-1").unwrap().unwrap();
        assert_eq!(connection.client_key.as_deref(), Some("ck-test"));
    }

    #[tokio::test]
    async fn brokerage_accounts_are_mirrored() {
        let env = setup(MockApi::new(vec![], balance(100.0, 100.0)));
        env.snapshots.build_snapshot("user-1").await.unwrap();

        let connection = env.store.find_connection("user-1").unwrap().unwrap();
        let accounts = env.store.accounts_for_connection(&connection.id).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].display_name, "Main");
        // No display name upstream, account id stands in.
        assert_eq!(accounts[1].display_name, "16164584");
    }

    #[tokio::test]
    async fn every_api_call_carries_the_seeded_token() {
        let env = setup(MockApi::new(
            vec![stock("AAPL", 1.0, 100.0, 0.0)],
            balance(0.0, 100.0),
        ));
        env.snapshots.build_snapshot("user-1").await.unwrap();

        let seen = env.api.tokens_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|t| t == "seeded-access"));
        assert_eq!(env.auth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_builds_append_snapshots() {
        let env = setup(MockApi::new(
            vec![stock("AAPL", 1.0, 100.0, 0.0)],
            balance(0.0, 100.0),
        ));
        env.snapshots.build_snapshot("user-1").await.unwrap();
        env.snapshots.build_snapshot("user-1").await.unwrap();

        let history = env.store.snapshot_history("user-1", 10).unwrap();
        assert_eq!(history.len(), 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Token interplay
// ═══════════════════════════════════════════════════════════════════

mod token_interplay {
    use super::*;

    #[tokio::test]
    async fn stale_token_is_refreshed_once_before_the_first_call() {
        let env = setup(MockApi::new(
            vec![stock("AAPL", 1.0, 100.0, 0.0)],
            balance(0.0, 100.0),
        ));
        // Overwrite the seeded credential with an already-stale access token.
        let connection = env.store.find_connection("user-1").unwrap().unwrap();
        let key = EncryptionKey::from_bytes([3u8; 32]);
        env.store
            .upsert_tokens(
                &connection.id,
                &seal("stale-access", &key).unwrap(),
                &seal("live-refresh", &key).unwrap(),
                Utc::now() - Duration::minutes(5),
                Utc::now() + Duration::hours(4),
                "seeded-verifier",
            )
            .unwrap();

        env.snapshots.build_snapshot("user-1").await.unwrap();

        // One refresh; the rolled token covers the remaining calls.
        assert_eq!(env.auth.refresh_calls.load(Ordering::SeqCst), 1);
        let seen = env.api.tokens_seen.lock().unwrap().clone();
        assert!(seen.iter().all(|t| t == "refreshed-access"));
    }

    #[tokio::test]
    async fn disconnected_user_cannot_build() {
        let env = setup(MockApi::new(vec![], balance(0.0, 0.0)));
        let err = env
            .snapshots
            .build_snapshot("stranger")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[tokio::test]
    async fn expired_session_surfaces_before_any_api_call() {
        let env = setup(MockApi::new(vec![], balance(0.0, 0.0)));
        let connection = env.store.find_connection("user-1").unwrap().unwrap();
        env.store.invalidate_credential(&connection.id).unwrap();

        let err = env.snapshots.build_snapshot("user-1").await.unwrap_err();
        assert!(matches!(err, CoreError::SessionExpired));
        assert!(env.api.tokens_seen.lock().unwrap().is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Failure atomicity
// ═══════════════════════════════════════════════════════════════════

mod failure_atomicity {
    use super::*;

    #[tokio::test]
    async fn upstream_failure_leaves_no_partial_snapshot() {
        let api = MockApi::new(
            vec![stock("AAPL", 1.0, 100.0, 0.0)],
            balance(50.0, 150.0),
        );
        api.fail_positions_unauthorized.store(true, Ordering::SeqCst);
        let env = setup(api);

        let err = env.snapshots.build_snapshot("user-1").await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamUnauthorized));
        assert!(err.requires_reconnect());
        assert!(env.store.latest_snapshot("user-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidation_after_upstream_401_blocks_further_reads() {
        // What the facade does when requires_reconnect() is set.
        let api = MockApi::new(vec![], balance(0.0, 0.0));
        api.fail_positions_unauthorized.store(true, Ordering::SeqCst);
        let env = setup(api);

        let err = env.snapshots.build_snapshot("user-1").await.unwrap_err();
        assert!(err.requires_reconnect());
        env.tokens.invalidate("user-1").unwrap();

        let next = env
            .tokens
            .ensure_fresh_access_token("user-1")
            .await
            .unwrap_err();
        assert!(matches!(next, CoreError::SessionExpired));
    }
}
