use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::CoreError;

// ── Wire types (Saxo OpenAPI, PascalCase JSON) ──────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientInfo {
    pub client_key: String,
    #[serde(default)]
    pub default_account_key: Option<String>,
    #[serde(default)]
    pub default_currency: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountData {
    pub account_key: String,
    pub account_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub account_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountsResponse {
    #[serde(default)]
    pub data: Vec<AccountData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Balance {
    pub cash_balance: f64,
    pub total_value: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub unrealized_positions_value: Option<f64>,
    #[serde(default)]
    pub non_margin_positions_value: Option<f64>,
    #[serde(default)]
    pub open_positions_count: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionBase {
    #[serde(default)]
    pub account_id: Option<String>,
    pub amount: f64,
    pub asset_type: String,
    pub uic: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub open_price: Option<f64>,
}

/// Pricing/valuation fields. Saxo reports 0 for the live fields when the
/// price feed is delayed, hence the estimation fallbacks in the snapshot
/// builder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionView {
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub exposure_currency: Option<String>,
    #[serde(default)]
    pub market_value: Option<f64>,
    #[serde(default)]
    pub market_value_in_base_currency: Option<f64>,
    #[serde(default)]
    pub market_value_open: Option<f64>,
    #[serde(default)]
    pub market_value_open_in_base_currency: Option<f64>,
    #[serde(default)]
    pub profit_loss_on_trade: Option<f64>,
    #[serde(default)]
    pub profit_loss_on_trade_in_base_currency: Option<f64>,
    #[serde(default)]
    pub conversion_rate_current: Option<f64>,
    #[serde(default)]
    pub instrument_price_day_percent_change: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DisplayAndFormat {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(default)]
    pub net_position_id: Option<String>,
    pub position_base: PositionBase,
    #[serde(default)]
    pub position_view: Option<PositionView>,
    #[serde(default)]
    pub display_and_format: Option<DisplayAndFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionsResponse {
    #[serde(default)]
    pub data: Vec<Position>,
    #[serde(rename = "__count", default)]
    pub count: Option<i64>,
}

/// Preset chart ranges mapped to Saxo horizon (minutes per candle) and
/// sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartRange {
    OneDay,
    OneWeek,
    OneMonth,
    SixMonths,
    OneYear,
    FiveYears,
}

impl ChartRange {
    pub fn horizon_and_count(&self) -> (u32, u32) {
        match self {
            ChartRange::OneDay => (5, 78),
            ChartRange::OneWeek => (60, 40),
            ChartRange::OneMonth => (1440, 22),
            ChartRange::SixMonths => (1440, 130),
            ChartRange::OneYear => (1440, 260),
            ChartRange::FiveYears => (1440, 1300),
        }
    }
}

impl std::str::FromStr for ChartRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1D" => Ok(ChartRange::OneDay),
            "1W" => Ok(ChartRange::OneWeek),
            "1M" => Ok(ChartRange::OneMonth),
            "6M" => Ok(ChartRange::SixMonths),
            "1Y" => Ok(ChartRange::OneYear),
            "5Y" => Ok(ChartRange::FiveYears),
            other => Err(CoreError::Config(format!("Unknown chart range: {other}"))),
        }
    }
}

// ── Trait seam for the snapshot builder ─────────────────────────────

/// The four read operations the snapshot builder depends on. Abstracted so
/// the build pipeline can run against canned data in tests.
#[async_trait]
pub trait BrokerageApi: Send + Sync {
    async fn client_info(&self, access_token: &str) -> Result<ClientInfo, CoreError>;

    async fn accounts(&self, access_token: &str) -> Result<AccountsResponse, CoreError>;

    async fn balances(&self, access_token: &str, client_key: &str) -> Result<Balance, CoreError>;

    async fn positions(
        &self,
        access_token: &str,
        client_key: &str,
    ) -> Result<PositionsResponse, CoreError>;
}

// ── HTTP client ─────────────────────────────────────────────────────

/// Bearer-authenticated client for the Saxo read API. Tokens are supplied
/// by the caller per request; this type holds no credential state.
pub struct SaxoClient {
    http: Client,
    api_base_url: &'static str,
}

impl SaxoClient {
    pub fn new(config: &AppConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            api_base_url: config.environment.api_base_url(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CoreError> {
        let res = self
            .http
            .get(format!("{}{}", self.api_base_url, path))
            .query(query)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = res.status();
        match status.as_u16() {
            401 => return Err(CoreError::UpstreamUnauthorized),
            429 => return Err(CoreError::UpstreamRateLimited),
            _ if !status.is_success() => {
                let body = res.text().await.unwrap_or_default();
                log::error!("saxo api {status} {path}: {body}");
                return Err(CoreError::UpstreamError {
                    status: status.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        res.json::<T>().await.map_err(CoreError::from)
    }

    // ── Endpoints consumed outside the snapshot path ────────────────
    // These ride the same token-refresh path; page-level code renders the
    // raw JSON, so they stay untyped.

    pub async fn closed_positions(
        &self,
        access_token: &str,
        client_key: &str,
        account_key: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        let mut query = vec![
            ("ClientKey", client_key),
            ("FieldGroups", "ClosedPosition,DisplayAndFormat"),
        ];
        if let Some(key) = account_key {
            query.push(("AccountKey", key));
        }
        self.get_json(access_token, "/port/v1/closedpositions", &query)
            .await
    }

    pub async fn info_price(
        &self,
        access_token: &str,
        uic: i64,
        asset_type: &str,
    ) -> Result<serde_json::Value, CoreError> {
        let uic = uic.to_string();
        self.get_json(
            access_token,
            "/trade/v1/infoprices",
            &[
                ("Uic", uic.as_str()),
                ("AssetType", asset_type),
                (
                    "FieldGroups",
                    "PriceInfo,Quote,PriceInfoDetails,DisplayAndFormat",
                ),
            ],
        )
        .await
    }

    pub async fn chart_data(
        &self,
        access_token: &str,
        uic: i64,
        asset_type: &str,
        range: ChartRange,
    ) -> Result<serde_json::Value, CoreError> {
        let (horizon, count) = range.horizon_and_count();
        let uic = uic.to_string();
        let horizon = horizon.to_string();
        let count = count.to_string();
        self.get_json(
            access_token,
            "/chart/v3/charts",
            &[
                ("Uic", uic.as_str()),
                ("AssetType", asset_type),
                ("Horizon", horizon.as_str()),
                ("Count", count.as_str()),
            ],
        )
        .await
    }

    pub async fn search_instruments(
        &self,
        access_token: &str,
        keywords: &str,
        asset_types: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        let mut query = vec![("Keywords", keywords)];
        if let Some(types) = asset_types {
            query.push(("AssetTypes", types));
        }
        self.get_json(access_token, "/ref/v1/instruments", &query)
            .await
    }

    pub async fn instrument_details(
        &self,
        access_token: &str,
        uic: i64,
        asset_type: &str,
    ) -> Result<serde_json::Value, CoreError> {
        let path = format!("/ref/v1/instruments/details/{uic}/{asset_type}");
        self.get_json(access_token, &path, &[]).await
    }

    pub async fn account_performance(
        &self,
        access_token: &str,
        client_key: &str,
        account_key: Option<&str>,
        from_date: Option<&str>,
        to_date: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        let path = format!("/hist/v3/perf/{client_key}");
        let mut query = vec![(
            "FieldGroups",
            "AccountSummary,TimeWeightedPerformance,BenchmarkPerformance,TradeActivity",
        )];
        if let Some(key) = account_key {
            query.push(("AccountKey", key));
        }
        if let Some(from) = from_date {
            query.push(("FromDate", from));
        }
        if let Some(to) = to_date {
            query.push(("ToDate", to));
        }
        if from_date.is_none() && to_date.is_none() {
            query.push(("StandardPeriod", "Year"));
        }
        self.get_json(access_token, &path, &query).await
    }

    pub async fn order_activities(
        &self,
        access_token: &str,
        top: u32,
    ) -> Result<serde_json::Value, CoreError> {
        let top = top.to_string();
        self.get_json(
            access_token,
            "/cs/v1/audit/orderactivities",
            &[
                ("EntryType", "Last"),
                ("FieldGroups", "DisplayAndFormat"),
                ("$top", top.as_str()),
            ],
        )
        .await
    }
}

#[async_trait]
impl BrokerageApi for SaxoClient {
    async fn client_info(&self, access_token: &str) -> Result<ClientInfo, CoreError> {
        self.get_json(access_token, "/port/v1/clients/me", &[]).await
    }

    async fn accounts(&self, access_token: &str) -> Result<AccountsResponse, CoreError> {
        self.get_json(access_token, "/port/v1/accounts/me", &[]).await
    }

    async fn balances(&self, access_token: &str, client_key: &str) -> Result<Balance, CoreError> {
        self.get_json(access_token, "/port/v1/balances", &[("ClientKey", client_key)])
            .await
    }

    async fn positions(
        &self,
        access_token: &str,
        client_key: &str,
    ) -> Result<PositionsResponse, CoreError> {
        self.get_json(
            access_token,
            "/port/v1/positions",
            &[
                ("ClientKey", client_key),
                ("FieldGroups", "PositionBase,PositionView,DisplayAndFormat"),
            ],
        )
        .await
    }
}
