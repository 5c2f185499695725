use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::snapshot::{Holding, PortfolioSnapshot, SnapshotSummary};
use crate::providers::saxo::client::{Balance, BrokerageApi, Position};
use crate::services::token_service::TokenService;
use crate::storage::store::Store;

/// Builds immutable point-in-time portfolio snapshots from the brokerage
/// read API and persists them.
pub struct SnapshotService {
    store: Arc<Store>,
    tokens: Arc<TokenService>,
    api: Arc<dyn BrokerageApi>,
}

impl SnapshotService {
    pub fn new(store: Arc<Store>, tokens: Arc<TokenService>, api: Arc<dyn BrokerageApi>) -> Self {
        Self { store, tokens, api }
    }

    /// Fetch client info, accounts, balances and positions (in that order;
    /// later calls need the client key from the first), normalize and
    /// consolidate positions, and persist one snapshot with its holdings.
    ///
    /// Any upstream failure aborts the whole build; the snapshot write is
    /// the only snapshot-data write and happens once, after all
    /// computation, so a failed build leaves no partial snapshot.
    pub async fn build_snapshot(&self, user_id: &str) -> Result<SnapshotSummary, CoreError> {
        let started = std::time::Instant::now();

        // Every API call goes through the ensure-fresh path so a refresh
        // mid-build is transparent.
        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        let client_info = self.api.client_info(&token).await?;

        let connection = self
            .store
            .find_connection(user_id)?
            .ok_or(CoreError::NotConnected)?;
        self.store
            .set_client_key(&connection.id, &client_info.client_key)?;

        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        let accounts = self.api.accounts(&token).await?;
        for account in &accounts.data {
            self.store.upsert_account(&connection.id, account)?;
        }

        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        let balances = self.api.balances(&token, &client_info.client_key).await?;

        let token = self.tokens.ensure_fresh_access_token(user_id).await?;
        let positions = self.api.positions(&token, &client_info.client_key).await?;

        let assembled = assemble_portfolio(
            &positions.data,
            &balances,
            client_info.default_currency.as_deref(),
        );

        let snapshot = PortfolioSnapshot {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            snapshot_at: Utc::now(),
            total_value: assembled.total_value,
            cash_balance: assembled.cash_balance,
            unrealized_pnl: assembled.total_unrealized_pnl,
            currency: assembled.base_currency.clone(),
            asset_breakdown: assembled.asset_breakdown.clone(),
            currency_exposure: assembled.currency_exposure.clone(),
        };
        self.store.insert_snapshot(&snapshot, &assembled.holdings)?;

        log::info!(
            "built snapshot for user {user_id} in {}ms ({} holdings)",
            started.elapsed().as_millis(),
            assembled.holdings.len()
        );

        Ok(SnapshotSummary {
            snapshot_id: snapshot.id,
            total_value: assembled.total_value,
            cash_balance: assembled.cash_balance,
            unrealized_pnl: assembled.total_unrealized_pnl,
            currency: assembled.base_currency,
            asset_breakdown: assembled.asset_breakdown,
            currency_exposure: assembled.currency_exposure,
            holdings_count: assembled.holdings.len(),
            snapshot_at: snapshot.snapshot_at,
        })
    }
}

// ── Normalization (pure, no I/O) ────────────────────────────────────

/// Coarse bucket for the breakdown chart. Unmapped types land in "Other".
pub fn asset_class_for(saxo_asset_type: &str) -> &'static str {
    match saxo_asset_type.to_lowercase().as_str() {
        "stock" | "cfdonstock" => "Stocks",
        "etf" | "cfdonetf" | "etcetf" => "ETFs",
        "bond" | "cfdonbond" => "Bonds",
        "mutualfund" => "Funds",
        "fxspot" | "fxforwards" => "Forex",
        _ => "Other",
    }
}

/// Fine-grained canonical type for display.
pub fn asset_type_for(saxo_asset_type: &str) -> &'static str {
    match saxo_asset_type.to_lowercase().as_str() {
        "stock" | "cfdonstock" => "Stock",
        "etf" | "cfdonetf" | "etcetf" => "ETF",
        "bond" | "cfdonbond" => "Bond",
        "mutualfund" => "Fund",
        "fxspot" | "fxforwards" => "Forex",
        _ => "Other",
    }
}

/// Ordered market-value estimation strategies. Saxo reports 0 for the live
/// valuation fields when prices are delayed, so estimation walks this list
/// and the first non-zero result wins; a spurious zero is never surfaced
/// when a reasonable estimate is derivable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEstimate {
    /// The directly reported market value.
    Reported,
    /// |open market value| + profit/loss on trade: cost basis plus delta
    /// reconstructs the current value.
    CostBasisPlusPnl,
    /// quantity × (current price, else open price, else 0).
    PriceTimesQuantity,
}

pub const MARKET_VALUE_ESTIMATES: [ValueEstimate; 3] = [
    ValueEstimate::Reported,
    ValueEstimate::CostBasisPlusPnl,
    ValueEstimate::PriceTimesQuantity,
];

fn non_zero(value: f64) -> Option<f64> {
    (value != 0.0).then_some(value)
}

/// Estimate a position's market value in its native currency.
pub fn estimate_market_value(position: &Position) -> f64 {
    let base = &position.position_base;
    let view = position.position_view.as_ref();

    for strategy in MARKET_VALUE_ESTIMATES {
        let candidate = match strategy {
            ValueEstimate::Reported => view.and_then(|v| v.market_value).and_then(non_zero),
            ValueEstimate::CostBasisPlusPnl => view.and_then(|v| {
                let open = non_zero(v.market_value_open?)?;
                Some(open.abs() + v.profit_loss_on_trade.unwrap_or(0.0))
            }),
            ValueEstimate::PriceTimesQuantity => {
                let price = view
                    .and_then(|v| v.current_price)
                    .and_then(non_zero)
                    .or_else(|| base.open_price.and_then(non_zero))
                    .unwrap_or(0.0);
                Some(base.amount * price)
            }
        };
        if let Some(value) = candidate.and_then(non_zero) {
            return value;
        }
    }
    0.0
}

/// Estimate a position's market value in the base/reporting currency,
/// falling back to converting the native estimate at the current rate when
/// no base-denominated field is populated.
pub fn estimate_market_value_base(position: &Position, native_value: f64) -> f64 {
    let view = position.position_view.as_ref();

    for strategy in MARKET_VALUE_ESTIMATES {
        let candidate = match strategy {
            ValueEstimate::Reported => view
                .and_then(|v| v.market_value_in_base_currency)
                .and_then(non_zero),
            ValueEstimate::CostBasisPlusPnl => view.and_then(|v| {
                let open = non_zero(v.market_value_open_in_base_currency?)?;
                Some(open.abs() + v.profit_loss_on_trade_in_base_currency.unwrap_or(0.0))
            }),
            ValueEstimate::PriceTimesQuantity => {
                let rate = view
                    .and_then(|v| v.conversion_rate_current)
                    .and_then(non_zero)
                    .unwrap_or(1.0);
                Some(native_value * rate)
            }
        };
        if let Some(value) = candidate.and_then(non_zero) {
            return value;
        }
    }
    0.0
}

/// A portfolio assembled from raw positions and balances, before persistence.
#[derive(Debug, Clone)]
pub struct AssembledPortfolio {
    pub holdings: Vec<Holding>,
    /// Asset-class label to aggregate value, base currency.
    pub asset_breakdown: HashMap<String, f64>,
    /// Currency code to aggregate value, native currency.
    pub currency_exposure: HashMap<String, f64>,
    pub total_value: f64,
    pub cash_balance: f64,
    pub total_unrealized_pnl: f64,
    pub base_currency: String,
}

/// Normalize raw positions into canonical holdings and aggregate the
/// breakdowns. Order matters: breakdowns accumulate per tranche,
/// consolidation collapses tranches afterwards, weights come last so the
/// denominator already includes cash.
pub fn assemble_portfolio(
    positions: &[Position],
    balances: &Balance,
    default_currency: Option<&str>,
) -> AssembledPortfolio {
    let mut asset_breakdown: HashMap<String, f64> = HashMap::new();
    let mut currency_exposure: HashMap<String, f64> = HashMap::new();
    let mut total_unrealized_pnl = 0.0;
    let mut normalized: Vec<Holding> = Vec::with_capacity(positions.len());

    for position in positions {
        let base = &position.position_base;
        let view = position.position_view.as_ref();
        let display = position.display_and_format.as_ref();

        let asset_class = asset_class_for(&base.asset_type);
        let asset_type = asset_type_for(&base.asset_type);
        let currency = display
            .and_then(|d| d.currency.clone())
            .or_else(|| view.and_then(|v| v.exposure_currency.clone()))
            .unwrap_or_else(|| "USD".to_string());

        let market_value = estimate_market_value(position);
        let market_value_base = estimate_market_value_base(position, market_value);

        let current_price = view
            .and_then(|v| v.current_price)
            .and_then(non_zero)
            .unwrap_or_else(|| {
                if market_value != 0.0 && base.amount != 0.0 {
                    market_value / base.amount
                } else {
                    0.0
                }
            });

        let pnl = view.and_then(|v| v.profit_loss_on_trade).unwrap_or(0.0);

        *asset_breakdown.entry(asset_class.to_string()).or_insert(0.0) += market_value_base;
        *currency_exposure.entry(currency.clone()).or_insert(0.0) += market_value;
        total_unrealized_pnl += pnl;

        let symbol = display
            .and_then(|d| d.symbol.clone())
            .unwrap_or_else(|| format!("UIC-{}", base.uic));
        let name = display
            .and_then(|d| d.description.clone())
            .or_else(|| display.and_then(|d| d.symbol.clone()))
            .unwrap_or_else(|| "Unknown".to_string());

        normalized.push(Holding {
            symbol,
            name,
            asset_type: asset_type.to_string(),
            asset_class: asset_class.to_string(),
            quantity: base.amount,
            current_price,
            market_value: market_value_base,
            currency,
            weight: 0.0,
            unrealized_pnl: pnl,
            uic: base.uic,
            saxo_asset_type: base.asset_type.clone(),
        });
    }

    let mut holdings = consolidate_tranches(normalized);

    // Cash is a synthetic breakdown entry, and joins the exposure map
    // under the base currency.
    let base_currency = balances
        .currency
        .clone()
        .or_else(|| default_currency.map(str::to_string))
        .unwrap_or_else(|| "USD".to_string());
    asset_breakdown.insert("Cash".to_string(), balances.cash_balance);
    *currency_exposure.entry(base_currency.clone()).or_insert(0.0) += balances.cash_balance;

    // Prefer the brokerage-reported total; it is the weight denominator and
    // is never recomputed from holdings alone, since cash is not a holding.
    let total_value = non_zero(balances.total_value)
        .unwrap_or_else(|| asset_breakdown.values().sum());

    for holding in &mut holdings {
        holding.weight = if total_value > 0.0 {
            holding.market_value / total_value * 100.0
        } else {
            0.0
        };
    }

    AssembledPortfolio {
        holdings,
        asset_breakdown,
        currency_exposure,
        total_value,
        cash_balance: balances.cash_balance,
        total_unrealized_pnl,
        base_currency,
    }
}

/// Collapse multiple tranches of the same instrument (grouped by display
/// symbol) into one holding: quantities, values and P&L sum; the price
/// becomes the weighted average (total value over total quantity).
/// First-seen order is preserved.
pub fn consolidate_tranches(holdings_in: Vec<Holding>) -> Vec<Holding> {
    let mut merged: Vec<Holding> = Vec::with_capacity(holdings_in.len());
    let mut index_by_symbol: HashMap<String, usize> = HashMap::new();

    for holding in holdings_in {
        match index_by_symbol.get(&holding.symbol) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                existing.quantity += holding.quantity;
                existing.market_value += holding.market_value;
                existing.unrealized_pnl += holding.unrealized_pnl;
                existing.current_price = if existing.quantity > 0.0 {
                    existing.market_value / existing.quantity
                } else {
                    0.0
                };
            }
            None => {
                index_by_symbol.insert(holding.symbol.clone(), merged.len());
                merged.push(holding);
            }
        }
    }
    merged
}
