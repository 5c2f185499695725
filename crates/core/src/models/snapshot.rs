use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One consolidated instrument row inside a snapshot.
///
/// Identity within a snapshot is the display symbol: multiple brokerage
/// tranches of the same instrument collapse into one holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    /// Canonical fine-grained type, e.g. "Stock" / "ETF" / "Fund".
    pub asset_type: String,
    /// Coarser bucket used for the breakdown chart, e.g. "Stocks" / "ETFs".
    pub asset_class: String,
    pub quantity: f64,
    pub current_price: f64,
    /// Value in the snapshot's base/reporting currency.
    pub market_value: f64,
    /// Native currency of the instrument.
    pub currency: String,
    /// Percent of the snapshot's total value.
    pub weight: f64,
    pub unrealized_pnl: f64,
    /// Saxo instrument identifier pair, kept for detail/quote/chart lookups.
    pub uic: i64,
    pub saxo_asset_type: String,
}

/// An immutable point-in-time capture of the portfolio. A refresh always
/// creates a new snapshot; existing rows are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id: String,
    pub user_id: String,
    pub snapshot_at: DateTime<Utc>,
    pub total_value: f64,
    pub cash_balance: f64,
    pub unrealized_pnl: f64,
    /// Base/reporting currency of the totals.
    pub currency: String,
    /// Asset-class label to aggregate value, in base currency.
    pub asset_breakdown: HashMap<String, f64>,
    /// Currency code to aggregate value, in each position's native
    /// currency (not base-converted; see DESIGN.md).
    pub currency_exposure: HashMap<String, f64>,
}

/// What a refresh call returns to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub total_value: f64,
    pub cash_balance: f64,
    pub unrealized_pnl: f64,
    pub currency: String,
    pub asset_breakdown: HashMap<String, f64>,
    pub currency_exposure: HashMap<String, f64>,
    pub holdings_count: usize,
    pub snapshot_at: DateTime<Utc>,
}
