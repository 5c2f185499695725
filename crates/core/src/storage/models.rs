//! Diesel row types and their conversions to the domain models.
//!
//! Sealed secrets live in text columns using the `EncryptedSecret` encoding;
//! an empty column means "placeholder, not yet populated". Breakdown maps
//! are JSON text.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;
use std::collections::HashMap;

use crate::errors::CoreError;
use crate::models::account::BrokerAccount;
use crate::models::credential::{Connection, Credential};
use crate::models::snapshot::{Holding, PortfolioSnapshot};
use crate::storage::encryption::EncryptedSecret;

use super::schema::{accounts, connections, credentials, holdings, snapshots};

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

// ── connections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = connections)]
pub struct ConnectionRow {
    pub id: String,
    pub user_id: String,
    pub client_key: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<ConnectionRow> for Connection {
    fn from(row: ConnectionRow) -> Self {
        Connection {
            id: row.id,
            user_id: row.user_id,
            client_key: row.client_key,
            created_at: to_utc(row.created_at),
        }
    }
}

// ── credentials ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = credentials)]
pub struct CredentialRow {
    pub id: String,
    pub connection_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: NaiveDateTime,
    pub refresh_token_expires_at: NaiveDateTime,
    pub code_verifier: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = CoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Credential {
            id: row.id,
            connection_id: row.connection_id,
            access_token: decode_optional_secret(&row.access_token)?,
            refresh_token: decode_optional_secret(&row.refresh_token)?,
            access_token_expires_at: to_utc(row.access_token_expires_at),
            refresh_token_expires_at: to_utc(row.refresh_token_expires_at),
            code_verifier: row.code_verifier,
            updated_at: to_utc(row.updated_at),
        })
    }
}

fn decode_optional_secret(column: &str) -> Result<Option<EncryptedSecret>, CoreError> {
    if column.is_empty() {
        return Ok(None);
    }
    EncryptedSecret::decode(column).map(Some)
}

// ── accounts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = accounts)]
pub struct AccountRow {
    pub id: String,
    pub connection_id: String,
    pub account_key: String,
    pub account_id: String,
    pub display_name: String,
    pub currency: String,
    pub updated_at: NaiveDateTime,
}

impl From<AccountRow> for BrokerAccount {
    fn from(row: AccountRow) -> Self {
        BrokerAccount {
            id: row.id,
            connection_id: row.connection_id,
            account_key: row.account_key,
            account_id: row.account_id,
            display_name: row.display_name,
            currency: row.currency,
            updated_at: to_utc(row.updated_at),
        }
    }
}

// ── snapshots / holdings ────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = snapshots)]
pub struct SnapshotRow {
    pub id: String,
    pub user_id: String,
    pub snapshot_at: NaiveDateTime,
    pub total_value: f64,
    pub cash_balance: f64,
    pub unrealized_pnl: f64,
    pub currency: String,
    pub asset_breakdown: String,
    pub currency_exposure: String,
}

impl SnapshotRow {
    pub fn from_domain(snapshot: &PortfolioSnapshot) -> Result<Self, CoreError> {
        Ok(Self {
            id: snapshot.id.clone(),
            user_id: snapshot.user_id.clone(),
            snapshot_at: snapshot.snapshot_at.naive_utc(),
            total_value: snapshot.total_value,
            cash_balance: snapshot.cash_balance,
            unrealized_pnl: snapshot.unrealized_pnl,
            currency: snapshot.currency.clone(),
            asset_breakdown: serde_json::to_string(&snapshot.asset_breakdown)?,
            currency_exposure: serde_json::to_string(&snapshot.currency_exposure)?,
        })
    }
}

impl TryFrom<SnapshotRow> for PortfolioSnapshot {
    type Error = CoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let asset_breakdown: HashMap<String, f64> = serde_json::from_str(&row.asset_breakdown)?;
        let currency_exposure: HashMap<String, f64> = serde_json::from_str(&row.currency_exposure)?;
        Ok(PortfolioSnapshot {
            id: row.id,
            user_id: row.user_id,
            snapshot_at: to_utc(row.snapshot_at),
            total_value: row.total_value,
            cash_balance: row.cash_balance,
            unrealized_pnl: row.unrealized_pnl,
            currency: row.currency,
            asset_breakdown,
            currency_exposure,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = holdings)]
pub struct HoldingRow {
    pub id: String,
    pub snapshot_id: String,
    pub symbol: String,
    pub name: String,
    pub asset_type: String,
    pub asset_class: String,
    pub quantity: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub currency: String,
    pub weight: f64,
    pub unrealized_pnl: f64,
    pub uic: i64,
    pub saxo_asset_type: String,
}

impl HoldingRow {
    pub fn from_domain(snapshot_id: &str, holding: &Holding) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            snapshot_id: snapshot_id.to_string(),
            symbol: holding.symbol.clone(),
            name: holding.name.clone(),
            asset_type: holding.asset_type.clone(),
            asset_class: holding.asset_class.clone(),
            quantity: holding.quantity,
            current_price: holding.current_price,
            market_value: holding.market_value,
            currency: holding.currency.clone(),
            weight: holding.weight,
            unrealized_pnl: holding.unrealized_pnl,
            uic: holding.uic,
            saxo_asset_type: holding.saxo_asset_type.clone(),
        }
    }
}

impl From<HoldingRow> for Holding {
    fn from(row: HoldingRow) -> Self {
        Holding {
            symbol: row.symbol,
            name: row.name,
            asset_type: row.asset_type,
            asset_class: row.asset_class,
            quantity: row.quantity,
            current_price: row.current_price,
            market_value: row.market_value,
            currency: row.currency,
            weight: row.weight,
            unrealized_pnl: row.unrealized_pnl,
            uic: row.uic,
            saxo_asset_type: row.saxo_asset_type,
        }
    }
}
