use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::Connection as _;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::BrokerAccount;
use crate::models::credential::{Connection, Credential};
use crate::models::snapshot::{Holding, PortfolioSnapshot};
use crate::providers::saxo::client::AccountData;
use crate::storage::encryption::EncryptedSecret;

use super::db::{get_connection, DbPool};
use super::models::{AccountRow, ConnectionRow, CredentialRow, HoldingRow, SnapshotRow};
use super::schema::{accounts, connections, credentials, holdings, snapshots};

/// All relational reads and writes the core performs, behind one facade.
pub struct Store {
    pool: Arc<DbPool>,
}

impl Store {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    // ── connections ─────────────────────────────────────────────────

    /// Create the connection row for a user if it doesn't exist yet and
    /// return it. Existing rows are left untouched.
    pub fn upsert_connection(&self, user_id: &str) -> Result<Connection, CoreError> {
        let mut conn = get_connection(&self.pool)?;

        let row = ConnectionRow {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            client_key: None,
            created_at: Utc::now().naive_utc(),
        };
        diesel::insert_into(connections::table)
            .values(&row)
            .on_conflict(connections::user_id)
            .do_nothing()
            .execute(&mut conn)?;

        let stored: ConnectionRow = connections::table
            .filter(connections::user_id.eq(user_id))
            .first(&mut conn)?;
        Ok(stored.into())
    }

    pub fn find_connection(&self, user_id: &str) -> Result<Option<Connection>, CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<ConnectionRow> = connections::table
            .filter(connections::user_id.eq(user_id))
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Connection::from))
    }

    pub fn set_client_key(&self, connection_id: &str, client_key: &str) -> Result<(), CoreError> {
        let mut conn = get_connection(&self.pool)?;
        diesel::update(connections::table.find(connection_id))
            .set(connections::client_key.eq(client_key))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Delete a user's connection. Credential and mirrored accounts go with
    /// it via foreign-key cascade. Returns whether anything was deleted.
    pub fn delete_connection(&self, user_id: &str) -> Result<bool, CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let deleted =
            diesel::delete(connections::table.filter(connections::user_id.eq(user_id)))
                .execute(&mut conn)?;
        Ok(deleted > 0)
    }

    // ── credentials ─────────────────────────────────────────────────

    pub fn find_credential(&self, connection_id: &str) -> Result<Option<Credential>, CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<CredentialRow> = credentials::table
            .filter(credentials::connection_id.eq(connection_id))
            .first(&mut conn)
            .optional()?;
        row.map(Credential::try_from).transpose()
    }

    /// Seed the credential at the start of the OAuth flow: empty secrets,
    /// epoch expiries, fresh verifier. If a credential already exists only
    /// the verifier is replaced, so a restarted flow doesn't clobber a
    /// still-working token pair.
    pub fn init_placeholder_credential(
        &self,
        connection_id: &str,
        code_verifier: &str,
    ) -> Result<(), CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().naive_utc();
        let epoch = DateTime::<Utc>::UNIX_EPOCH.naive_utc();

        let row = CredentialRow {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            access_token: String::new(),
            refresh_token: String::new(),
            access_token_expires_at: epoch,
            refresh_token_expires_at: epoch,
            code_verifier: Some(code_verifier.to_string()),
            updated_at: now,
        };
        diesel::insert_into(credentials::table)
            .values(&row)
            .on_conflict(credentials::connection_id)
            .do_update()
            .set((
                credentials::code_verifier.eq(code_verifier),
                credentials::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Persist a fresh token pair. One write: creates the row if absent,
    /// otherwise overwrites every token field.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_tokens(
        &self,
        connection_id: &str,
        access_token: &EncryptedSecret,
        refresh_token: &EncryptedSecret,
        access_token_expires_at: DateTime<Utc>,
        refresh_token_expires_at: DateTime<Utc>,
        code_verifier: &str,
    ) -> Result<(), CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().naive_utc();
        let access_encoded = access_token.encode();
        let refresh_encoded = refresh_token.encode();

        let row = CredentialRow {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            access_token: access_encoded.clone(),
            refresh_token: refresh_encoded.clone(),
            access_token_expires_at: access_token_expires_at.naive_utc(),
            refresh_token_expires_at: refresh_token_expires_at.naive_utc(),
            code_verifier: Some(code_verifier.to_string()),
            updated_at: now,
        };
        diesel::insert_into(credentials::table)
            .values(&row)
            .on_conflict(credentials::connection_id)
            .do_update()
            .set((
                credentials::access_token.eq(access_encoded),
                credentials::refresh_token.eq(refresh_encoded),
                credentials::access_token_expires_at.eq(access_token_expires_at.naive_utc()),
                credentials::refresh_token_expires_at.eq(refresh_token_expires_at.naive_utc()),
                credentials::code_verifier.eq(code_verifier),
                credentials::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Force both expiries to the epoch so subsequent reads see a dead
    /// credential and stop retrying a doomed refresh.
    pub fn invalidate_credential(&self, connection_id: &str) -> Result<(), CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let epoch = DateTime::<Utc>::UNIX_EPOCH.naive_utc();
        diesel::update(
            credentials::table.filter(credentials::connection_id.eq(connection_id)),
        )
        .set((
            credentials::access_token_expires_at.eq(epoch),
            credentials::refresh_token_expires_at.eq(epoch),
            credentials::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
        Ok(())
    }

    // ── accounts ────────────────────────────────────────────────────

    /// Upsert a brokerage account keyed by `(connection_id, account_key)`.
    pub fn upsert_account(
        &self,
        connection_id: &str,
        account: &AccountData,
    ) -> Result<(), CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().naive_utc();
        let display_name = account
            .display_name
            .clone()
            .unwrap_or_else(|| account.account_id.clone());

        let row = AccountRow {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            account_key: account.account_key.clone(),
            account_id: account.account_id.clone(),
            display_name: display_name.clone(),
            currency: account.currency.clone(),
            updated_at: now,
        };
        diesel::insert_into(accounts::table)
            .values(&row)
            .on_conflict((accounts::connection_id, accounts::account_key))
            .do_update()
            .set((
                accounts::display_name.eq(display_name),
                accounts::currency.eq(account.currency.clone()),
                accounts::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn accounts_for_connection(
        &self,
        connection_id: &str,
    ) -> Result<Vec<BrokerAccount>, CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let rows: Vec<AccountRow> = accounts::table
            .filter(accounts::connection_id.eq(connection_id))
            .order(accounts::account_key.asc())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(BrokerAccount::from).collect())
    }

    // ── snapshots ───────────────────────────────────────────────────

    /// Insert a snapshot with its holdings in one transaction. Snapshots
    /// are append-only; nothing here updates prior rows.
    pub fn insert_snapshot(
        &self,
        snapshot: &PortfolioSnapshot,
        holdings_list: &[Holding],
    ) -> Result<(), CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let snapshot_row = SnapshotRow::from_domain(snapshot)?;
        let holding_rows: Vec<HoldingRow> = holdings_list
            .iter()
            .map(|h| HoldingRow::from_domain(&snapshot.id, h))
            .collect();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(snapshots::table)
                .values(&snapshot_row)
                .execute(conn)?;
            diesel::insert_into(holdings::table)
                .values(&holding_rows)
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    /// The dashboard read: most recent snapshot for a user, with holdings.
    pub fn latest_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<(PortfolioSnapshot, Vec<Holding>)>, CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<SnapshotRow> = snapshots::table
            .filter(snapshots::user_id.eq(user_id))
            .order(snapshots::snapshot_at.desc())
            .first(&mut conn)
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let holding_rows: Vec<HoldingRow> = holdings::table
            .filter(holdings::snapshot_id.eq(&row.id))
            .order(holdings::market_value.desc())
            .load(&mut conn)?;

        let snapshot = PortfolioSnapshot::try_from(row)?;
        let holdings_list = holding_rows.into_iter().map(Holding::from).collect();
        Ok(Some((snapshot, holdings_list)))
    }

    /// Recent snapshots, newest first, without holdings. Used for history
    /// charts.
    pub fn snapshot_history(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<PortfolioSnapshot>, CoreError> {
        let mut conn = get_connection(&self.pool)?;
        let rows: Vec<SnapshotRow> = snapshots::table
            .filter(snapshots::user_id.eq(user_id))
            .order(snapshots::snapshot_at.desc())
            .limit(limit)
            .load(&mut conn)?;
        rows.into_iter().map(PortfolioSnapshot::try_from).collect()
    }
}
