use chrono::{DateTime, Utc};

/// A brokerage account mirrored locally. Reference data: upserted on every
/// snapshot build, never deleted by the sync path.
#[derive(Debug, Clone)]
pub struct BrokerAccount {
    pub id: String,
    pub connection_id: String,
    /// Opaque Saxo AccountKey, unique within a connection.
    pub account_key: String,
    /// Human-facing Saxo account id (e.g. "1234567INET").
    pub account_id: String,
    pub display_name: String,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}
