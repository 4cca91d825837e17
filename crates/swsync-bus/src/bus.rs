//! The bus trait.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

use crate::types::{DbId, FieldValues, KeyOpFieldsValues};

/// Errors from bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("bus command error: {0}")]
    Command(String),

    #[error("invalid bus payload: {0}")]
    InvalidPayload(String),

    #[error("rejected publish: {0}")]
    Rejected(String),
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// A per-table delta feed. Deltas arrive in bus order per key; the shared
/// `Notify` is pinged after every enqueue so a selector can block on many
/// feeds at once.
pub struct DeltaSubscription {
    pub rx: UnboundedReceiver<KeyOpFieldsValues>,
    pub notify: Arc<Notify>,
}

/// A pub/sub channel feed carrying opaque payload strings.
pub struct NotificationSubscription {
    pub rx: UnboundedReceiver<String>,
    pub notify: Arc<Notify>,
}

/// Typed accessors over the key/value + pub-sub store.
///
/// `set` merges fields into the entry (matching the producer-side hash
/// semantics); `del` drops the whole entry. Subscriptions deliver SET/DEL
/// deltas for one table; channel publishes fan out to all subscribers.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn get(&self, db: DbId, table: &str, key: &str) -> BusResult<Option<FieldValues>>;

    async fn get_field(
        &self,
        db: DbId,
        table: &str,
        key: &str,
        field: &str,
    ) -> BusResult<Option<String>> {
        Ok(self
            .get(db, table, key)
            .await?
            .and_then(|fvs| fvs.into_iter().find(|(f, _)| f == field).map(|(_, v)| v)))
    }

    async fn set(&self, db: DbId, table: &str, key: &str, fvs: &FieldValues) -> BusResult<()>;

    async fn del(&self, db: DbId, table: &str, key: &str) -> BusResult<()>;

    async fn keys(&self, db: DbId, table: &str) -> BusResult<Vec<String>>;

    /// Subscribes to one table's delta feed. The `notify` handle is shared
    /// by the caller's selector so a single wait covers every subscription.
    async fn subscribe(
        &self,
        db: DbId,
        table: &str,
        notify: Arc<Notify>,
    ) -> BusResult<DeltaSubscription>;

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()>;

    async fn subscribe_channel(
        &self,
        channel: &str,
        notify: Arc<Notify>,
    ) -> BusResult<NotificationSubscription>;
}

/// Schema-level publish checks shared by every bus implementation.
///
/// A route record may carry either a `nexthop_group` reference or direct
/// `nexthop`/`ifname` fields, never both; the contradiction is rejected
/// before it reaches any consumer.
pub fn validate_set(table: &str, fvs: &FieldValues) -> BusResult<()> {
    if table == crate::tables::APP_ROUTE_TABLE || table == crate::tables::APP_LABEL_ROUTE_TABLE {
        let has_group = fvs.iter().any(|(f, _)| f == "nexthop_group");
        let has_direct = fvs.iter().any(|(f, _)| f == "nexthop" || f == "ifname");
        if has_group && has_direct {
            return Err(BusError::Rejected(format!(
                "{}: nexthop_group excludes nexthop/ifname",
                table
            )));
        }
    }
    Ok(())
}
