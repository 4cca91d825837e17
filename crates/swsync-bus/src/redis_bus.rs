//! Redis-backed bus implementation.
//!
//! Table entries live as hashes at `TABLE<sep>key` in the database the
//! [`DbId`] selects. Change feeds use the two client modes the platform
//! defines:
//!
//! - config side: Redis keyspace notifications (`notify-keyspace-events KEA`
//!   must be enabled bus-side); on an event the entry is re-read and a
//!   SET/DEL delta synthesized
//! - app side: a coalescing producer queue per table (`_<TABLE>_DELTAS`
//!   list); producers push the delta, the subscription task pops in order
//!
//! Channel publishes map to plain pub/sub.

use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_stream::StreamExt;

use crate::bus::{
    validate_set, Bus, BusError, BusResult, DeltaSubscription, NotificationSubscription,
};
use crate::types::{DbId, FieldValues, KeyOpFieldsValues, Operation};

const ALL_DBS: [DbId; 5] = [
    DbId::Appl,
    DbId::Counters,
    DbId::Config,
    DbId::State,
    DbId::Error,
];

/// Connection parameters for the bus instance.
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl RedisBusConfig {
    fn url(&self, db: DbId) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, db.index())
    }
}

/// Redis-backed bus client.
pub struct RedisBus {
    config: RedisBusConfig,
    connections: HashMap<DbId, ConnectionManager>,
}

impl RedisBus {
    /// Connects to every logical database up front.
    pub async fn connect(config: RedisBusConfig) -> BusResult<Self> {
        let mut connections = HashMap::new();
        for db in ALL_DBS {
            let url = config.url(db);
            let client = redis::Client::open(url.as_str())
                .map_err(|e| BusError::Connection(format!("{}: {}", url, e)))?;
            let manager = client
                .get_connection_manager()
                .await
                .map_err(|e| BusError::Connection(format!("{}: {}", url, e)))?;
            connections.insert(db, manager);
        }
        info!("connected to bus at {}:{}", config.host, config.port);
        Ok(Self {
            config,
            connections,
        })
    }

    fn conn(&self, db: DbId) -> ConnectionManager {
        self.connections[&db].clone()
    }

    fn entry_key(db: DbId, table: &str, key: &str) -> String {
        format!("{}{}{}", table, db.separator(), key)
    }

    fn delta_queue(table: &str) -> String {
        format!("_{}_DELTAS", table)
    }

    fn encode_delta(delta: &KeyOpFieldsValues) -> String {
        serde_json::json!({
            "key": delta.key,
            "op": delta.op.as_str(),
            "fvs": delta.fvs,
        })
        .to_string()
    }

    fn decode_delta(payload: &str) -> BusResult<KeyOpFieldsValues> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| BusError::InvalidPayload(e.to_string()))?;
        let key = value["key"]
            .as_str()
            .ok_or_else(|| BusError::InvalidPayload("missing key".into()))?
            .to_string();
        let op = match value["op"].as_str() {
            Some("SET") => Operation::Set,
            Some("DEL") => Operation::Del,
            other => {
                return Err(BusError::InvalidPayload(format!("bad op {:?}", other)));
            }
        };
        let fvs = value["fvs"]
            .as_array()
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|pair| {
                        let f = pair.get(0)?.as_str()?.to_string();
                        let v = pair.get(1)?.as_str()?.to_string();
                        Some((f, v))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(KeyOpFieldsValues { key, op, fvs })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn get(&self, db: DbId, table: &str, key: &str) -> BusResult<Option<FieldValues>> {
        let mut conn = self.conn(db);
        let fields: HashMap<String, String> = conn
            .hgetall(Self::entry_key(db, table, key))
            .await
            .map_err(|e| BusError::Command(e.to_string()))?;
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields.into_iter().collect()))
        }
    }

    async fn set(&self, db: DbId, table: &str, key: &str, fvs: &FieldValues) -> BusResult<()> {
        validate_set(table, fvs)?;
        let mut conn = self.conn(db);
        if !fvs.is_empty() {
            let pairs: Vec<(&str, &str)> = fvs
                .iter()
                .map(|(f, v)| (f.as_str(), v.as_str()))
                .collect();
            let _: () = conn
                .hset_multiple(Self::entry_key(db, table, key), &pairs)
                .await
                .map_err(|e| BusError::Command(e.to_string()))?;
        }
        if !db.uses_keyspace_events() {
            let delta = KeyOpFieldsValues::set(key, fvs.clone());
            let _: () = conn
                .lpush(Self::delta_queue(table), Self::encode_delta(&delta))
                .await
                .map_err(|e| BusError::Command(e.to_string()))?;
        }
        Ok(())
    }

    async fn del(&self, db: DbId, table: &str, key: &str) -> BusResult<()> {
        let mut conn = self.conn(db);
        let _: () = conn
            .del(Self::entry_key(db, table, key))
            .await
            .map_err(|e| BusError::Command(e.to_string()))?;
        if !db.uses_keyspace_events() {
            let delta = KeyOpFieldsValues::del(key);
            let _: () = conn
                .lpush(Self::delta_queue(table), Self::encode_delta(&delta))
                .await
                .map_err(|e| BusError::Command(e.to_string()))?;
        }
        Ok(())
    }

    async fn keys(&self, db: DbId, table: &str) -> BusResult<Vec<String>> {
        let mut conn = self.conn(db);
        let pattern = format!("{}{}*", table, db.separator());
        let raw: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| BusError::Command(e.to_string()))?;
        Ok(raw
            .into_iter()
            .filter_map(|k| {
                k.split_once(db.separator())
                    .map(|(_, key)| key.to_string())
            })
            .collect())
    }

    async fn subscribe(
        &self,
        db: DbId,
        table: &str,
        notify: Arc<Notify>,
    ) -> BusResult<DeltaSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        if db.uses_keyspace_events() {
            // Keyspace mode: watch `__keyspace@<db>__:<TABLE>|*` and re-read
            // the touched entry to synthesize the delta.
            let url = self.config.url(db);
            let client = redis::Client::open(url.as_str())
                .map_err(|e| BusError::Connection(e.to_string()))?;
            let mut pubsub = client
                .get_async_pubsub()
                .await
                .map_err(|e| BusError::Connection(e.to_string()))?;
            let pattern = format!("__keyspace@{}__:{}{}*", db.index(), table, db.separator());
            pubsub
                .psubscribe(&pattern)
                .await
                .map_err(|e| BusError::Command(e.to_string()))?;

            let mut conn = self.conn(db);
            let table = table.to_string();
            let feed_notify = notify.clone();
            tokio::spawn(async move {
                let mut stream = pubsub.on_message();
                while let Some(message) = stream.next().await {
                    let channel: String = message.get_channel_name().to_string();
                    let Some(entry_key) = channel.split_once("__:").map(|(_, k)| k) else {
                        continue;
                    };
                    let Some((_, key)) = entry_key.split_once(db.separator()) else {
                        continue;
                    };
                    let event: String = match message.get_payload() {
                        Ok(event) => event,
                        Err(_) => continue,
                    };
                    let delta = if event == "del" {
                        KeyOpFieldsValues::del(key)
                    } else {
                        let fields: HashMap<String, String> =
                            conn.hgetall(entry_key).await.unwrap_or_default();
                        KeyOpFieldsValues::set(key, fields.into_iter().collect())
                    };
                    if tx.send(delta).is_err() {
                        break;
                    }
                    feed_notify.notify_one();
                }
                debug!("keyspace feed for {} ended", table);
            });
        } else {
            // Producer-queue mode: pop deltas in order from the table queue.
            let mut conn = self.conn(db);
            let queue = Self::delta_queue(table);
            let table = table.to_string();
            let feed_notify = notify.clone();
            tokio::spawn(async move {
                loop {
                    let popped: Result<Option<(String, String)>, _> =
                        conn.brpop(&queue, 1.0).await;
                    match popped {
                        Ok(Some((_, payload))) => match Self::decode_delta(&payload) {
                            Ok(delta) => {
                                if tx.send(delta).is_err() {
                                    break;
                                }
                                feed_notify.notify_one();
                            }
                            Err(e) => warn!("{}: dropping bad delta: {}", table, e),
                        },
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("{}: queue pop failed: {}", table, e);
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            });
        }
        Ok(DeltaSubscription { rx, notify })
    }

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        let mut conn = self.conn(DbId::Error);
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Command(e.to_string()))?;
        Ok(())
    }

    async fn subscribe_channel(
        &self,
        channel: &str,
        notify: Arc<Notify>,
    ) -> BusResult<NotificationSubscription> {
        let url = self.config.url(DbId::Error);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Command(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let feed_notify = notify.clone();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(_) => continue,
                };
                if tx.send(payload).is_err() {
                    break;
                }
                feed_notify.notify_one();
            }
        });
        Ok(NotificationSubscription { rx, notify })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_codec_round_trip() {
        let delta = KeyOpFieldsValues::set(
            "10.0.0.0/24",
            vec![("nexthop".into(), "10.1.1.2".into())],
        );
        let decoded = RedisBus::decode_delta(&RedisBus::encode_delta(&delta)).unwrap();
        assert_eq!(decoded, delta);

        let del = KeyOpFieldsValues::del("10.0.0.0/24");
        assert_eq!(RedisBus::decode_delta(&RedisBus::encode_delta(&del)).unwrap(), del);
    }

    #[test]
    fn entry_key_uses_db_separator() {
        assert_eq!(
            RedisBus::entry_key(DbId::Config, "VLAN", "Vlan100"),
            "VLAN|Vlan100"
        );
        assert_eq!(
            RedisBus::entry_key(DbId::Appl, "ROUTE_TABLE", "10.0.0.0/24"),
            "ROUTE_TABLE:10.0.0.0/24"
        );
    }
}
