//! Purchase persistence
//!
//! Data model (Redis):
//! - purchase:{id} → Hash with purchase fields (idempotent upsert)
//! - purchases:all → Set of all purchase ids
//! - purchases:active → Set of non-terminal purchase ids
//! - secret:{address} → deposit spending secret, write-once (SETNX)
//! - granted:{id} → grant guard, write-once (SETNX)
//!
//! Secrets live under their own keys and are never written into the
//! purchase hash, so purchase records can be serialized to logs and API
//! responses without leaking spending credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use broker_common::{Error, Result};

use crate::workflow::{Purchase, PurchaseState};

/// Aggregate counters for the stats endpoint
#[derive(Debug, Serialize)]
pub struct PurchaseStats {
    pub total: usize,
    pub active: usize,
    pub granted: usize,
    pub timed_out: usize,
    /// Sum of observed payment values on granted purchases, smallest units
    pub collected_units: u64,
}

/// Persistence contract shared by the workflow, registry, and API
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Write the full purchase record, keyed by id. Safe to retry.
    async fn upsert(&self, purchase: &Purchase) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Purchase>>;

    /// Ids of purchases not yet in a terminal state
    async fn active_ids(&self) -> Result<Vec<String>>;

    /// Store a deposit secret, write-once. Returns false if one already
    /// exists for this address.
    async fn put_secret(&self, address: &str, secret: &str) -> Result<bool>;

    /// Read a deposit secret back (sweep signing only)
    async fn get_secret(&self, address: &str) -> Result<Option<String>>;

    /// Acquire the one-shot grant guard for a purchase. Returns true the
    /// first time only, across any number of process restarts.
    async fn try_acquire_grant(&self, id: &str) -> Result<bool>;

    async fn stats(&self) -> Result<PurchaseStats>;

    async fn health_check(&self) -> Result<()>;
}

fn redis_err(e: redis::RedisError) -> Error {
    Error::Storage(e.to_string())
}

/// Redis-backed store
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Configuration(format!("invalid Redis URL: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(redis_err)?;

        info!("Successfully connected to Redis");

        Ok(Self { conn })
    }

    fn purchase_key(id: &str) -> String {
        format!("purchase:{}", id)
    }

    fn fields(purchase: &Purchase) -> Vec<(&'static str, String)> {
        vec![
            ("id", purchase.id.clone()),
            ("buyer", purchase.buyer.clone()),
            ("deposit_address", purchase.deposit_address.clone()),
            ("price_fiat", purchase.price_fiat.to_string()),
            ("required_units", purchase.required_units.to_string()),
            ("state", purchase.state.to_string()),
            ("context_id", purchase.context_id.clone().unwrap_or_default()),
            (
                "observed_tx_id",
                purchase.observed_tx_id.clone().unwrap_or_default(),
            ),
            ("observed_value", purchase.observed_value.to_string()),
            ("confirmations", purchase.confirmations.to_string()),
            (
                "sweep_tx_id",
                purchase.sweep_tx_id.clone().unwrap_or_default(),
            ),
            ("created_at", purchase.created_at.to_rfc3339()),
            (
                "granted_at",
                purchase
                    .granted_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ),
        ]
    }

    fn from_fields(map: HashMap<String, String>) -> Option<Purchase> {
        let id = map.get("id")?.clone();
        if id.is_empty() {
            return None;
        }

        let nonempty = |key: &str| map.get(key).filter(|s| !s.is_empty()).cloned();
        let timestamp = |s: &String| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        };

        Some(Purchase {
            deposit_address: map.get("deposit_address").cloned().unwrap_or_else(|| id.clone()),
            buyer: map.get("buyer").cloned().unwrap_or_default(),
            price_fiat: map
                .get("price_fiat")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),
            required_units: map
                .get("required_units")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            state: map
                .get("state")
                .and_then(|s| s.parse().ok())
                .unwrap_or(PurchaseState::Created),
            context_id: nonempty("context_id"),
            observed_tx_id: nonempty("observed_tx_id"),
            observed_value: map
                .get("observed_value")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            confirmations: map
                .get("confirmations")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            sweep_tx_id: nonempty("sweep_tx_id"),
            created_at: map
                .get("created_at")
                .and_then(|s| timestamp(s))
                .unwrap_or_else(Utc::now),
            granted_at: nonempty("granted_at").as_ref().and_then(timestamp),
            id,
        })
    }
}

#[async_trait]
impl PurchaseStore for RedisStore {
    async fn upsert(&self, purchase: &Purchase) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::purchase_key(&purchase.id);

        let fields = Self::fields(purchase);
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let _: () = conn.hset_multiple(&key, &pairs).await.map_err(redis_err)?;

        let _: () = conn
            .sadd("purchases:all", &purchase.id)
            .await
            .map_err(redis_err)?;

        if purchase.state.is_terminal() {
            let _: () = conn
                .srem("purchases:active", &purchase.id)
                .await
                .map_err(redis_err)?;
        } else {
            let _: () = conn
                .sadd("purchases:active", &purchase.id)
                .await
                .map_err(redis_err)?;
        }

        debug!(
            "Upserted purchase {} in state {}",
            purchase.id, purchase.state
        );

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Purchase>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn
            .hgetall(Self::purchase_key(id))
            .await
            .map_err(redis_err)?;

        if map.is_empty() {
            return Ok(None);
        }

        Ok(Self::from_fields(map))
    }

    async fn active_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers("purchases:active").await.map_err(redis_err)
    }

    async fn put_secret(&self, address: &str, secret: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let inserted: bool = conn
            .set_nx(format!("secret:{}", address), secret)
            .await
            .map_err(redis_err)?;

        if inserted {
            info!("Stored deposit secret for {}", address);
        }

        Ok(inserted)
    }

    async fn get_secret(&self, address: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(format!("secret:{}", address))
            .await
            .map_err(redis_err)
    }

    async fn try_acquire_grant(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: bool = conn
            .set_nx(format!("granted:{}", id), Utc::now().to_rfc3339())
            .await
            .map_err(redis_err)?;

        Ok(acquired)
    }

    async fn stats(&self) -> Result<PurchaseStats> {
        let mut conn = self.conn.clone();
        let all: Vec<String> = conn.smembers("purchases:all").await.map_err(redis_err)?;
        let active: usize = conn.scard("purchases:active").await.map_err(redis_err)?;

        let mut granted = 0usize;
        let mut timed_out = 0usize;
        let mut collected_units = 0u64;

        for id in &all {
            let map: HashMap<String, String> = conn
                .hgetall(Self::purchase_key(id))
                .await
                .map_err(redis_err)?;
            let Some(purchase) = Self::from_fields(map) else {
                continue;
            };

            if purchase.granted_at.is_some() {
                granted += 1;
                collected_units += purchase.observed_value;
            }
            if purchase.state == PurchaseState::TimedOut {
                timed_out += 1;
            }
        }

        Ok(PurchaseStats {
            total: all.len(),
            active,
            granted,
            timed_out,
            collected_units,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        Ok(())
    }
}

/// In-memory store for mock mode and tests
#[derive(Default)]
pub struct MemoryStore {
    purchases: Mutex<HashMap<String, Purchase>>,
    secrets: Mutex<HashMap<String, String>>,
    grants: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn upsert(&self, purchase: &Purchase) -> Result<()> {
        self.purchases
            .lock()
            .unwrap()
            .insert(purchase.id.clone(), purchase.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Purchase>> {
        Ok(self.purchases.lock().unwrap().get(id).cloned())
    }

    async fn active_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .purchases
            .lock()
            .unwrap()
            .values()
            .filter(|p| !p.state.is_terminal())
            .map(|p| p.id.clone())
            .collect())
    }

    async fn put_secret(&self, address: &str, secret: &str) -> Result<bool> {
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(address) {
            return Ok(false);
        }
        secrets.insert(address.to_string(), secret.to_string());
        Ok(true)
    }

    async fn get_secret(&self, address: &str) -> Result<Option<String>> {
        Ok(self.secrets.lock().unwrap().get(address).cloned())
    }

    async fn try_acquire_grant(&self, id: &str) -> Result<bool> {
        let mut grants = self.grants.lock().unwrap();
        if grants.contains_key(id) {
            return Ok(false);
        }
        grants.insert(id.to_string(), Utc::now());
        Ok(true)
    }

    async fn stats(&self) -> Result<PurchaseStats> {
        let purchases = self.purchases.lock().unwrap();

        let granted: Vec<_> = purchases
            .values()
            .filter(|p| p.granted_at.is_some())
            .collect();

        Ok(PurchaseStats {
            total: purchases.len(),
            active: purchases.values().filter(|p| !p.state.is_terminal()).count(),
            granted: granted.len(),
            timed_out: purchases
                .values()
                .filter(|p| p.state == PurchaseState::TimedOut)
                .count(),
            collected_units: granted.iter().map(|p| p.observed_value).sum(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_purchase(id: &str) -> Purchase {
        Purchase::new("buyer#1".to_string(), id.to_string(), 30.0, 30_000_000)
    }

    #[tokio::test]
    async fn test_memory_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let purchase = sample_purchase("addr1");

        store.upsert(&purchase).await.unwrap();
        store.upsert(&purchase).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test]
    async fn test_memory_secret_is_write_once() {
        let store = MemoryStore::new();

        assert!(store.put_secret("addr1", "s1").await.unwrap());
        assert!(!store.put_secret("addr1", "s2").await.unwrap());
        assert_eq!(
            store.get_secret("addr1").await.unwrap(),
            Some("s1".to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_grant_guard_is_one_shot() {
        let store = MemoryStore::new();

        assert!(store.try_acquire_grant("addr1").await.unwrap());
        assert!(!store.try_acquire_grant("addr1").await.unwrap());
        assert!(store.try_acquire_grant("addr2").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_active_ids_exclude_terminal() {
        let store = MemoryStore::new();

        let mut a = sample_purchase("addr1");
        let mut b = sample_purchase("addr2");
        b.state = PurchaseState::TimedOut;

        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();
        assert_eq!(store.active_ids().await.unwrap(), vec!["addr1".to_string()]);

        a.state = PurchaseState::Granted;
        store.upsert(&a).await.unwrap();
        assert!(store.active_ids().await.unwrap().is_empty());
    }

    #[test]
    fn test_redis_field_roundtrip() {
        let mut purchase = sample_purchase("addr9");
        purchase.state = PurchaseState::Confirming;
        purchase.observed_tx_id = Some("tx_9".to_string());
        purchase.observed_value = 31_000_000;
        purchase.confirmations = 2;

        let map: HashMap<String, String> = RedisStore::fields(&purchase)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let restored = RedisStore::from_fields(map).unwrap();
        assert_eq!(restored.id, purchase.id);
        assert_eq!(restored.state, PurchaseState::Confirming);
        assert_eq!(restored.observed_tx_id, purchase.observed_tx_id);
        assert_eq!(restored.observed_value, 31_000_000);
        assert_eq!(restored.confirmations, 2);
        assert_eq!(restored.sweep_tx_id, None);
        assert_eq!(restored.granted_at, None);
    }

    // Integration tests against Redis; run with a local instance available.
    #[tokio::test]
    #[ignore]
    async fn test_redis_upsert_and_get() {
        let store = RedisStore::new("redis://localhost:6379")
            .await
            .expect("Failed to connect to Redis");

        let purchase = sample_purchase("it_addr1");
        store.upsert(&purchase).await.unwrap();

        let restored = store.get("it_addr1").await.unwrap().unwrap();
        assert_eq!(restored.buyer, "buyer#1");
        assert_eq!(restored.required_units, 30_000_000);
    }
}
