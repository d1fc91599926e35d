use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::PairKey;

/// Errors that can occur when persisting the ledger
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Durable copy of the dispatched pairs, restored when the engine starts
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self) -> Result<Vec<PairKey>, LedgerStoreError>;

    /// Replace the stored set with `pairs`
    async fn save(&self, pairs: &[PairKey]) -> Result<(), LedgerStoreError>;
}

/// Ledger persisted as JSON members of a single Redis set
pub struct RedisLedgerStore {
    redis: Arc<tokio::sync::Mutex<ConnectionManager>>,
    key: String,
}

impl RedisLedgerStore {
    pub async fn new(redis_url: &str, key: impl Into<String>) -> Result<Self, LedgerStoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self {
            redis: Arc::new(tokio::sync::Mutex::new(redis)),
            key: key.into(),
        })
    }
}

fn encode_pairs(pairs: &[PairKey]) -> Result<Vec<String>, serde_json::Error> {
    pairs.iter().map(serde_json::to_string).collect()
}

fn decode_pairs(key: &str, members: Vec<String>) -> Vec<PairKey> {
    members
        .into_iter()
        .filter_map(|member| match serde_json::from_str(&member) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!("Dropping unreadable ledger member in {}: {}", key, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl LedgerStore for RedisLedgerStore {
    async fn load(&self) -> Result<Vec<PairKey>, LedgerStoreError> {
        let mut conn = self.redis.lock().await;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&self.key)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        let pairs = decode_pairs(&self.key, members);
        tracing::debug!("Loaded {} ledger entries from {}", pairs.len(), self.key);
        Ok(pairs)
    }

    async fn save(&self, pairs: &[PairKey]) -> Result<(), LedgerStoreError> {
        let members = encode_pairs(pairs)?;

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(&self.key).ignore();
        if !members.is_empty() {
            pipe.cmd("SADD").arg(&self.key).arg(members).ignore();
        }

        let mut conn = self.redis.lock().await;
        pipe.query_async::<()>(&mut *conn).await?;
        drop(conn);

        tracing::trace!("Saved {} ledger entries to {}", pairs.len(), self.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_encoding() {
        let pairs = vec![PairKey::new("v1", "h1"), PairKey::new("v2", "h9")];
        let encoded = encode_pairs(&pairs).unwrap();

        assert_eq!(encoded[0], r#"{"volunteerId":"v1","helpRequestId":"h1"}"#);

        let mut members = encoded;
        members.push("not json".to_string());
        assert_eq!(decode_pairs("test", members), pairs);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_redis_round_trip() {
        let store = RedisLedgerStore::new("redis://127.0.0.1:6379", "relief:test:ledger")
            .await
            .expect("Failed to connect to Redis");

        let pairs = vec![PairKey::new("v1", "h1")];
        store.save(&pairs).await.unwrap();
        assert_eq!(store.load().await.unwrap(), pairs);

        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
