//! Redis store backend (feature `persistence-redis`).
//!
//! Thin mapping of the [`KvStore`] contract onto Redis commands through a
//! multiplexed connection manager. Every operation is a single command;
//! no transactions, per the store contract.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use synapse_kernel::error::{KvResult, StoreError};
use synapse_kernel::store::KvStore;

/// Redis-backed [`KvStore`].
pub struct RedisKvStore {
    manager: ConnectionManager,
}

impl RedisKvStore {
    /// Connect to the given Redis URL (`redis://host:port/db`).
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = Client::open(url).map_err(to_store_error)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(to_store_error)?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn to_store_error(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Other(err.to_string())
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    // SETEX rejects 0; round sub-second TTLs up.
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds(ttl))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(keys)
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(members)
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let mut conn = self.conn();
        let set: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(set > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_ttls_round_up() {
        assert_eq!(ttl_seconds(Duration::from_millis(200)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(90)), 90);
    }
}
