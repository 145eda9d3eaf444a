//! Redis backend for the key-value store
//!
//! This module provides functionality for connecting to Redis and performing
//! the cache operations and atomic scripts described by [`KvStore`].

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{KvStore, Script};

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Upper bound for a single store round-trip
    pub op_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            op_timeout: Duration::from_millis(500),
        }
    }
}

/// Redis connection pool
///
/// Holds one multiplexed connection; clones of it share the same socket.
#[derive(Clone)]
pub struct RedisPool {
    conn: MultiplexedConnection,
    scripts: HashMap<Script, redis::Script>,
    op_timeout: Duration,
}

impl RedisPool {
    /// Initialize a new Redis connection pool
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Redis client initialized with URL: {}", config.url);

        let scripts = Script::ALL
            .into_iter()
            .map(|script| (script, redis::Script::new(script.body())))
            .collect();

        Ok(RedisPool {
            conn,
            scripts,
            op_timeout: config.op_timeout,
        })
    }

    /// Run a command future under the operation timeout
    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl KvStore for RedisPool {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1) as u64;
                self.bounded(conn.pset_ex::<_, _, ()>(key, value, millis))
                    .await
            }
            None => self.bounded(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        self.bounded(conn.del(key)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        self.bounded(conn.exists(key)).await
    }

    async fn eval(&self, script: Script, keys: &[String], args: &[String]) -> StoreResult<i64> {
        let compiled = self
            .scripts
            .get(&script)
            .ok_or_else(|| StoreError::Backend(format!("script {} not loaded", script.name())))?;

        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        debug!("Running script {} on {:?}", script.name(), keys);
        let mut conn = self.conn.clone();
        let reply: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> Result<RedisPool> {
        RedisPool::new(&RedisConfig::default()).await
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_redis_connection() -> Result<()> {
        let pool = pool().await?;
        assert!(pool.health_check().await?);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_set_get_delete() -> Result<()> {
        let pool = pool().await?;

        let key = "test_key";
        pool.set(key, "test_value", Some(Duration::from_secs(5)))
            .await?;
        assert_eq!(pool.get(key).await?, Some("test_value".to_string()));
        assert_eq!(pool.exists(key).await?, 1);

        assert_eq!(pool.delete(key).await?, 1);
        assert_eq!(pool.get(key).await?, None);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_code_scripts_round_trip() -> Result<()> {
        let pool = pool().await?;
        let key = "login_code:login:10000000000".to_string();
        pool.delete(&key).await?;

        let args = ["123456".to_string(), "600".to_string(), "60".to_string()];
        assert_eq!(pool.eval(Script::SetCode, &[key.clone()], &args).await?, 0);
        assert_eq!(pool.eval(Script::SetCode, &[key.clone()], &args).await?, -1);

        let verify = ["123456".to_string(), "3".to_string()];
        assert_eq!(pool.eval(Script::VerifyCode, &[key.clone()], &verify).await?, 0);
        assert_eq!(pool.eval(Script::VerifyCode, &[key], &verify).await?, -3);
        Ok(())
    }
}
