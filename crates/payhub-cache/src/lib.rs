//! # PayHub Cache
//!
//! The key-value cache adapter (spec.md section 4.3's cache tier): a thin
//! Redis wrapper exposing get/set-with-TTL/delete/ttl-remaining on byte
//! values. Used as the fast-path mirror of the idempotency store and, by
//! the breaker's callers, nowhere else — the cache never becomes a source
//! of truth by itself.

use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis command error: {0}")]
    Command(#[from] redis::RedisError),

    #[error("failed to build redis pool: {0}")]
    Config(#[from] deadpool_redis::CreatePoolError),
}

impl From<CacheError> for payhub_types::PayhubError {
    fn from(e: CacheError) -> Self {
        payhub_types::PayhubError::Internal(e.to_string())
    }
}

#[derive(Clone)]
pub struct Cache {
    pool: Pool,
}

impl Cache {
    pub fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Remaining time-to-live for `key`, or `None` if the key is absent or
    /// has no expiry set.
    pub async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.pool.get().await?;
        let ttl: i64 = conn.ttl(key).await?;
        Ok(match ttl {
            t if t < 0 => None,
            t => Some(Duration::from_secs(t as u64)),
        })
    }

    pub async fn ping(&self) -> bool {
        match self.pool.get().await {
            Ok(mut conn) => redis::cmd("PING").query_async::<_, String>(&mut conn).await.is_ok(),
            Err(e) => {
                warn!(error = %e, "cache health check failed to acquire connection");
                false
            }
        }
    }
}
