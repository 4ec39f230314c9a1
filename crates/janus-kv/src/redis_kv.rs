//! Redis-backed [`Kv`] implementation.
//!
//! Uses a [`redis::aio::ConnectionManager`], which multiplexes one
//! connection and reconnects with backoff on failure. All commands are
//! issued explicitly so the exact server semantics are visible at the
//! call site.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::{Kv, KvError};

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        KvError::Backend(e.to_string())
    }
}

/// Production KV backend.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect and verify the server responds to PING.
    ///
    /// Startup-fatal for callers: a KV that cannot be reached at boot
    /// means the process must not start.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        let kv = RedisKv { manager };
        kv.ping().await?;
        info!("connected to KV store");
        Ok(kv)
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(KvError::Backend(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut conn = self.conn();
        // SET NX returns nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get_set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, KvError> {
        let mut conn = self.conn();
        let old: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("GET")
            .query_async(&mut conn)
            .await?;
        Ok(old)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(n)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn pttl_ms(&self, key: &str) -> Result<Option<i64>, KvError> {
        let mut conn = self.conn();
        let ms: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        // -2: no key, -1: no TTL.
        if ms < 0 {
            Ok(None)
        } else {
            Ok(Some(ms))
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<i64, KvError> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn llen(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zclaim_upto(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn();
        let candidates: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        // ZREM is the claim: only members we actually removed are ours.
        // Another consumer racing on the same key loses the ZREM and skips.
        let mut claimed = Vec::with_capacity(candidates.len());
        for member in candidates {
            let removed: i64 = redis::cmd("ZREM")
                .arg(key)
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            if removed > 0 {
                claimed.push(member);
            }
        }
        Ok(claimed)
    }

    async fn zcard(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(n)
    }
}
