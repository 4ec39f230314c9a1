//! Shared key-value store used for loop hashes, rate-limit counters,
//! edit-update trackers, and the durable job queues.
//!
//! All keys live under the `janus:` namespace (the callers prefix them).
//! The trait covers exactly the operations the bridge core relies on; the
//! production backend is Redis. `MemoryKv`, a single-process stand-in
//! with the same TTL semantics, is available behind the `test-support`
//! feature for test suites and local development.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "test-support")]
pub mod memory;
mod redis_kv;

#[cfg(feature = "test-support")]
pub use memory::MemoryKv;
pub use redis_kv::RedisKv;

/// Error type for KV operations.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend: {0}")]
    Backend(String),
}

/// The key-value operations the bridge core depends on.
///
/// Atomicity notes:
/// - `incr` is atomic and preserves any existing TTL (Redis `INCR`).
/// - `set_nx_ex` is a single `SET NX EX` round trip.
/// - `get_set_ex` swaps the value, refreshes the TTL, and returns the
///   previous value in one call (`SET ... EX ... GET`).
/// - `zclaim_upto` only returns members this caller actually removed, so
///   concurrent consumers never claim the same member twice.
#[async_trait]
pub trait Kv: Send + Sync {
    /// Round-trip health check; used at startup to fail fast.
    async fn ping(&self) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError>;
    /// Set only if absent; returns true when the value was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError>;
    /// Atomically replace the value (refreshing the TTL) and return the old one.
    async fn get_set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;
    async fn incr(&self, key: &str) -> Result<i64, KvError>;
    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, KvError>;
    /// Remaining TTL in milliseconds; None when the key is absent or has no TTL.
    async fn pttl_ms(&self, key: &str) -> Result<Option<i64>, KvError>;

    // Lists (FIFO queues use rpush + lpop).
    async fn rpush(&self, key: &str, value: &str) -> Result<i64, KvError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn llen(&self, key: &str) -> Result<i64, KvError>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError>;

    // Sorted sets (delayed jobs scored by run-at time).
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError>;
    /// Claim up to `limit` members with score <= `max_score`, in score order.
    async fn zclaim_upto(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>, KvError>;
    async fn zcard(&self, key: &str) -> Result<i64, KvError>;
}
