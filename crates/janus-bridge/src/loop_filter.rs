//! Loop filter: short-TTL fingerprint set that suppresses re-ingestion of
//! the bridge's own outbound messages.
//!
//! The fingerprint salts content and author with the current wall-clock
//! minute, so identical text by the same author collapses within a minute
//! but a human reposting the same message later is not suppressed
//! indefinitely. The filter is advisory: rare false positives (two people
//! typing the same short text in the same minute) and false negatives
//! (our echo arriving after the TTL) are accepted.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use janus_kv::{Kv, KvError};

/// Width of the fingerprint salt bucket.
const MINUTE_MS: i64 = 60_000;

/// Deterministic content fingerprint: `SHA-256(content "|" author "|" minute)`.
pub fn fingerprint(content: &str, author_name: &str, now_ms: i64) -> String {
    let minute = now_ms.div_euclid(MINUTE_MS);
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(b"|");
    hasher.update(author_name.as_bytes());
    hasher.update(b"|");
    hasher.update(minute.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// KV-backed echo suppressor.
#[derive(Clone)]
pub struct LoopFilter {
    kv: Arc<dyn Kv>,
    ttl_secs: u64,
}

impl LoopFilter {
    pub fn new(kv: Arc<dyn Kv>, ttl_secs: u64) -> Self {
        LoopFilter { kv, ttl_secs }
    }

    /// True when this content was recently emitted by the bridge itself.
    pub async fn check(
        &self,
        content: &str,
        author_name: &str,
        now_ms: i64,
    ) -> Result<bool, KvError> {
        let key = Self::key(content, author_name, now_ms);
        self.kv.exists(&key).await
    }

    /// Mark content as just-sent so the gateway echo gets dropped.
    /// `SET NX`: a fingerprint already registered keeps its original TTL.
    pub async fn register(
        &self,
        content: &str,
        author_name: &str,
        now_ms: i64,
    ) -> Result<(), KvError> {
        let key = Self::key(content, author_name, now_ms);
        self.kv.set_nx_ex(&key, "1", self.ttl_secs).await.map(|_| ())
    }

    fn key(content: &str, author_name: &str, now_ms: i64) -> String {
        format!("janus:hash:{}", fingerprint(content, author_name, now_ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
