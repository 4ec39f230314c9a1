//! Per-channel leaky-bucket gate backed by the shared KV.
//!
//! `allow` is one `INCR`; the first increment arms the window TTL. When
//! the gate denies, the delivery worker reschedules the job by `delay_ms`
//! instead of failing it. There is no global limiter: each delivery queue
//! is already per-target-channel.

use std::sync::Arc;

use janus_kv::{Kv, KvError};
use janus_protocol::Platform;

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn Kv>,
    limit: i64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn Kv>, limit: i64, window_secs: u64) -> Self {
        RateLimiter {
            kv,
            limit,
            window_secs,
        }
    }

    /// True when this delivery may proceed within the current window.
    pub async fn allow(&self, platform: Platform, channel_id: &str) -> Result<bool, KvError> {
        let key = Self::key(platform, channel_id);
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            self.kv.expire(&key, self.window_secs).await?;
        }
        Ok(count <= self.limit)
    }

    /// How long to wait before retrying, in milliseconds.
    ///
    /// Remaining window TTL, or a full window when the counter is gone.
    pub async fn delay_ms(&self, platform: Platform, channel_id: &str) -> Result<u64, KvError> {
        let key = Self::key(platform, channel_id);
        let remaining = self.kv.pttl_ms(&key).await?;
        Ok(remaining
            .map(|ms| ms.max(0) as u64)
            .unwrap_or(self.window_secs * 1000))
    }

    fn key(platform: Platform, channel_id: &str) -> String {
        format!("janus:ratelimit:{}:{}", platform, channel_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use janus_kv::MemoryKv;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKv::new()), 5, 2)
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_within_one_window() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(limiter.allow(Platform::B, "c-1").await.unwrap());
        }
        assert!(!limiter.allow(Platform::B, "c-1").await.unwrap());
    }

    #[tokio::test]
    async fn channels_are_limited_independently() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(limiter.allow(Platform::B, "busy").await.unwrap());
        }
        assert!(!limiter.allow(Platform::B, "busy").await.unwrap());
        // Same channel id on the other platform is a different bucket.
        assert!(limiter.allow(Platform::A, "busy").await.unwrap());
        assert!(limiter.allow(Platform::B, "quiet").await.unwrap());
    }

    #[tokio::test]
    async fn delay_reports_the_remaining_window() {
        let limiter = limiter();
        limiter.allow(Platform::B, "c-1").await.unwrap();
        let delay = limiter.delay_ms(Platform::B, "c-1").await.unwrap();
        assert!(delay > 0 && delay <= 2000, "delay {} out of range", delay);
    }

    #[tokio::test]
    async fn delay_for_an_idle_channel_is_one_full_window() {
        let limiter = limiter();
        assert_eq!(limiter.delay_ms(Platform::A, "idle").await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), 2, 1);
        assert!(limiter.allow(Platform::A, "c").await.unwrap());
        assert!(limiter.allow(Platform::A, "c").await.unwrap());
        assert!(!limiter.allow(Platform::A, "c").await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(limiter.allow(Platform::A, "c").await.unwrap());
    }
}
