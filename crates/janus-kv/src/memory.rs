//! In-memory [`Kv`] implementation.
//!
//! Single-process stand-in with the same observable semantics as the Redis
//! backend: per-key TTLs (expiry is checked on access), `INCR` preserving
//! TTL, wrong-type errors, and claim semantics on the sorted-set pop. Used
//! throughout the test suites and for local development without a server.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{Kv, KvError};

enum Value {
    Str(String),
    List(VecDeque<String>),
    // BTreeMap keeps members ordered by (score, member) for range pops.
    Sorted(BTreeMap<(ordered::F64, String), ()>),
}

mod ordered {
    /// f64 wrapper with total ordering; scores here are epoch-ms values,
    /// never NaN.
    #[derive(Clone, Copy, PartialEq)]
    pub struct F64(pub f64);

    impl Eq for F64 {}

    impl PartialOrd for F64 {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for F64 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.total_cmp(&other.0)
        }
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Process-local KV with Redis-equivalent semantics.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type() -> KvError {
    KvError::Backend("WRONGTYPE operation against a key holding the wrong kind of value".into())
}

/// Remove the key if expired, then run `f` on the live entry slot.
fn with_live<R>(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    f: impl FnOnce(Option<&mut Entry>) -> R,
) -> R {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.expired(now)) {
        entries.remove(key);
    }
    f(entries.get_mut(key))
}

#[async_trait]
impl Kv for MemoryKv {
    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type()),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().unwrap();
        if with_live(&mut entries, key, |entry| entry.is_some()) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn get_set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().unwrap();
        let old = with_live(&mut entries, key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type()),
        })?;
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(old)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(with_live(&mut entries, key, |entry| entry.is_some()))
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().unwrap();
        let bumped = with_live(&mut entries, key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => {
                let n: i64 = s
                    .parse()
                    .map_err(|_| KvError::Backend("value is not an integer".into()))?;
                *s = (n + 1).to_string();
                Ok(Some(n + 1))
            }
            Some(_) => Err(wrong_type()),
        })?;
        if let Some(n) = bumped {
            return Ok(n);
        }
        // Fresh key: counter starts at 1 with no TTL, like INCR.
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str("1".to_owned()),
                expires_at: None,
            },
        );
        Ok(1)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(with_live(&mut entries, key, |entry| match entry {
            None => false,
            Some(e) => {
                e.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                true
            }
        }))
    }

    async fn pttl_ms(&self, key: &str) -> Result<Option<i64>, KvError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(with_live(&mut entries, key, |entry| {
            entry.and_then(|e| e.expires_at).map(|at| {
                let now = Instant::now();
                if at > now {
                    at.duration_since(now).as_millis() as i64
                } else {
                    0
                }
            })
        }))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<i64, KvError> {
        self.push(key, value)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.pop_front()),
            Some(_) => Err(wrong_type()),
        })
    }

    async fn llen(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as i64),
            Some(_) => Err(wrong_type()),
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let len = list.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 {
                        (len + i).max(0)
                    } else {
                        i.min(len)
                    }
                };
                let start = norm(start);
                let stop = norm(stop);
                if start > stop {
                    list.clear();
                } else {
                    let kept: VecDeque<String> = list
                        .iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .cloned()
                        .collect();
                    *list = kept;
                }
                Ok(())
            }
            Some(_) => Err(wrong_type()),
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Sorted(_),
                ..
            }) => Ok(Some(())),
            Some(_) => Err(wrong_type()),
        })?;
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Value::Sorted(BTreeMap::new()),
            expires_at: None,
        });
        if let Value::Sorted(set) = &mut entry.value {
            // Re-adding an existing member updates its score.
            set.retain(|(_, m), _| m != member);
            set.insert((ordered::F64(score), member.to_owned()), ());
        }
        Ok(())
    }

    async fn zclaim_upto(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>, KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => {
                let due: Vec<(ordered::F64, String)> = set
                    .keys()
                    .filter(|(score, _)| score.0 <= max_score)
                    .take(limit)
                    .cloned()
                    .collect();
                let mut claimed = Vec::with_capacity(due.len());
                for k in due {
                    set.remove(&k);
                    claimed.push(k.1);
                }
                Ok(claimed)
            }
            Some(_) => Err(wrong_type()),
        })
    }

    async fn zcard(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(set.len() as i64),
            Some(_) => Err(wrong_type()),
        })
    }
}

impl MemoryKv {
    fn push(&self, key: &str, value: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().unwrap();
        with_live(&mut entries, key, |entry| match entry {
            None => Ok(()),
            Some(Entry {
                value: Value::List(_),
                ..
            }) => Ok(()),
            Some(_) => Err(wrong_type()),
        })?;
        let entry = entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        if let Value::List(list) = &mut entry.value {
            list.push_back(value.to_owned());
            Ok(list.len() as i64)
        } else {
            Err(wrong_type())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_writes_once() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_ex("k", "1", 10).await.unwrap());
        assert!(!kv.set_nx_ex("k", "2", 10).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn incr_starts_at_one_and_counts_up() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("n").await.unwrap(), 1);
        assert_eq!(kv.incr("n").await.unwrap(), 2);
        assert_eq!(kv.incr("n").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn incr_preserves_ttl_set_by_expire() {
        let kv = MemoryKv::new();
        kv.incr("n").await.unwrap();
        assert!(kv.expire("n", 30).await.unwrap());
        kv.incr("n").await.unwrap();
        let ttl = kv.pttl_ms("n").await.unwrap().expect("ttl survives incr");
        assert!(ttl > 0 && ttl <= 30_000);
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", 1).await.unwrap();
        assert!(kv.exists("k").await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(!kv.exists("k").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_set_ex_returns_previous_value() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get_set_ex("k", "first", 10).await.unwrap(), None);
        assert_eq!(
            kv.get_set_ex("k", "second", 10).await.unwrap().as_deref(),
            Some("first")
        );
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn list_is_fifo_under_rpush_lpop() {
        let kv = MemoryKv::new();
        kv.rpush("q", "1").await.unwrap();
        kv.rpush("q", "2").await.unwrap();
        kv.rpush("q", "3").await.unwrap();
        assert_eq!(kv.lpop("q").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.lpop("q").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.lpop("q").await.unwrap().as_deref(), Some("3"));
        assert_eq!(kv.lpop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ltrim_keeps_the_requested_window() {
        let kv = MemoryKv::new();
        for i in 0..5 {
            kv.rpush("l", &i.to_string()).await.unwrap();
        }
        // Keep the last three entries.
        kv.ltrim("l", -3, -1).await.unwrap();
        assert_eq!(kv.llen("l").await.unwrap(), 3);
        assert_eq!(kv.lpop("l").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn zclaim_returns_only_due_members_in_score_order() {
        let kv = MemoryKv::new();
        kv.zadd("z", "late", 300.0).await.unwrap();
        kv.zadd("z", "early", 100.0).await.unwrap();
        kv.zadd("z", "mid", 200.0).await.unwrap();

        let claimed = kv.zclaim_upto("z", 250.0, 10).await.unwrap();
        assert_eq!(claimed, vec!["early".to_owned(), "mid".to_owned()]);
        assert_eq!(kv.zcard("z").await.unwrap(), 1);

        // Claimed members are gone; a second pass sees nothing due.
        assert!(kv.zclaim_upto("z", 250.0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_type_operations_error() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", 10).await.unwrap();
        assert!(kv.lpop("k").await.is_err());
        assert!(kv.zadd("k", "m", 1.0).await.is_err());
    }
}
