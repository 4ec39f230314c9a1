//! Correlated webhook-id capture.
//!
//! Some platforms acknowledge a webhook post without returning the created
//! message id; the id only becomes visible when the gateway echoes the
//! post back as an ordinary inbound message. An adapter using this helper
//! registers the pending send, forwards gateway messages through
//! [`CorrelationMap::resolve`], and receives the first id whose
//! `(channel_id, content, username)` matches, or None after the capture
//! window elapses.
//!
//! Matching on content is fragile when two identical posts are in flight;
//! the last registration wins and the earlier waiter times out. Accepted:
//! the only consequence is a missing MessageMap row, which downgrades
//! later edits/deletes of that message to no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Default capture window.
pub const DEFAULT_CAPTURE_WINDOW: Duration = Duration::from_secs(5);

type Key = (String, String, String);

/// Pending webhook sends awaiting their gateway echo.
pub struct CorrelationMap {
    window: Duration,
    ticket: AtomicU64,
    pending: Mutex<HashMap<Key, (u64, oneshot::Sender<String>)>>,
}

impl Default for CorrelationMap {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_WINDOW)
    }
}

impl CorrelationMap {
    pub fn new(window: Duration) -> Self {
        CorrelationMap {
            window,
            ticket: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending send and wait for the matching echo.
    ///
    /// Returns None when no echo arrives within the capture window. A
    /// second registration for the same key displaces the first waiter.
    pub async fn await_capture(
        &self,
        channel_id: &str,
        content: &str,
        username: &str,
    ) -> Option<String> {
        let key = (
            channel_id.to_owned(),
            content.to_owned(),
            username.to_owned(),
        );
        let ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(key.clone(), (ticket, tx));

        let captured = tokio::time::timeout(self.window, rx).await;
        // Clean up only our own registration; a newer waiter under the
        // same key must stay registered.
        let mut pending = self.pending.lock().unwrap();
        if pending.get(&key).is_some_and(|(t, _)| *t == ticket) {
            pending.remove(&key);
        }
        drop(pending);
        match captured {
            Ok(Ok(message_id)) => Some(message_id),
            _ => None,
        }
    }

    /// Offer a gateway message to any pending waiter.
    ///
    /// Returns true when a waiter consumed it; the adapter should then
    /// swallow the echo instead of forwarding it inbound.
    pub fn resolve(
        &self,
        channel_id: &str,
        content: &str,
        username: &str,
        message_id: &str,
    ) -> bool {
        let key = (
            channel_id.to_owned(),
            content.to_owned(),
            username.to_owned(),
        );
        if let Some((_, tx)) = self.pending.lock().unwrap().remove(&key) {
            return tx.send(message_id.to_owned()).is_ok();
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
