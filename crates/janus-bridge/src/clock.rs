//! Wall-clock helper shared by the queue, loop filter, and workers.

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
