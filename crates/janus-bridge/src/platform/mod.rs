//! Platform adapter capability.
//!
//! Gateway clients (websocket or polling transports) live outside this
//! crate; they implement [`PlatformAdapter`] and push inbound activity as
//! [`InboundEvent`]s. The core only ever talks to a platform through this
//! trait, so every worker can be exercised against the in-memory
//! `RecordingAdapter` (behind the `test-support` feature).

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use janus_protocol::{Attachment, EventKind, Platform, WebhookCredentials};

pub mod correlate;
#[cfg(feature = "test-support")]
pub mod recording;

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Avatar as the platform reports it: either a bare CDN hash or a
/// ready-to-use URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAvatar {
    Hash(String),
    Url(String),
}

/// Platform-specific message payload, as close to the wire as the
/// normalizer needs. Delete events only carry the identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawMessage {
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub avatar: Option<RawAvatar>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// RFC 3339. Deletes may omit it.
    pub timestamp: Option<String>,
}

/// One inbound gateway event, pushed by an adapter into the ingest pump.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub platform: Platform,
    pub kind: EventKind,
    pub raw: RawMessage,
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// Body of an impersonating webhook post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookMessage {
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
    /// Some platforms route webhook posts per channel rather than per hook.
    pub channel_id: Option<String>,
}

/// Body of a platform-native send, with best-effort impersonation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMessage {
    pub content: String,
    pub impersonate: Option<Impersonation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Impersonation {
    pub name: String,
    pub avatar_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Platform call failures, already classified by the adapter.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// 5xx, network, disconnects. Retried via queue backoff.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// Platform-side 429.
    #[error("platform rate limited, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    /// Unknown message/channel, 403/404. Never retried.
    #[error("permanent platform error: {0}")]
    Permanent(String),

    /// The platform API has no such operation.
    #[error("operation not supported by platform")]
    Unsupported,
}

// ---------------------------------------------------------------------------
// Adapter capability
// ---------------------------------------------------------------------------

/// The contract each platform client implements.
///
/// All operations are REST-shaped; the event source is the `events`
/// sender handed over at `connect`. Implementations classify their HTTP
/// failures into [`PlatformError`] so the workers never see raw status
/// codes.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether the platform API can edit impersonated webhook posts.
    /// Platform A can; Platform B cannot and gets the edit-workaround.
    fn supports_webhook_edits(&self) -> bool;

    async fn connect(
        &self,
        token: &str,
        events: mpsc::Sender<InboundEvent>,
    ) -> Result<(), PlatformError>;

    async fn disconnect(&self) -> Result<(), PlatformError>;

    /// Returns None when the platform refuses webhook creation for this
    /// channel (the bridge then falls back to native sends).
    async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError>;

    async fn fetch_webhook(
        &self,
        channel_id: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError>;

    /// Returns the destination message id when the platform reports one.
    /// Platforms whose webhook send is fire-and-forget may resolve the id
    /// through [`correlate::CorrelationMap`] or return None.
    async fn send_webhook(
        &self,
        webhook: &WebhookCredentials,
        message: &WebhookMessage,
    ) -> Result<Option<String>, PlatformError>;

    /// False when the platform cannot edit impersonated posts.
    async fn edit_webhook_message(
        &self,
        webhook: &WebhookCredentials,
        message_id: &str,
        content: &str,
    ) -> Result<bool, PlatformError>;

    async fn delete_webhook_message(
        &self,
        webhook: &WebhookCredentials,
        message_id: &str,
    ) -> Result<bool, PlatformError>;

    async fn send_message(
        &self,
        channel_id: &str,
        message: &NativeMessage,
    ) -> Result<String, PlatformError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str)
        -> Result<(), PlatformError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Both adapters, threaded through constructors (no global client state).
#[derive(Clone)]
pub struct PlatformRegistry {
    a: Arc<dyn PlatformAdapter>,
    b: Arc<dyn PlatformAdapter>,
}

impl PlatformRegistry {
    pub fn new(a: Arc<dyn PlatformAdapter>, b: Arc<dyn PlatformAdapter>) -> Self {
        PlatformRegistry { a, b }
    }

    pub fn get(&self, platform: Platform) -> &Arc<dyn PlatformAdapter> {
        match platform {
            Platform::A => &self.a,
            Platform::B => &self.b,
        }
    }
}
