//! Persisted entities and their repositories.
//!
//! Two relational tables back the core: `bridge_pairs` (owned by the
//! bridge store) and `message_map` (owned by the delivery workers that
//! create its rows). The traits exist so worker logic runs against the
//! in-memory implementations (behind the `test-support` feature) in
//! tests; production wires the Postgres implementations from [`pg`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use janus_protocol::{Platform, WebhookCredentials};

#[cfg(feature = "test-support")]
pub mod memory;
pub mod pg;

#[cfg(feature = "test-support")]
pub use memory::{MemoryBridgeRepo, MemoryMessageMapRepo};
pub use pg::{PgBridgeRepo, PgMessageMapRepo};

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A stored link between one channel on each platform.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgePair {
    pub id: Uuid,
    pub a_channel_id: String,
    pub a_guild_id: String,
    pub b_channel_id: String,
    /// Platform B may have no guild/tenancy concept for this channel.
    pub b_guild_id: Option<String>,
    pub a_webhook: Option<WebhookCredentials>,
    pub b_webhook: Option<WebhookCredentials>,
    pub is_active: bool,
    pub sync_uploads: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgePair {
    pub fn channel_id(&self, platform: Platform) -> &str {
        match platform {
            Platform::A => &self.a_channel_id,
            Platform::B => &self.b_channel_id,
        }
    }

    pub fn guild_id(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::A => Some(&self.a_guild_id),
            Platform::B => self.b_guild_id.as_deref(),
        }
    }

    pub fn webhook(&self, platform: Platform) -> Option<&WebhookCredentials> {
        match platform {
            Platform::A => self.a_webhook.as_ref(),
            Platform::B => self.b_webhook.as_ref(),
        }
    }
}

/// Insert shape for a new pair.
#[derive(Debug, Clone)]
pub struct NewBridgePair {
    pub a_channel_id: String,
    pub a_guild_id: String,
    pub b_channel_id: String,
    pub b_guild_id: Option<String>,
    pub sync_uploads: bool,
}

/// Source-to-destination message identity, one row per bridged create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMapEntry {
    pub pair_id: Uuid,
    pub source_platform: Platform,
    pub source_msg_id: String,
    pub dest_platform: Platform,
    pub dest_msg_id: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RepoError {
    /// Unique violation on `(a_channel_id, b_channel_id)`.
    #[error("a bridge for this channel pair already exists")]
    Duplicate,

    #[error("database: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                return RepoError::Duplicate;
            }
        }
        RepoError::Backend(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BridgeRepo: Send + Sync {
    async fn insert(&self, new: NewBridgePair) -> Result<BridgePair, RepoError>;
    async fn fetch(&self, id: Uuid) -> Result<Option<BridgePair>, RepoError>;
    /// Returns true when a row was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool, RepoError>;
    /// Returns the updated pair, or None when the id is unknown.
    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<BridgePair>, RepoError>;
    async fn set_webhook(
        &self,
        id: Uuid,
        platform: Platform,
        creds: &WebhookCredentials,
    ) -> Result<(), RepoError>;
    /// Active pairs whose side on `platform` is `channel_id`. A channel
    /// may appear in several bridges.
    async fn active_for_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Vec<BridgePair>, RepoError>;
    async fn all(&self) -> Result<Vec<BridgePair>, RepoError>;
    async fn all_active(&self) -> Result<Vec<BridgePair>, RepoError>;
}

#[async_trait]
pub trait MessageMapRepo: Send + Sync {
    async fn insert(&self, entry: &MessageMapEntry) -> Result<(), RepoError>;
    async fn fetch(
        &self,
        pair_id: Uuid,
        source_platform: Platform,
        source_msg_id: &str,
    ) -> Result<Option<MessageMapEntry>, RepoError>;
    /// Returns true when a row was removed.
    async fn remove(
        &self,
        pair_id: Uuid,
        source_platform: Platform,
        source_msg_id: &str,
    ) -> Result<bool, RepoError>;
}
