// janus-protocol: Canonical bridge event and delivery job types.
//
// Everything that crosses a queue boundary is defined here so that the
// router, the delivery workers, and the tests agree on one wire shape.
// Queued payloads use a top-level tag field for discriminated
// deserialization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// One of the two linked chat platforms.
///
/// The bridge is symmetric: every stored pair links one channel on `A` to
/// one channel on `B`, and events always flow toward the counterpart side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    A,
    B,
}

impl Platform {
    /// The counterpart side of a bridge pair.
    pub fn other(self) -> Platform {
        match self {
            Platform::A => Platform::B,
            Platform::B => Platform::A,
        }
    }

    /// Stable lowercase form used in queue names and KV keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::A => "a",
            Platform::B => "b",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct PlatformParseError {
    got: String,
}

impl fmt::Display for PlatformParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid platform {:?}", self.got)
    }
}

impl std::error::Error for PlatformParseError {}

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" | "A" => Ok(Platform::A),
            "b" | "B" => Ok(Platform::B),
            _ => Err(PlatformParseError { got: s.to_owned() }),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical event
// ---------------------------------------------------------------------------

/// What happened to the source message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MsgCreate,
    MsgUpdate,
    MsgDelete,
}

/// The displayed author of the source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    /// Full avatar URL, already resolved by the normalizer. None when the
    /// source provided no avatar.
    pub avatar: Option<String>,
}

/// Identity of the source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub platform: Platform,
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
}

/// Attachment metadata, forwarded verbatim. Re-upload is out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
}

/// Platform-agnostic representation of a message create/update/delete.
///
/// Produced by the normalizer, carried through the ingest queue, and
/// embedded in every delivery job. For `MsgDelete` only `source` is
/// meaningful; content and author are placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub kind: EventKind,
    pub content: String,
    pub author: Author,
    pub source: SourceRef,
    pub attachments: Vec<Attachment>,
    /// Source timestamp in epoch milliseconds (0 for deletes that carry none).
    pub timestamp_ms: i64,
}

// ---------------------------------------------------------------------------
// Webhook credentials
// ---------------------------------------------------------------------------

/// Impersonating-webhook credentials for one side of a bridge pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookCredentials {
    pub id: String,
    pub token: String,
}

// Tokens must never reach logs; Debug prints a fixed placeholder.
impl fmt::Debug for WebhookCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookCredentials")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Delivery job
// ---------------------------------------------------------------------------

/// Destination of a delivery job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub platform: Platform,
    pub channel_id: String,
    pub guild_id: Option<String>,
}

/// One unit of work on a per-target-channel delivery queue.
///
/// The router selects the variant; the delivery worker executes it without
/// re-deriving the decision. Webhook credentials are a snapshot taken at
/// dispatch time; the worker refreshes tokens from the stored pair before
/// calling out, since repair may have run in between.
///
/// ```json
/// { "action": "create_with_webhook", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryJob {
    /// Create on the counterpart side through its impersonating webhook.
    CreateWithWebhook {
        event: CanonicalEvent,
        pair_id: Uuid,
        target: TargetRef,
        webhook: WebhookCredentials,
        sync_uploads: bool,
    },
    /// Create via the platform-native send, best-effort impersonation.
    CreateFallback {
        event: CanonicalEvent,
        pair_id: Uuid,
        target: TargetRef,
        sync_uploads: bool,
    },
    /// Edit the previously bridged message in place.
    UpdateDirect {
        event: CanonicalEvent,
        pair_id: Uuid,
        target: TargetRef,
        webhook: Option<WebhookCredentials>,
    },
    /// The target cannot edit impersonated posts: send a fresh message with
    /// a jump link to the original and retire the previous workaround post.
    UpdateWorkaround {
        event: CanonicalEvent,
        pair_id: Uuid,
        target: TargetRef,
        webhook: WebhookCredentials,
    },
    /// Delete the bridged message (and any workaround post tracking it).
    Delete {
        event: CanonicalEvent,
        pair_id: Uuid,
        target: TargetRef,
        webhook: Option<WebhookCredentials>,
    },
}

impl DeliveryJob {
    pub fn event(&self) -> &CanonicalEvent {
        match self {
            DeliveryJob::CreateWithWebhook { event, .. }
            | DeliveryJob::CreateFallback { event, .. }
            | DeliveryJob::UpdateDirect { event, .. }
            | DeliveryJob::UpdateWorkaround { event, .. }
            | DeliveryJob::Delete { event, .. } => event,
        }
    }

    pub fn pair_id(&self) -> Uuid {
        match self {
            DeliveryJob::CreateWithWebhook { pair_id, .. }
            | DeliveryJob::CreateFallback { pair_id, .. }
            | DeliveryJob::UpdateDirect { pair_id, .. }
            | DeliveryJob::UpdateWorkaround { pair_id, .. }
            | DeliveryJob::Delete { pair_id, .. } => *pair_id,
        }
    }

    pub fn target(&self) -> &TargetRef {
        match self {
            DeliveryJob::CreateWithWebhook { target, .. }
            | DeliveryJob::CreateFallback { target, .. }
            | DeliveryJob::UpdateDirect { target, .. }
            | DeliveryJob::UpdateWorkaround { target, .. }
            | DeliveryJob::Delete { target, .. } => target,
        }
    }

    /// The delivery queue this job belongs on.
    pub fn queue_name(&self) -> String {
        let target = self.target();
        delivery_queue_name(target.platform, &target.channel_id)
    }
}

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// The single global ingest queue.
pub const INGEST_QUEUE: &str = "ingest";

/// Per-target-channel delivery queue name.
///
/// This naming is load-bearing: each delivery worker binds to exactly one
/// queue name, and the router must produce the same string.
pub fn delivery_queue_name(platform: Platform, channel_id: &str) -> String {
    format!("deliver:{}:{}", platform, channel_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(kind: EventKind) -> CanonicalEvent {
        CanonicalEvent {
            kind,
            content: "hello".to_owned(),
            author: Author {
                name: "alice".to_owned(),
                avatar: None,
            },
            source: SourceRef {
                platform: Platform::A,
                message_id: "m-1".to_owned(),
                channel_id: "c-a".to_owned(),
                guild_id: Some("g-a".to_owned()),
            },
            attachments: vec![],
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn platform_other_is_an_involution() {
        assert_eq!(Platform::A.other(), Platform::B);
        assert_eq!(Platform::B.other(), Platform::A);
        assert_eq!(Platform::A.other().other(), Platform::A);
    }

    #[test]
    fn platform_round_trips_through_display_and_from_str() {
        for p in [Platform::A, Platform::B] {
            assert_eq!(p.to_string().parse::<Platform>().unwrap(), p);
        }
        assert!("discord".parse::<Platform>().is_err());
    }

    #[test]
    fn delivery_queue_name_is_stable() {
        assert_eq!(delivery_queue_name(Platform::B, "c-123"), "deliver:b:c-123");
    }

    #[test]
    fn job_queue_name_matches_target() {
        let job = DeliveryJob::CreateFallback {
            event: sample_event(EventKind::MsgCreate),
            pair_id: Uuid::nil(),
            target: TargetRef {
                platform: Platform::B,
                channel_id: "c-b".to_owned(),
                guild_id: None,
            },
            sync_uploads: false,
        };
        assert_eq!(job.queue_name(), "deliver:b:c-b");
    }

    #[test]
    fn delivery_job_serializes_with_action_tag() {
        let job = DeliveryJob::Delete {
            event: sample_event(EventKind::MsgDelete),
            pair_id: Uuid::nil(),
            target: TargetRef {
                platform: Platform::A,
                channel_id: "c-a".to_owned(),
                guild_id: None,
            },
            webhook: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["action"], "delete");
        let back: DeliveryJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn webhook_token_is_redacted_in_debug_output() {
        let creds = WebhookCredentials {
            id: "wh-1".to_owned(),
            token: "super-secret".to_owned(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
