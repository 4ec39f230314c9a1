//! Event normalization.
//!
//! Pure projection from a platform payload to a [`CanonicalEvent`]. Fails
//! only on malformed input; the ingest pump logs and drops such events.
//!
//! Avatar resolution: a full URL passes through untouched; a bare CDN
//! hash is expanded against the platform's CDN. Hashes prefixed `a_` are
//! animated and use the `.gif` extension, everything else `.png`.

use janus_protocol::{Author, CanonicalEvent, EventKind, Platform, SourceRef};

use crate::platform::{RawAvatar, RawMessage};

/// Animated-avatar hash prefix shared by both platforms' CDN conventions.
const ANIMATED_PREFIX: &str = "a_";

/// Author name used for delete events that carry no author.
const PLACEHOLDER_AUTHOR: &str = "unknown";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub enum NormalizeError {
    MissingField(&'static str),
    BadTimestamp(String),
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::MissingField(field) => write!(f, "missing field: {}", field),
            NormalizeError::BadTimestamp(raw) => write!(f, "unparseable timestamp: {:?}", raw),
        }
    }
}

impl std::error::Error for NormalizeError {}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Translate a platform payload into the canonical shape.
///
/// Delete events only need identity fields; content and author fall back
/// to placeholders and a missing timestamp becomes 0.
pub fn normalize(
    platform: Platform,
    kind: EventKind,
    raw: &RawMessage,
) -> Result<CanonicalEvent, NormalizeError> {
    if raw.message_id.is_empty() {
        return Err(NormalizeError::MissingField("message_id"));
    }
    if raw.channel_id.is_empty() {
        return Err(NormalizeError::MissingField("channel_id"));
    }

    let is_delete = kind == EventKind::MsgDelete;

    let name = if raw.author_name.is_empty() {
        if is_delete {
            PLACEHOLDER_AUTHOR.to_owned()
        } else {
            return Err(NormalizeError::MissingField("author_name"));
        }
    } else {
        raw.author_name.clone()
    };

    let timestamp_ms = match &raw.timestamp {
        Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
            .map_err(|_| NormalizeError::BadTimestamp(ts.clone()))?
            .timestamp_millis(),
        None if is_delete => 0,
        None => return Err(NormalizeError::MissingField("timestamp")),
    };

    Ok(CanonicalEvent {
        kind,
        content: if is_delete {
            String::new()
        } else {
            raw.content.clone()
        },
        author: Author {
            name,
            avatar: resolve_avatar(platform, &raw.author_id, raw.avatar.as_ref()),
        },
        source: SourceRef {
            platform,
            message_id: raw.message_id.clone(),
            channel_id: raw.channel_id.clone(),
            guild_id: raw.guild_id.clone(),
        },
        attachments: if is_delete {
            Vec::new()
        } else {
            raw.attachments.clone()
        },
        timestamp_ms,
    })
}

fn resolve_avatar(platform: Platform, author_id: &str, avatar: Option<&RawAvatar>) -> Option<String> {
    match avatar {
        None => None,
        Some(RawAvatar::Url(url)) => Some(url.clone()),
        Some(RawAvatar::Hash(hash)) => {
            let ext = if hash.starts_with(ANIMATED_PREFIX) {
                "gif"
            } else {
                "png"
            };
            Some(format!(
                "{}/avatars/{}/{}.{}",
                cdn_base(platform),
                author_id,
                hash,
                ext
            ))
        }
    }
}

fn cdn_base(platform: Platform) -> &'static str {
    match platform {
        Platform::A => "https://cdn.a.app",
        Platform::B => "https://cdn.b.app",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
