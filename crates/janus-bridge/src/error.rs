//! Crate-wide error type.
//!
//! Worker-facing failures are translated into queue outcomes at the
//! handler layer; this type covers everything that propagates with `?`
//! below that.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("kv: {0}")]
    Kv(#[from] janus_kv::KvError),

    #[error("repository: {0}")]
    Repo(#[from] crate::repo::RepoError),

    #[error("platform: {0}")]
    Platform(#[from] crate::platform::PlatformError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operator-facing input problem (duplicate bridge, missing channel).
    /// Never retried.
    #[error("validation: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
