//! In-memory repositories with the same semantics as the Postgres ones.
//! Used by the worker test suites and for local development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use janus_protocol::{Platform, WebhookCredentials};

use super::{BridgePair, BridgeRepo, MessageMapEntry, MessageMapRepo, NewBridgePair, RepoError};

#[derive(Default)]
pub struct MemoryBridgeRepo {
    rows: Mutex<Vec<BridgePair>>,
}

impl MemoryBridgeRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BridgeRepo for MemoryBridgeRepo {
    async fn insert(&self, new: NewBridgePair) -> Result<BridgePair, RepoError> {
        let mut rows = self.rows.lock().unwrap();
        let duplicate = rows
            .iter()
            .any(|p| p.a_channel_id == new.a_channel_id && p.b_channel_id == new.b_channel_id);
        if duplicate {
            return Err(RepoError::Duplicate);
        }
        let now = Utc::now();
        let pair = BridgePair {
            id: Uuid::new_v4(),
            a_channel_id: new.a_channel_id,
            a_guild_id: new.a_guild_id,
            b_channel_id: new.b_channel_id,
            b_guild_id: new.b_guild_id,
            a_webhook: None,
            b_webhook: None,
            is_active: true,
            sync_uploads: new.sync_uploads,
            created_at: now,
            updated_at: now,
        };
        rows.push(pair.clone());
        Ok(pair)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<BridgePair>, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepoError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|p| p.id != id);
        Ok(rows.len() < before)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<BridgePair>, RepoError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.iter_mut().find(|p| p.id == id).map(|p| {
            p.is_active = active;
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn set_webhook(
        &self,
        id: Uuid,
        platform: Platform,
        creds: &WebhookCredentials,
    ) -> Result<(), RepoError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(pair) = rows.iter_mut().find(|p| p.id == id) {
            match platform {
                Platform::A => pair.a_webhook = Some(creds.clone()),
                Platform::B => pair.b_webhook = Some(creds.clone()),
            }
            pair.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn active_for_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Vec<BridgePair>, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active && p.channel_id(platform) == channel_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<BridgePair>, RepoError> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn all_active(&self) -> Result<Vec<BridgePair>, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryMessageMapRepo {
    rows: Mutex<HashMap<(Uuid, Platform, String), MessageMapEntry>>,
}

impl MemoryMessageMapRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageMapRepo for MemoryMessageMapRepo {
    async fn insert(&self, entry: &MessageMapEntry) -> Result<(), RepoError> {
        self.rows.lock().unwrap().insert(
            (
                entry.pair_id,
                entry.source_platform,
                entry.source_msg_id.clone(),
            ),
            entry.clone(),
        );
        Ok(())
    }

    async fn fetch(
        &self,
        pair_id: Uuid,
        source_platform: Platform,
        source_msg_id: &str,
    ) -> Result<Option<MessageMapEntry>, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(pair_id, source_platform, source_msg_id.to_owned()))
            .cloned())
    }

    async fn remove(
        &self,
        pair_id: Uuid,
        source_platform: Platform,
        source_msg_id: &str,
    ) -> Result<bool, RepoError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .remove(&(pair_id, source_platform, source_msg_id.to_owned()))
            .is_some())
    }
}
