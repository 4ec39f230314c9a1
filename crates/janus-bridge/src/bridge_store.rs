//! Bridge pair CRUD with webhook lifecycle side effects.
//!
//! The store owns `bridge_pairs` rows. Creating a bridge attempts to
//! provision an impersonating webhook on each side; one side failing is
//! tolerated (that side falls back to native sends until `repair` runs).
//! Lifecycle changes are published on a bounded channel the worker
//! supervisor consumes; no in-process pub/sub globals.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use janus_protocol::Platform;

use crate::breaker::BreakerRegistry;
use crate::error::{BridgeError, Result};
use crate::platform::PlatformRegistry;
use crate::repo::{BridgePair, BridgeRepo, NewBridgePair, RepoError};

/// Display name given to webhooks the bridge provisions.
pub const WEBHOOK_NAME: &str = "janus bridge";

/// Lifecycle notifications consumed by the worker supervisor.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Created(BridgePair),
    Toggled(BridgePair),
    Deleted(Uuid),
}

pub struct BridgeStore {
    repo: Arc<dyn BridgeRepo>,
    registry: PlatformRegistry,
    breakers: Arc<BreakerRegistry>,
    events: mpsc::Sender<BridgeEvent>,
}

impl BridgeStore {
    pub fn new(
        repo: Arc<dyn BridgeRepo>,
        registry: PlatformRegistry,
        breakers: Arc<BreakerRegistry>,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Self {
        BridgeStore {
            repo,
            registry,
            breakers,
            events,
        }
    }

    /// Create a bridge and provision webhooks on both sides.
    pub async fn create(&self, new: NewBridgePair) -> Result<BridgePair> {
        let pair = self.repo.insert(new).await.map_err(|e| match e {
            RepoError::Duplicate => BridgeError::Validation(e.to_string()),
            other => BridgeError::Repo(other),
        })?;

        for platform in [Platform::A, Platform::B] {
            self.provision_webhook(pair.id, platform, pair.channel_id(platform))
                .await?;
        }

        let pair = self
            .repo
            .fetch(pair.id)
            .await?
            .ok_or_else(|| BridgeError::Validation("bridge vanished during creation".to_owned()))?;
        info!(
            pair_id = %pair.id,
            a_channel_id = %pair.a_channel_id,
            b_channel_id = %pair.b_channel_id,
            "bridge created"
        );
        self.emit(BridgeEvent::Created(pair.clone())).await;
        Ok(pair)
    }

    /// Delete a bridge. Returns false when the id is unknown.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let deleted = self.repo.delete(id).await?;
        if deleted {
            info!(pair_id = %id, "bridge deleted");
            self.emit(BridgeEvent::Deleted(id)).await;
        }
        Ok(deleted)
    }

    /// Activate or deactivate a bridge.
    pub async fn toggle(&self, id: Uuid, active: bool) -> Result<BridgePair> {
        let pair = self
            .repo
            .set_active(id, active)
            .await?
            .ok_or_else(|| BridgeError::Validation(format!("unknown bridge {id}")))?;
        info!(pair_id = %id, active, "bridge toggled");
        self.emit(BridgeEvent::Toggled(pair.clone())).await;
        Ok(pair)
    }

    /// Re-create any missing webhook on either side. No-op when both
    /// credential sets are present.
    pub async fn repair(&self, id: Uuid) -> Result<BridgePair> {
        let pair = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| BridgeError::Validation(format!("unknown bridge {id}")))?;

        for platform in [Platform::A, Platform::B] {
            if pair.webhook(platform).is_none() {
                self.provision_webhook(pair.id, platform, pair.channel_id(platform))
                    .await?;
            }
        }

        self.repo
            .fetch(id)
            .await?
            .ok_or_else(|| BridgeError::Validation(format!("unknown bridge {id}")))
    }

    /// Startup pass: repair every active bridge that lacks credentials.
    pub async fn repair_all_missing(&self) -> Result<()> {
        for pair in self.repo.all_active().await? {
            if pair.a_webhook.is_none() || pair.b_webhook.is_none() {
                self.repair(pair.id).await?;
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<BridgePair>> {
        Ok(self.repo.fetch(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<BridgePair>> {
        Ok(self.repo.all().await?)
    }

    /// Obtain one side's webhook (adopting an existing one where the
    /// platform exposes it, creating otherwise) and store whatever was
    /// obtained. Platform refusals and call failures are logged, not
    /// propagated.
    async fn provision_webhook(
        &self,
        pair_id: Uuid,
        platform: Platform,
        channel_id: &str,
    ) -> Result<()> {
        let adapter = self.registry.get(platform);

        match self
            .breakers
            .guarded(
                &format!("{}:webhook-fetch", platform),
                adapter.fetch_webhook(channel_id),
            )
            .await
        {
            Ok(Some(creds)) => {
                self.repo.set_webhook(pair_id, platform, &creds).await?;
                info!(pair_id = %pair_id, platform = %platform, "existing webhook adopted");
                return Ok(());
            }
            Ok(None) => {}
            Err(failure) => {
                warn!(
                    pair_id = %pair_id,
                    platform = %platform,
                    error = %failure,
                    "webhook lookup failed, creating a fresh one"
                );
            }
        }

        let breaker = format!("{}:webhook-create", platform);
        match self
            .breakers
            .guarded(&breaker, adapter.create_webhook(channel_id, WEBHOOK_NAME))
            .await
        {
            Ok(Some(creds)) => {
                self.repo.set_webhook(pair_id, platform, &creds).await?;
                info!(pair_id = %pair_id, platform = %platform, "webhook provisioned");
            }
            Ok(None) => {
                warn!(
                    pair_id = %pair_id,
                    platform = %platform,
                    channel_id = %channel_id,
                    "platform refused webhook creation, side falls back to native sends"
                );
            }
            Err(failure) => {
                warn!(
                    pair_id = %pair_id,
                    platform = %platform,
                    error = %failure,
                    "webhook creation failed"
                );
            }
        }
        Ok(())
    }

    async fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).await.is_err() {
            warn!("bridge event receiver dropped, supervisor not running");
        }
    }
}
