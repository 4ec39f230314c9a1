//! Router worker: consumes the ingest queue and fans canonical events out
//! to per-target-channel delivery queues.
//!
//! Variant selection happens here, once, so the delivery worker never
//! re-derives the decision: creates pick webhook vs fallback by the
//! counterpart credentials, updates pick direct vs workaround by the
//! target adapter's webhook-edit capability.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use janus_kv::Kv;
use janus_protocol::{CanonicalEvent, DeliveryJob, EventKind, TargetRef};

use crate::clock;
use crate::loop_filter::LoopFilter;
use crate::platform::PlatformRegistry;
use crate::queue::{JobHandler, JobOutcome, Queue};
use crate::repo::{BridgePair, BridgeRepo};

pub struct RouterHandler {
    repo: Arc<dyn BridgeRepo>,
    kv: Arc<dyn Kv>,
    loop_filter: LoopFilter,
    registry: PlatformRegistry,
}

impl RouterHandler {
    pub fn new(
        repo: Arc<dyn BridgeRepo>,
        kv: Arc<dyn Kv>,
        loop_filter: LoopFilter,
        registry: PlatformRegistry,
    ) -> Self {
        RouterHandler {
            repo,
            kv,
            loop_filter,
            registry,
        }
    }
}

#[async_trait]
impl JobHandler for RouterHandler {
    type Job = CanonicalEvent;

    async fn handle(&self, event: CanonicalEvent) -> JobOutcome {
        // Echoes of our own outbound messages die here.
        match self
            .loop_filter
            .check(&event.content, &event.author.name, clock::now_ms())
            .await
        {
            Ok(true) => {
                debug!(
                    source = %event.source.platform,
                    channel_id = %event.source.channel_id,
                    "loop filter hit, dropping echo"
                );
                return JobOutcome::Complete;
            }
            Ok(false) => {}
            Err(e) => return JobOutcome::Fail(format!("loop filter: {e}")),
        }

        let pairs = match self
            .repo
            .active_for_channel(event.source.platform, &event.source.channel_id)
            .await
        {
            Ok(pairs) => pairs,
            Err(e) => return JobOutcome::Fail(format!("bridge lookup: {e}")),
        };
        if pairs.is_empty() {
            return JobOutcome::Complete;
        }

        // A channel may take part in several bridges: one job per bridge.
        for pair in &pairs {
            let job = build_delivery_job(pair, &event, &self.registry);
            let queue = Queue::new(self.kv.clone(), job.queue_name());
            if let Err(e) = queue.enqueue(&job).await {
                return JobOutcome::Fail(format!("enqueue on {}: {e}", queue.name()));
            }
            debug!(
                pair_id = %pair.id,
                queue = %queue.name(),
                kind = ?event.kind,
                "delivery job dispatched"
            );
        }
        JobOutcome::Complete
    }
}

/// Build the counterpart-side delivery job for one bridge pair.
pub fn build_delivery_job(
    pair: &BridgePair,
    event: &CanonicalEvent,
    registry: &PlatformRegistry,
) -> DeliveryJob {
    let target_platform = event.source.platform.other();
    let target = TargetRef {
        platform: target_platform,
        channel_id: pair.channel_id(target_platform).to_owned(),
        guild_id: pair.guild_id(target_platform).map(ToOwned::to_owned),
    };
    let webhook = pair.webhook(target_platform).cloned();

    match event.kind {
        EventKind::MsgCreate => match webhook {
            Some(webhook) => DeliveryJob::CreateWithWebhook {
                event: event.clone(),
                pair_id: pair.id,
                target,
                webhook,
                sync_uploads: pair.sync_uploads,
            },
            None => DeliveryJob::CreateFallback {
                event: event.clone(),
                pair_id: pair.id,
                target,
                sync_uploads: pair.sync_uploads,
            },
        },
        EventKind::MsgUpdate => match webhook {
            // An impersonated post exists, but the target API cannot edit
            // it: fall back to the jump-link workaround.
            Some(webhook) if !registry.get(target_platform).supports_webhook_edits() => {
                DeliveryJob::UpdateWorkaround {
                    event: event.clone(),
                    pair_id: pair.id,
                    target,
                    webhook,
                }
            }
            webhook => DeliveryJob::UpdateDirect {
                event: event.clone(),
                pair_id: pair.id,
                target,
                webhook,
            },
        },
        EventKind::MsgDelete => DeliveryJob::Delete {
            event: event.clone(),
            pair_id: pair.id,
            target,
            webhook,
        },
    }
}
