//! Ingest pump: drains the adapters' inbound event channel, normalizes,
//! and enqueues canonical events on the global ingest queue.
//!
//! Malformed payloads are logged and dropped; they never fail the pump.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use janus_kv::Kv;
use janus_protocol::INGEST_QUEUE;

use crate::normalize::normalize;
use crate::platform::InboundEvent;
use crate::queue::Queue;

pub struct IngestPump {
    queue: Queue,
    events: mpsc::Receiver<InboundEvent>,
}

impl IngestPump {
    pub fn new(kv: Arc<dyn Kv>, events: mpsc::Receiver<InboundEvent>) -> Self {
        IngestPump {
            queue: Queue::new(kv, INGEST_QUEUE),
            events,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                inbound = self.events.recv() => {
                    let Some(inbound) = inbound else { break };
                    self.ingest(inbound).await;
                }
            }
        }
        info!("ingest pump stopped");
    }

    async fn ingest(&self, inbound: InboundEvent) {
        match normalize(inbound.platform, inbound.kind, &inbound.raw) {
            Ok(event) => {
                if let Err(e) = self.queue.enqueue(&event).await {
                    warn!(
                        platform = %inbound.platform,
                        channel_id = %inbound.raw.channel_id,
                        error = %e,
                        "failed to enqueue inbound event"
                    );
                }
            }
            Err(e) => {
                warn!(
                    platform = %inbound.platform,
                    kind = ?inbound.kind,
                    error = %e,
                    "dropping malformed inbound event"
                );
            }
        }
    }
}
