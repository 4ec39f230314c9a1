//! Worker supervisor: one delivery-worker set per active bridge.
//!
//! A set holds one queue worker per target platform, each bound to that
//! side's `deliver:<platform>:<channel>` queue. Starting an already
//! running set is a no-op, as is stopping an unknown one. Queued jobs
//! survive a stop: stopping a set only parks the queue until the bridge
//! is toggled active again.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use janus_kv::Kv;
use janus_protocol::{delivery_queue_name, Platform};

use crate::bridge_store::BridgeEvent;
use crate::delivery::DeliveryHandler;
use crate::queue::{QueueWorker, WorkerOptions};
use crate::repo::BridgePair;

struct WorkerSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerSupervisor {
    kv: Arc<dyn Kv>,
    handler: Arc<DeliveryHandler>,
    sets: HashMap<Uuid, WorkerSet>,
}

impl WorkerSupervisor {
    pub fn new(kv: Arc<dyn Kv>, handler: Arc<DeliveryHandler>) -> Self {
        WorkerSupervisor {
            kv,
            handler,
            sets: HashMap::new(),
        }
    }

    /// Number of bridges with running worker sets.
    pub fn running(&self) -> usize {
        self.sets.len()
    }

    pub fn is_running(&self, pair_id: Uuid) -> bool {
        self.sets.contains_key(&pair_id)
    }

    /// Start the delivery workers for one bridge. Idempotent.
    pub fn start_set(&mut self, pair: &BridgePair) {
        if self.sets.contains_key(&pair.id) {
            debug!(pair_id = %pair.id, "worker set already running");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = [Platform::A, Platform::B]
            .into_iter()
            .map(|platform| {
                let queue_name = delivery_queue_name(platform, pair.channel_id(platform));
                let worker = QueueWorker::new(
                    self.kv.clone(),
                    queue_name,
                    WorkerOptions::delivery(),
                    self.handler.clone(),
                );
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();
        self.sets.insert(
            pair.id,
            WorkerSet {
                shutdown: shutdown_tx,
                handles,
            },
        );
        info!(pair_id = %pair.id, "delivery worker set started");
    }

    /// Stop and drop one bridge's workers, waiting for in-flight jobs.
    /// Unknown ids are a no-op.
    pub async fn stop_set(&mut self, pair_id: Uuid) {
        let Some(set) = self.sets.remove(&pair_id) else {
            debug!(pair_id = %pair_id, "no worker set to stop");
            return;
        };
        let _ = set.shutdown.send(true);
        for handle in set.handles {
            let _ = handle.await;
        }
        info!(pair_id = %pair_id, "delivery worker set stopped");
    }

    /// Start sets for every pair in the startup snapshot.
    pub fn start_all(&mut self, pairs: &[BridgePair]) {
        for pair in pairs {
            self.start_set(pair);
        }
    }

    /// Consume bridge lifecycle events until shutdown, then stop all sets.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BridgeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.apply(event).await;
                }
            }
        }
        self.stop_all().await;
        info!("worker supervisor stopped");
    }

    pub async fn apply(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Created(pair) => {
                if pair.is_active {
                    self.start_set(&pair);
                }
            }
            BridgeEvent::Toggled(pair) => {
                if pair.is_active {
                    self.start_set(&pair);
                } else {
                    self.stop_set(pair.id).await;
                }
            }
            BridgeEvent::Deleted(pair_id) => {
                self.stop_set(pair_id).await;
            }
        }
    }

    pub async fn stop_all(&mut self) {
        let ids: Vec<Uuid> = self.sets.keys().copied().collect();
        for id in ids {
            self.stop_set(id).await;
        }
    }
}
