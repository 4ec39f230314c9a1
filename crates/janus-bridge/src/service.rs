//! Service orchestration: wires the pipeline together and manages the
//! ordered startup and shutdown sequences.
//!
//! The hosting binary loads [`Config`], builds the Postgres pool and KV
//! connection, runs migrations, constructs the two platform adapters, and
//! hands everything to [`Service::start`]. Startup failures propagate as
//! errors so the host can exit non-zero; once running, worker failures
//! never take the process down.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use janus_kv::Kv;
use janus_protocol::{Platform, INGEST_QUEUE};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::bridge_store::BridgeStore;
use crate::config::Config;
use crate::delivery::{DeliveryHandler, DeliverySettings};
use crate::error::Result;
use crate::ingest::IngestPump;
use crate::loop_filter::LoopFilter;
use crate::platform::PlatformRegistry;
use crate::queue::{QueueWorker, WorkerOptions};
use crate::rate_limit::RateLimiter;
use crate::repo::{BridgeRepo, MessageMapRepo};
use crate::router::RouterHandler;
use crate::supervisor::WorkerSupervisor;

/// Capacity of the adapters' inbound event channel.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;
/// Capacity of the bridge lifecycle channel.
const BRIDGE_EVENT_CAPACITY: usize = 64;

/// Handle to the running pipeline.
pub struct Service {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    registry: PlatformRegistry,
}

impl Service {
    /// Start the pipeline: connect adapters, repair missing webhooks,
    /// start the per-bridge delivery workers, the router, and the ingest
    /// pump. Returns the service handle and the [`BridgeStore`] for the
    /// bridge-administration collaborator.
    pub async fn start(
        cfg: &Config,
        bridges: Arc<dyn BridgeRepo>,
        messages: Arc<dyn MessageMapRepo>,
        kv: Arc<dyn Kv>,
        registry: PlatformRegistry,
    ) -> Result<(Service, BridgeStore)> {
        kv.ping().await?;

        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
            min_calls: cfg.cb_failure_threshold,
            reset_timeout: std::time::Duration::from_millis(cfg.cb_reset_timeout_ms),
            ..BreakerConfig::default()
        }));

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        registry
            .get(Platform::A)
            .connect(&cfg.a_token, inbound_tx.clone())
            .await?;
        registry
            .get(Platform::B)
            .connect(&cfg.b_token, inbound_tx)
            .await?;
        info!("platform adapters connected");

        let (bridge_tx, bridge_rx) = mpsc::channel(BRIDGE_EVENT_CAPACITY);
        let store = BridgeStore::new(
            bridges.clone(),
            registry.clone(),
            breakers.clone(),
            bridge_tx,
        );
        store.repair_all_missing().await?;

        let loop_filter = LoopFilter::new(kv.clone(), cfg.loop_hash_ttl_secs);
        let rate_limiter = RateLimiter::new(
            kv.clone(),
            cfg.rate_limit_per_channel,
            cfg.rate_limit_window_secs,
        );
        let handler = Arc::new(DeliveryHandler::new(
            kv.clone(),
            bridges.clone(),
            messages,
            registry.clone(),
            loop_filter.clone(),
            rate_limiter,
            breakers,
            DeliverySettings::from_config(cfg),
        ));

        let mut supervisor = WorkerSupervisor::new(kv.clone(), handler);
        let active = bridges.all_active().await?;
        info!(bridges = active.len(), "starting delivery workers");
        supervisor.start_all(&active);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = IngestPump::new(kv.clone(), inbound_rx);
        let router_handler = Arc::new(RouterHandler::new(
            bridges,
            kv.clone(),
            loop_filter,
            registry.clone(),
        ));
        let router = QueueWorker::new(kv, INGEST_QUEUE, WorkerOptions::ingest(), router_handler);

        let tasks = vec![
            tokio::spawn(pump.run(shutdown_rx.clone())),
            tokio::spawn(router.run(shutdown_rx.clone())),
            tokio::spawn(supervisor.run(bridge_rx, shutdown_rx)),
        ];

        info!("bridge service started");
        Ok((
            Service {
                shutdown: shutdown_tx,
                tasks,
                registry,
            },
            store,
        ))
    }

    /// Ordered teardown: stop accepting work, drain in-flight jobs,
    /// disconnect the adapters.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        for platform in [Platform::A, Platform::B] {
            if let Err(e) = self.registry.get(platform).disconnect().await {
                warn!(platform = %platform, error = %e, "adapter disconnect failed");
            }
        }
        info!("bridge service stopped");
    }
}
