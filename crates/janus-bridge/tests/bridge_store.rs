/// Bridge store tests: creation with webhook provisioning, duplicate
/// detection, repair, and lifecycle event emission.
use std::sync::Arc;
use tokio::sync::mpsc;

use janus_bridge::breaker::{BreakerConfig, BreakerRegistry};
use janus_bridge::bridge_store::{BridgeEvent, BridgeStore};
use janus_bridge::error::BridgeError;
use janus_bridge::platform::recording::{AdapterCall, RecordingAdapter};
use janus_bridge::platform::{PlatformError, PlatformRegistry};
use janus_bridge::repo::{MemoryBridgeRepo, NewBridgePair};

struct Fixture {
    a: Arc<RecordingAdapter>,
    b: Arc<RecordingAdapter>,
    store: BridgeStore,
    events: mpsc::Receiver<BridgeEvent>,
}

fn fixture() -> Fixture {
    let a = Arc::new(RecordingAdapter::platform_a());
    let b = Arc::new(RecordingAdapter::platform_b());
    let registry = PlatformRegistry::new(a.clone(), b.clone());
    let (tx, events) = mpsc::channel(16);
    let store = BridgeStore::new(
        Arc::new(MemoryBridgeRepo::new()),
        registry,
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        tx,
    );
    Fixture {
        a,
        b,
        store,
        events,
    }
}

fn new_pair() -> NewBridgePair {
    NewBridgePair {
        a_channel_id: "c-a".to_owned(),
        a_guild_id: "g-a".to_owned(),
        b_channel_id: "c-b".to_owned(),
        b_guild_id: Some("g-b".to_owned()),
        sync_uploads: false,
    }
}

fn webhook_creations(adapter: &RecordingAdapter) -> usize {
    adapter
        .calls()
        .iter()
        .filter(|c| matches!(c, AdapterCall::CreateWebhook { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_provisions_webhooks_on_both_sides() {
    let mut fx = fixture();
    let pair = fx.store.create(new_pair()).await.unwrap();

    assert!(pair.a_webhook.is_some(), "side A credentials stored");
    assert!(pair.b_webhook.is_some(), "side B credentials stored");
    assert_eq!(webhook_creations(&fx.a), 1);
    assert_eq!(webhook_creations(&fx.b), 1);

    match fx.events.recv().await {
        Some(BridgeEvent::Created(created)) => assert_eq!(created.id, pair.id),
        other => panic!("expected Created event, got {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_channel_pair_is_a_validation_error() {
    let fx = fixture();
    fx.store.create(new_pair()).await.unwrap();
    match fx.store.create(new_pair()).await {
        Err(BridgeError::Validation(_)) => {}
        other => panic!("expected validation error, got {:?}", other.map(|p| p.id)),
    }
}

#[tokio::test]
async fn one_failing_side_does_not_abort_creation() {
    let fx = fixture();
    fx.b.script_create_webhook(Err(PlatformError::Transient("502".to_owned())));

    let pair = fx.store.create(new_pair()).await.unwrap();
    assert!(pair.a_webhook.is_some());
    assert!(pair.b_webhook.is_none(), "failed side left without creds");
}

#[tokio::test]
async fn platform_refusing_webhooks_leaves_the_side_bare() {
    let fx = fixture();
    fx.b.script_create_webhook(Ok(None));

    let pair = fx.store.create(new_pair()).await.unwrap();
    assert!(pair.b_webhook.is_none());
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repair_fills_only_the_missing_side() {
    let fx = fixture();
    fx.b.script_create_webhook(Err(PlatformError::Transient("502".to_owned())));
    let pair = fx.store.create(new_pair()).await.unwrap();
    assert!(pair.b_webhook.is_none());

    let repaired = fx.store.repair(pair.id).await.unwrap();
    assert!(repaired.b_webhook.is_some(), "missing side recreated");
    // Side A already had credentials: exactly one creation call total.
    assert_eq!(webhook_creations(&fx.a), 1);
    assert_eq!(webhook_creations(&fx.b), 2);
}

#[tokio::test]
async fn repair_with_complete_credentials_is_a_no_op() {
    let fx = fixture();
    let pair = fx.store.create(new_pair()).await.unwrap();
    let calls_before = fx.a.call_count() + fx.b.call_count();

    fx.store.repair(pair.id).await.unwrap();
    assert_eq!(fx.a.call_count() + fx.b.call_count(), calls_before);
}

#[tokio::test]
async fn startup_repair_covers_all_active_bridges() {
    let fx = fixture();
    fx.b.script_create_webhook(Ok(None));
    let pair = fx.store.create(new_pair()).await.unwrap();
    assert!(pair.b_webhook.is_none());

    fx.store.repair_all_missing().await.unwrap();
    let repaired = fx.store.get(pair.id).await.unwrap().unwrap();
    assert!(repaired.b_webhook.is_some());
}

// ---------------------------------------------------------------------------
// Toggle / delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn toggle_updates_state_and_emits() {
    let mut fx = fixture();
    let pair = fx.store.create(new_pair()).await.unwrap();
    let _ = fx.events.recv().await; // Created

    let toggled = fx.store.toggle(pair.id, false).await.unwrap();
    assert!(!toggled.is_active);
    match fx.events.recv().await {
        Some(BridgeEvent::Toggled(p)) => assert!(!p.is_active),
        other => panic!("expected Toggled event, got {:?}", other),
    }
}

#[tokio::test]
async fn delete_emits_and_reports_unknown_ids() {
    let mut fx = fixture();
    let pair = fx.store.create(new_pair()).await.unwrap();
    let _ = fx.events.recv().await; // Created

    assert!(fx.store.delete(pair.id).await.unwrap());
    match fx.events.recv().await {
        Some(BridgeEvent::Deleted(id)) => assert_eq!(id, pair.id),
        other => panic!("expected Deleted event, got {:?}", other),
    }

    // Unknown id: no event, no error.
    assert!(!fx.store.delete(pair.id).await.unwrap());
    assert!(fx.events.try_recv().is_err());
}

#[tokio::test]
async fn toggle_of_an_unknown_bridge_is_a_validation_error() {
    let fx = fixture();
    match fx.store.toggle(uuid::Uuid::new_v4(), true).await {
        Err(BridgeError::Validation(_)) => {}
        other => panic!("expected validation error, got {:?}", other.map(|p| p.id)),
    }
}
