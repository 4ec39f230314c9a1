/// Router tests: loop-filter drops, per-bridge fan-out, and delivery-job
/// variant selection.
use std::sync::Arc;

use janus_bridge::clock;
use janus_bridge::loop_filter::LoopFilter;
use janus_bridge::platform::recording::RecordingAdapter;
use janus_bridge::platform::PlatformRegistry;
use janus_bridge::queue::{JobHandler, JobOutcome, Queue};
use janus_bridge::repo::{BridgeRepo, MemoryBridgeRepo, NewBridgePair};
use janus_bridge::router::{build_delivery_job, RouterHandler};
use janus_kv::{Kv, MemoryKv};
use janus_protocol::{
    Author, CanonicalEvent, DeliveryJob, EventKind, Platform, SourceRef, WebhookCredentials,
};

fn registry() -> PlatformRegistry {
    PlatformRegistry::new(
        Arc::new(RecordingAdapter::platform_a()),
        Arc::new(RecordingAdapter::platform_b()),
    )
}

fn event(kind: EventKind, channel_id: &str) -> CanonicalEvent {
    CanonicalEvent {
        kind,
        content: "hello".to_owned(),
        author: Author {
            name: "alice".to_owned(),
            avatar: None,
        },
        source: SourceRef {
            platform: Platform::A,
            message_id: "m-src".to_owned(),
            channel_id: channel_id.to_owned(),
            guild_id: Some("g-a".to_owned()),
        },
        attachments: vec![],
        timestamp_ms: 1_714_564_800_000,
    }
}

fn new_pair(b_channel: &str) -> NewBridgePair {
    NewBridgePair {
        a_channel_id: "c-a".to_owned(),
        a_guild_id: "g-a".to_owned(),
        b_channel_id: b_channel.to_owned(),
        b_guild_id: Some("g-b".to_owned()),
        sync_uploads: false,
    }
}

fn creds(id: &str) -> WebhookCredentials {
    WebhookCredentials {
        id: id.to_owned(),
        token: format!("{id}-token"),
    }
}

struct Fixture {
    kv: Arc<dyn Kv>,
    repo: Arc<MemoryBridgeRepo>,
    filter: LoopFilter,
    handler: RouterHandler,
}

fn fixture() -> Fixture {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let repo = Arc::new(MemoryBridgeRepo::new());
    let filter = LoopFilter::new(kv.clone(), 10);
    let handler = RouterHandler::new(repo.clone(), kv.clone(), filter.clone(), registry());
    Fixture {
        kv,
        repo,
        filter,
        handler,
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_is_dispatched_to_the_counterpart_queue() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    fx.repo
        .set_webhook(pair.id, Platform::B, &creds("wh-b"))
        .await
        .unwrap();

    let outcome = fx.handler.handle(event(EventKind::MsgCreate, "c-a")).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let queue = Queue::new(fx.kv.clone(), "deliver:b:c-b");
    assert_eq!(queue.waiting_len().await.unwrap(), 1);

    let envelope = queue.pop().await.unwrap().expect("one job");
    let job: DeliveryJob = serde_json::from_value(envelope.payload).unwrap();
    match job {
        DeliveryJob::CreateWithWebhook {
            target, webhook, ..
        } => {
            assert_eq!(target.platform, Platform::B);
            assert_eq!(target.channel_id, "c-b");
            assert_eq!(webhook.id, "wh-b");
        }
        other => panic!("expected CreateWithWebhook, got {:?}", other),
    }
}

#[tokio::test]
async fn one_channel_in_two_bridges_dispatches_once_per_bridge() {
    let fx = fixture();
    let first = fx.repo.insert(new_pair("c-b1")).await.unwrap();
    fx.repo
        .set_webhook(first.id, Platform::B, &creds("wh-1"))
        .await
        .unwrap();
    // Second bridge has no webhook: its job must be the fallback variant.
    fx.repo.insert(new_pair("c-b2")).await.unwrap();

    let outcome = fx.handler.handle(event(EventKind::MsgCreate, "c-a")).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let q1 = Queue::new(fx.kv.clone(), "deliver:b:c-b1");
    let q2 = Queue::new(fx.kv.clone(), "deliver:b:c-b2");
    assert_eq!(q1.waiting_len().await.unwrap(), 1);
    assert_eq!(q2.waiting_len().await.unwrap(), 1);

    let job: DeliveryJob =
        serde_json::from_value(q2.pop().await.unwrap().unwrap().payload).unwrap();
    assert!(matches!(job, DeliveryJob::CreateFallback { .. }));
}

#[tokio::test]
async fn inactive_bridges_receive_nothing() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    fx.repo.set_active(pair.id, false).await.unwrap();

    let outcome = fx.handler.handle(event(EventKind::MsgCreate, "c-a")).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let queue = Queue::new(fx.kv.clone(), "deliver:b:c-b");
    assert_eq!(queue.waiting_len().await.unwrap(), 0);
}

#[tokio::test]
async fn unbridged_channels_are_ignored() {
    let fx = fixture();
    fx.repo.insert(new_pair("c-b")).await.unwrap();

    let outcome = fx
        .handler
        .handle(event(EventKind::MsgCreate, "c-elsewhere"))
        .await;
    assert!(matches!(outcome, JobOutcome::Complete));
    assert_eq!(
        Queue::new(fx.kv.clone(), "deliver:b:c-b")
            .waiting_len()
            .await
            .unwrap(),
        0
    );
}

// ---------------------------------------------------------------------------
// Loop suppression
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registered_echo_is_dropped_before_routing() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    fx.repo
        .set_webhook(pair.id, Platform::B, &creds("wh-b"))
        .await
        .unwrap();

    // The bridge just sent "hello" as alice; the platform now echoes it.
    fx.filter
        .register("hello", "alice", clock::now_ms())
        .await
        .unwrap();

    let outcome = fx.handler.handle(event(EventKind::MsgCreate, "c-a")).await;
    assert!(matches!(outcome, JobOutcome::Complete));
    assert_eq!(
        Queue::new(fx.kv.clone(), "deliver:b:c-b")
            .waiting_len()
            .await
            .unwrap(),
        0,
        "echo must not produce a delivery job"
    );
}

// ---------------------------------------------------------------------------
// Variant selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_toward_platform_b_with_webhook_uses_the_workaround() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    fx.repo
        .set_webhook(pair.id, Platform::B, &creds("wh-b"))
        .await
        .unwrap();
    let pair = fx.repo.fetch(pair.id).await.unwrap().unwrap();

    let job = build_delivery_job(&pair, &event(EventKind::MsgUpdate, "c-a"), &registry());
    assert!(matches!(job, DeliveryJob::UpdateWorkaround { .. }));
}

#[tokio::test]
async fn update_toward_platform_a_edits_in_place() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    fx.repo
        .set_webhook(pair.id, Platform::A, &creds("wh-a"))
        .await
        .unwrap();
    let pair = fx.repo.fetch(pair.id).await.unwrap().unwrap();

    // Source side is B, so the target is A which supports webhook edits.
    let mut update = event(EventKind::MsgUpdate, "c-b");
    update.source.platform = Platform::B;

    let job = build_delivery_job(&pair, &update, &registry());
    match job {
        DeliveryJob::UpdateDirect {
            target, webhook, ..
        } => {
            assert_eq!(target.platform, Platform::A);
            assert_eq!(webhook.expect("credentials").id, "wh-a");
        }
        other => panic!("expected UpdateDirect, got {:?}", other),
    }
}

#[tokio::test]
async fn update_without_webhook_stays_direct() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    let pair = fx.repo.fetch(pair.id).await.unwrap().unwrap();

    let job = build_delivery_job(&pair, &event(EventKind::MsgUpdate, "c-a"), &registry());
    assert!(matches!(
        job,
        DeliveryJob::UpdateDirect { webhook: None, .. }
    ));
}

#[tokio::test]
async fn delete_maps_to_the_delete_variant() {
    let fx = fixture();
    let pair = fx.repo.insert(new_pair("c-b")).await.unwrap();
    let pair = fx.repo.fetch(pair.id).await.unwrap().unwrap();

    let job = build_delivery_job(&pair, &event(EventKind::MsgDelete, "c-a"), &registry());
    match job {
        DeliveryJob::Delete { target, .. } => {
            assert_eq!(target.platform, Platform::B);
            assert_eq!(target.guild_id.as_deref(), Some("g-b"));
        }
        other => panic!("expected Delete, got {:?}", other),
    }
}
