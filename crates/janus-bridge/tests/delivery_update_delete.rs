/// Delivery tests for MSG_UPDATE and MSG_DELETE: direct webhook edits,
/// the jump-link edit-workaround with its tracker swap, and delete
/// cleanup across destination message, workaround post, and map row.
use std::sync::Arc;

use janus_bridge::breaker::{BreakerConfig, BreakerRegistry};
use janus_bridge::delivery::{edit_update_key, DeliveryHandler, DeliverySettings};
use janus_bridge::loop_filter::LoopFilter;
use janus_bridge::platform::recording::{AdapterCall, RecordingAdapter};
use janus_bridge::platform::{PlatformError, PlatformRegistry};
use janus_bridge::queue::{JobHandler, JobOutcome};
use janus_bridge::rate_limit::RateLimiter;
use janus_bridge::repo::{
    BridgePair, BridgeRepo, MemoryBridgeRepo, MemoryMessageMapRepo, MessageMapEntry,
    MessageMapRepo, NewBridgePair,
};
use janus_bridge::router::build_delivery_job;
use janus_kv::{Kv, MemoryKv};
use janus_protocol::{
    Author, CanonicalEvent, EventKind, Platform, SourceRef, WebhookCredentials,
};

struct Fixture {
    kv: Arc<dyn Kv>,
    bridges: Arc<MemoryBridgeRepo>,
    messages: Arc<MemoryMessageMapRepo>,
    a: Arc<RecordingAdapter>,
    b: Arc<RecordingAdapter>,
    registry: PlatformRegistry,
    handler: DeliveryHandler,
}

fn fixture() -> Fixture {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let bridges = Arc::new(MemoryBridgeRepo::new());
    let messages = Arc::new(MemoryMessageMapRepo::new());
    let a = Arc::new(RecordingAdapter::platform_a());
    let b = Arc::new(RecordingAdapter::platform_b());
    let registry = PlatformRegistry::new(a.clone(), b.clone());
    let handler = DeliveryHandler::new(
        kv.clone(),
        bridges.clone(),
        messages.clone(),
        registry.clone(),
        LoopFilter::new(kv.clone(), 10),
        RateLimiter::new(kv.clone(), 100, 2),
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        DeliverySettings::default(),
    );
    Fixture {
        kv,
        bridges,
        messages,
        a,
        b,
        registry,
        handler,
    }
}

async fn pair_with_b_webhook(fx: &Fixture, b_guild: Option<&str>) -> BridgePair {
    let pair = fx
        .bridges
        .insert(NewBridgePair {
            a_channel_id: "c-a".to_owned(),
            a_guild_id: "g-a".to_owned(),
            b_channel_id: "c-b".to_owned(),
            b_guild_id: b_guild.map(ToOwned::to_owned),
            sync_uploads: false,
        })
        .await
        .unwrap();
    fx.bridges
        .set_webhook(
            pair.id,
            Platform::B,
            &WebhookCredentials {
                id: "wh-b".to_owned(),
                token: "wh-b-token".to_owned(),
            },
        )
        .await
        .unwrap();
    fx.bridges.fetch(pair.id).await.unwrap().unwrap()
}

/// Simulate an earlier bridged create: source message m-src on A became
/// destination message M1 on B.
async fn seed_map(fx: &Fixture, pair: &BridgePair) {
    fx.messages
        .insert(&MessageMapEntry {
            pair_id: pair.id,
            source_platform: Platform::A,
            source_msg_id: "m-src".to_owned(),
            dest_platform: Platform::B,
            dest_msg_id: "M1".to_owned(),
        })
        .await
        .unwrap();
}

fn update_event(content: &str) -> CanonicalEvent {
    CanonicalEvent {
        kind: EventKind::MsgUpdate,
        content: content.to_owned(),
        author: Author {
            name: "alice".to_owned(),
            avatar: None,
        },
        source: SourceRef {
            platform: Platform::A,
            message_id: "m-src".to_owned(),
            channel_id: "c-a".to_owned(),
            guild_id: Some("g-a".to_owned()),
        },
        attachments: vec![],
        timestamp_ms: 1_714_564_900_000,
    }
}

fn delete_event() -> CanonicalEvent {
    CanonicalEvent {
        kind: EventKind::MsgDelete,
        content: String::new(),
        author: Author {
            name: "unknown".to_owned(),
            avatar: None,
        },
        source: SourceRef {
            platform: Platform::A,
            message_id: "m-src".to_owned(),
            channel_id: "c-a".to_owned(),
            guild_id: Some("g-a".to_owned()),
        },
        attachments: vec![],
        timestamp_ms: 0,
    }
}

// ---------------------------------------------------------------------------
// Edit-workaround (target platform cannot edit impersonated posts)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workaround_posts_the_edited_content_with_a_jump_link() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    seed_map(&fx, &pair).await;

    let job = build_delivery_job(&pair, &update_event("hi"), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let calls = fx.b.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        AdapterCall::WebhookSend { message, .. } => {
            assert_eq!(
                message.content,
                "hi\n-# [Jump to original message](https://b.app/channels/g-b/c-b/M1)"
            );
            assert_eq!(message.username, "alice");
        }
        other => panic!("unexpected call {:?}", other),
    }

    // Tracker points at the fresh workaround post, with a week-long TTL.
    let key = edit_update_key(pair.id, Platform::A, "m-src");
    assert_eq!(fx.kv.get(&key).await.unwrap().as_deref(), Some("b-msg-1"));
    let ttl = fx.kv.pttl_ms(&key).await.unwrap().expect("tracker ttl");
    assert!(ttl > 600_000_000, "tracker ttl {} too short", ttl);
}

#[tokio::test]
async fn workaround_without_a_guild_links_through_at_me() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, None).await;
    seed_map(&fx, &pair).await;

    let job = build_delivery_job(&pair, &update_event("hi"), &fx.registry);
    fx.handler.handle(job).await;

    match &fx.b.calls()[0] {
        AdapterCall::WebhookSend { message, .. } => {
            assert!(
                message.content.contains("https://b.app/channels/@me/c-b/M1"),
                "got {:?}",
                message.content
            );
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn second_update_retires_the_previous_workaround_post() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    seed_map(&fx, &pair).await;

    let first = build_delivery_job(&pair, &update_event("hi"), &fx.registry);
    fx.handler.handle(first).await;
    let second = build_delivery_job(&pair, &update_event("hi again"), &fx.registry);
    fx.handler.handle(second).await;

    let key = edit_update_key(pair.id, Platform::A, "m-src");
    assert_eq!(fx.kv.get(&key).await.unwrap().as_deref(), Some("b-msg-2"));

    // The first workaround post was deleted when the second replaced it.
    let deleted: Vec<String> = fx
        .b
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            AdapterCall::WebhookDelete { message_id, .. } => Some(message_id),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec!["b-msg-1".to_owned()]);
}

#[tokio::test]
async fn update_without_a_map_entry_makes_no_platform_call() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    // No seed_map: the original create was never bridged.

    let job = build_delivery_job(&pair, &update_event("hi"), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));
    assert_eq!(fx.b.call_count(), 0);
}

#[tokio::test]
async fn permanent_refusal_on_update_clears_the_stale_map_row() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    seed_map(&fx, &pair).await;
    fx.b.script_webhook_send(Err(PlatformError::Permanent(
        "unknown webhook".to_owned(),
    )));

    let job = build_delivery_job(&pair, &update_event("hi"), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));
    assert!(fx.messages.is_empty(), "stale map row must be removed");
}

// ---------------------------------------------------------------------------
// Direct edits (target platform supports webhook edits)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_toward_platform_a_edits_the_webhook_message() {
    let fx = fixture();
    let pair = fx
        .bridges
        .insert(NewBridgePair {
            a_channel_id: "c-a".to_owned(),
            a_guild_id: "g-a".to_owned(),
            b_channel_id: "c-b".to_owned(),
            b_guild_id: Some("g-b".to_owned()),
            sync_uploads: false,
        })
        .await
        .unwrap();
    fx.bridges
        .set_webhook(
            pair.id,
            Platform::A,
            &WebhookCredentials {
                id: "wh-a".to_owned(),
                token: "wh-a-token".to_owned(),
            },
        )
        .await
        .unwrap();
    let pair = fx.bridges.fetch(pair.id).await.unwrap().unwrap();
    fx.messages
        .insert(&MessageMapEntry {
            pair_id: pair.id,
            source_platform: Platform::B,
            source_msg_id: "m-b".to_owned(),
            dest_platform: Platform::A,
            dest_msg_id: "MA1".to_owned(),
        })
        .await
        .unwrap();

    let mut event = update_event("edited");
    event.source.platform = Platform::B;
    event.source.message_id = "m-b".to_owned();
    event.source.channel_id = "c-b".to_owned();

    let job = build_delivery_job(&pair, &event, &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let calls = fx.a.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        AdapterCall::WebhookEdit {
            webhook_id,
            message_id,
            content,
        } => {
            assert_eq!(webhook_id, "wh-a");
            assert_eq!(message_id, "MA1");
            assert_eq!(content, "edited");
        }
        other => panic!("unexpected call {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Deletes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_removes_destination_workaround_and_map_row() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    seed_map(&fx, &pair).await;
    // An earlier edit-workaround post M2 is being tracked.
    let key = edit_update_key(pair.id, Platform::A, "m-src");
    fx.kv.set_ex(&key, "M2", 604_800).await.unwrap();

    let job = build_delivery_job(&pair, &delete_event(), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let deleted: Vec<String> = fx
        .b
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            AdapterCall::WebhookDelete { message_id, .. } => Some(message_id),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec!["M1".to_owned(), "M2".to_owned()]);

    assert_eq!(fx.kv.get(&key).await.unwrap(), None, "tracker cleared");
    assert!(fx.messages.is_empty(), "map row removed");
}

#[tokio::test]
async fn delete_without_a_map_entry_makes_no_platform_call() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;

    let job = build_delivery_job(&pair, &delete_event(), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));
    assert_eq!(fx.b.call_count(), 0);
}

#[tokio::test]
async fn delete_of_an_already_gone_destination_still_cleans_up() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    seed_map(&fx, &pair).await;
    fx.b.script_webhook_delete(Err(PlatformError::Permanent(
        "unknown message".to_owned(),
    )));

    let job = build_delivery_job(&pair, &delete_event(), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Complete));
    assert!(fx.messages.is_empty(), "map row removed despite 404");
}

#[tokio::test]
async fn transient_delete_failure_retries_without_touching_the_map() {
    let fx = fixture();
    let pair = pair_with_b_webhook(&fx, Some("g-b")).await;
    seed_map(&fx, &pair).await;
    fx.b.script_webhook_delete(Err(PlatformError::Transient("502".to_owned())));

    let job = build_delivery_job(&pair, &delete_event(), &fx.registry);
    let outcome = fx.handler.handle(job).await;
    assert!(matches!(outcome, JobOutcome::Fail(_)));
    assert_eq!(fx.messages.len(), 1, "map row kept for the retry");
}
