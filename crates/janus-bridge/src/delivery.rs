//! Delivery worker: applies one canonical event to the destination
//! platform.
//!
//! Each job passes the per-channel rate gate, reloads its bridge pair
//! (webhook tokens may have been repaired since dispatch), and then
//! executes its variant. Platform calls run behind named circuit
//! breakers; failures map to the queue outcome per the error taxonomy:
//! transient/open/timeout retry with backoff, platform rate limits
//! reschedule without counting an attempt, and permanent refusals clean
//! up the message map so retries cannot loop.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use janus_kv::Kv;
use janus_protocol::{CanonicalEvent, DeliveryJob, Platform, SourceRef, TargetRef};

use crate::breaker::{BreakerRegistry, CallFailure};
use crate::clock;
use crate::config::Config;
use crate::loop_filter::LoopFilter;
use crate::platform::{Impersonation, NativeMessage, PlatformRegistry, WebhookMessage};
use crate::queue::{JobHandler, JobOutcome};
use crate::rate_limit::RateLimiter;
use crate::repo::{BridgePair, BridgeRepo, MessageMapEntry, MessageMapRepo};

// ---------------------------------------------------------------------------
// Settings and helpers
// ---------------------------------------------------------------------------

/// The delivery-side slice of the configuration.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub web_base_url_a: String,
    pub web_base_url_b: String,
    pub edit_update_ttl_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            web_base_url_a: "https://a.app".to_owned(),
            web_base_url_b: "https://b.app".to_owned(),
            edit_update_ttl_secs: 604_800,
        }
    }
}

impl DeliverySettings {
    pub fn from_config(cfg: &Config) -> Self {
        DeliverySettings {
            web_base_url_a: cfg.web_base_url_a.clone(),
            web_base_url_b: cfg.web_base_url_b.clone(),
            edit_update_ttl_secs: cfg.edit_update_ttl_secs,
        }
    }
}

/// Message body actually sent to the destination: trimmed content with
/// attachment URLs appended one per line (re-upload is out of scope).
pub fn outbound_content(event: &CanonicalEvent) -> String {
    let mut out = event.content.trim().to_owned();
    for attachment in &event.attachments {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&attachment.url);
    }
    out
}

/// Web URL of a destination message, used by the edit-workaround.
pub fn jump_link(
    web_base: &str,
    guild_id: Option<&str>,
    channel_id: &str,
    message_id: &str,
) -> String {
    format!(
        "{}/channels/{}/{}/{}",
        web_base.trim_end_matches('/'),
        guild_id.unwrap_or("@me"),
        channel_id,
        message_id
    )
}

/// KV key tracking the latest edit-workaround post for a source message.
pub fn edit_update_key(pair_id: Uuid, source_platform: Platform, source_msg_id: &str) -> String {
    format!(
        "janus:edit-update:{}:{}:{}",
        pair_id, source_platform, source_msg_id
    )
}

fn breaker_name(platform: Platform, operation: &str) -> String {
    format!("{}:{}", platform, operation)
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

pub struct DeliveryHandler {
    kv: Arc<dyn Kv>,
    bridges: Arc<dyn BridgeRepo>,
    messages: Arc<dyn MessageMapRepo>,
    registry: PlatformRegistry,
    loop_filter: LoopFilter,
    rate_limiter: RateLimiter,
    breakers: Arc<BreakerRegistry>,
    settings: DeliverySettings,
}

impl DeliveryHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<dyn Kv>,
        bridges: Arc<dyn BridgeRepo>,
        messages: Arc<dyn MessageMapRepo>,
        registry: PlatformRegistry,
        loop_filter: LoopFilter,
        rate_limiter: RateLimiter,
        breakers: Arc<BreakerRegistry>,
        settings: DeliverySettings,
    ) -> Self {
        DeliveryHandler {
            kv,
            bridges,
            messages,
            registry,
            loop_filter,
            rate_limiter,
            breakers,
            settings,
        }
    }

    fn web_base(&self, platform: Platform) -> &str {
        match platform {
            Platform::A => &self.settings.web_base_url_a,
            Platform::B => &self.settings.web_base_url_b,
        }
    }
}

#[async_trait]
impl JobHandler for DeliveryHandler {
    type Job = DeliveryJob;

    async fn handle(&self, job: DeliveryJob) -> JobOutcome {
        let target = job.target().clone();

        match self
            .rate_limiter
            .allow(target.platform, &target.channel_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return match self
                    .rate_limiter
                    .delay_ms(target.platform, &target.channel_id)
                    .await
                {
                    Ok(ms) => JobOutcome::RetryIn(Duration::from_millis(ms.max(1))),
                    Err(e) => JobOutcome::Fail(format!("rate limiter: {e}")),
                };
            }
            Err(e) => return JobOutcome::Fail(format!("rate limiter: {e}")),
        }

        // Reload the pair: repair may have filled credentials since the
        // router snapshotted them. A deleted pair drops its queued jobs.
        let pair = match self.bridges.fetch(job.pair_id()).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                debug!(pair_id = %job.pair_id(), "bridge pair gone, dropping job");
                return JobOutcome::Complete;
            }
            Err(e) => return JobOutcome::Fail(format!("pair lookup: {e}")),
        };

        match &job {
            DeliveryJob::CreateWithWebhook { event, .. }
            | DeliveryJob::CreateFallback { event, .. } => {
                self.deliver_create(&pair, event, &target).await
            }
            DeliveryJob::UpdateDirect { event, .. } => {
                self.deliver_update_direct(&pair, event, &target).await
            }
            DeliveryJob::UpdateWorkaround { event, .. } => {
                self.deliver_update_workaround(&pair, event, &target).await
            }
            DeliveryJob::Delete { event, .. } => self.deliver_delete(&pair, event, &target).await,
        }
    }
}

impl DeliveryHandler {
    // -----------------------------------------------------------------------
    // MSG_CREATE
    // -----------------------------------------------------------------------

    async fn deliver_create(
        &self,
        pair: &BridgePair,
        event: &CanonicalEvent,
        target: &TargetRef,
    ) -> JobOutcome {
        let content = outbound_content(event);
        if content.is_empty() {
            debug!(pair_id = %pair.id, "empty message with no attachments, dropping");
            return JobOutcome::Complete;
        }

        let adapter = self.registry.get(target.platform);
        let dest_msg_id = match pair.webhook(target.platform) {
            Some(creds) => {
                let message = WebhookMessage {
                    content: content.clone(),
                    username: event.author.name.clone(),
                    avatar_url: event.author.avatar.clone(),
                    channel_id: Some(target.channel_id.clone()),
                };
                match self
                    .breakers
                    .guarded(
                        &breaker_name(target.platform, "webhook-send"),
                        adapter.send_webhook(creds, &message),
                    )
                    .await
                {
                    Ok(captured) => captured,
                    Err(failure) => {
                        return self.failure_outcome(failure, pair.id, &event.source).await
                    }
                }
            }
            None => {
                // No impersonating webhook on this side: best-effort
                // impersonation through the native send.
                let message = NativeMessage {
                    content: content.clone(),
                    impersonate: Some(Impersonation {
                        name: event.author.name.clone(),
                        avatar_url: event.author.avatar.clone(),
                    }),
                };
                match self
                    .breakers
                    .guarded(
                        &breaker_name(target.platform, "send"),
                        adapter.send_message(&target.channel_id, &message),
                    )
                    .await
                {
                    Ok(id) => Some(id),
                    Err(failure) => {
                        return self.failure_outcome(failure, pair.id, &event.source).await
                    }
                }
            }
        };

        self.register_outgoing(&content, &event.author.name).await;

        match dest_msg_id {
            Some(dest_msg_id) => {
                let entry = MessageMapEntry {
                    pair_id: pair.id,
                    source_platform: event.source.platform,
                    source_msg_id: event.source.message_id.clone(),
                    dest_platform: target.platform,
                    dest_msg_id,
                };
                if let Err(e) = self.messages.insert(&entry).await {
                    // Retrying would re-post the message; a missing map row
                    // only downgrades later edits/deletes to no-ops.
                    warn!(pair_id = %pair.id, error = %e, "message map insert failed");
                }
            }
            None => {
                debug!(
                    pair_id = %pair.id,
                    source_msg_id = %event.source.message_id,
                    "no destination id captured, edits/deletes will not propagate"
                );
            }
        }
        JobOutcome::Complete
    }

    // -----------------------------------------------------------------------
    // MSG_UPDATE
    // -----------------------------------------------------------------------

    async fn deliver_update_direct(
        &self,
        pair: &BridgePair,
        event: &CanonicalEvent,
        target: &TargetRef,
    ) -> JobOutcome {
        let Some(entry) = (match self.lookup_entry(pair.id, &event.source).await {
            Ok(entry) => entry,
            Err(outcome) => return outcome,
        }) else {
            return JobOutcome::Complete;
        };

        let content = outbound_content(event);
        if content.is_empty() {
            return JobOutcome::Complete;
        }

        let adapter = self.registry.get(target.platform);
        let result = match pair.webhook(target.platform) {
            Some(creds) => {
                match self
                    .breakers
                    .guarded(
                        &breaker_name(target.platform, "webhook-edit"),
                        adapter.edit_webhook_message(creds, &entry.dest_msg_id, &content),
                    )
                    .await
                {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        warn!(
                            pair_id = %pair.id,
                            dest_msg_id = %entry.dest_msg_id,
                            "platform refused webhook edit, update dropped"
                        );
                        return JobOutcome::Complete;
                    }
                    Err(failure) => Err(failure),
                }
            }
            None => {
                self.breakers
                    .guarded(
                        &breaker_name(target.platform, "edit"),
                        adapter.edit_message(&target.channel_id, &entry.dest_msg_id, &content),
                    )
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.register_outgoing(&content, &event.author.name).await;
                JobOutcome::Complete
            }
            Err(failure) => self.failure_outcome(failure, pair.id, &event.source).await,
        }
    }

    async fn deliver_update_workaround(
        &self,
        pair: &BridgePair,
        event: &CanonicalEvent,
        target: &TargetRef,
    ) -> JobOutcome {
        let Some(entry) = (match self.lookup_entry(pair.id, &event.source).await {
            Ok(entry) => entry,
            Err(outcome) => return outcome,
        }) else {
            return JobOutcome::Complete;
        };

        let content = outbound_content(event);
        if content.is_empty() {
            return JobOutcome::Complete;
        }

        let url = jump_link(
            self.web_base(target.platform),
            target.guild_id.as_deref(),
            &target.channel_id,
            &entry.dest_msg_id,
        );
        let body = format!("{content}\n-# [Jump to original message]({url})");

        let adapter = self.registry.get(target.platform);
        let new_msg_id = match pair.webhook(target.platform) {
            Some(creds) => {
                let message = WebhookMessage {
                    content: body.clone(),
                    username: event.author.name.clone(),
                    avatar_url: event.author.avatar.clone(),
                    channel_id: Some(target.channel_id.clone()),
                };
                match self
                    .breakers
                    .guarded(
                        &breaker_name(target.platform, "webhook-send"),
                        adapter.send_webhook(creds, &message),
                    )
                    .await
                {
                    Ok(captured) => captured,
                    Err(failure) => {
                        return self.failure_outcome(failure, pair.id, &event.source).await
                    }
                }
            }
            None => {
                let message = NativeMessage {
                    content: body.clone(),
                    impersonate: Some(Impersonation {
                        name: event.author.name.clone(),
                        avatar_url: event.author.avatar.clone(),
                    }),
                };
                match self
                    .breakers
                    .guarded(
                        &breaker_name(target.platform, "send"),
                        adapter.send_message(&target.channel_id, &message),
                    )
                    .await
                {
                    Ok(id) => Some(id),
                    Err(failure) => {
                        return self.failure_outcome(failure, pair.id, &event.source).await
                    }
                }
            }
        };

        self.register_outgoing(&body, &event.author.name).await;

        if let Some(new_msg_id) = new_msg_id {
            // Swap the tracker and retire the previous workaround post.
            let key = edit_update_key(pair.id, event.source.platform, &event.source.message_id);
            match self
                .kv
                .get_set_ex(&key, &new_msg_id, self.settings.edit_update_ttl_secs)
                .await
            {
                Ok(Some(previous)) if previous != new_msg_id => {
                    self.best_effort_delete(pair, target, &previous).await;
                }
                Ok(_) => {}
                Err(e) => warn!(pair_id = %pair.id, error = %e, "edit-update tracker swap failed"),
            }
        }
        JobOutcome::Complete
    }

    // -----------------------------------------------------------------------
    // MSG_DELETE
    // -----------------------------------------------------------------------

    async fn deliver_delete(
        &self,
        pair: &BridgePair,
        event: &CanonicalEvent,
        target: &TargetRef,
    ) -> JobOutcome {
        let Some(entry) = (match self.lookup_entry(pair.id, &event.source).await {
            Ok(entry) => entry,
            Err(outcome) => return outcome,
        }) else {
            return JobOutcome::Complete;
        };

        let adapter = self.registry.get(target.platform);
        let result = match pair.webhook(target.platform) {
            Some(creds) => self
                .breakers
                .guarded(
                    &breaker_name(target.platform, "webhook-delete"),
                    adapter.delete_webhook_message(creds, &entry.dest_msg_id),
                )
                .await
                .map(|_| ()),
            None => {
                self.breakers
                    .guarded(
                        &breaker_name(target.platform, "delete"),
                        adapter.delete_message(&target.channel_id, &entry.dest_msg_id),
                    )
                    .await
            }
        };
        match result {
            Ok(()) => {}
            Err(CallFailure::RateLimited { retry_after_ms }) => {
                return JobOutcome::RetryIn(Duration::from_millis(retry_after_ms.max(1)));
            }
            Err(CallFailure::Retryable(msg)) => return JobOutcome::Fail(msg),
            Err(CallFailure::Permanent(msg)) => {
                // Destination already gone; finish the cleanup anyway.
                debug!(pair_id = %pair.id, reason = %msg, "destination message already gone");
            }
            Err(CallFailure::Unsupported) => {
                warn!(pair_id = %pair.id, "platform cannot delete messages");
            }
        }

        // Retire any edit-workaround post tracking this source message.
        let key = edit_update_key(pair.id, event.source.platform, &event.source.message_id);
        match self.kv.get(&key).await {
            Ok(Some(update_msg_id)) => {
                self.best_effort_delete(pair, target, &update_msg_id).await;
                if let Err(e) = self.kv.del(&key).await {
                    warn!(pair_id = %pair.id, error = %e, "edit-update tracker cleanup failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(pair_id = %pair.id, error = %e, "edit-update tracker lookup failed"),
        }

        match self
            .messages
            .remove(pair.id, event.source.platform, &event.source.message_id)
            .await
        {
            Ok(_) => JobOutcome::Complete,
            Err(e) => JobOutcome::Fail(format!("message map remove: {e}")),
        }
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    /// Message-map lookup shared by update/delete. `Ok(None)` means the
    /// original create was never bridged: the job is silently dropped.
    async fn lookup_entry(
        &self,
        pair_id: Uuid,
        source: &SourceRef,
    ) -> Result<Option<MessageMapEntry>, JobOutcome> {
        match self
            .messages
            .fetch(pair_id, source.platform, &source.message_id)
            .await
        {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                debug!(
                    pair_id = %pair_id,
                    source_msg_id = %source.message_id,
                    "no message map entry, dropping"
                );
                Ok(None)
            }
            Err(e) => Err(JobOutcome::Fail(format!("message map lookup: {e}"))),
        }
    }

    async fn register_outgoing(&self, content: &str, author_name: &str) {
        if let Err(e) = self
            .loop_filter
            .register(content, author_name, clock::now_ms())
            .await
        {
            warn!(error = %e, "loop filter registration failed");
        }
    }

    /// Map a platform-call failure to the job outcome, removing the
    /// message map row on permanent refusals so retries cannot loop.
    async fn failure_outcome(
        &self,
        failure: CallFailure,
        pair_id: Uuid,
        source: &SourceRef,
    ) -> JobOutcome {
        match failure {
            CallFailure::RateLimited { retry_after_ms } => {
                JobOutcome::RetryIn(Duration::from_millis(retry_after_ms.max(1)))
            }
            CallFailure::Retryable(msg) => JobOutcome::Fail(msg),
            CallFailure::Permanent(msg) => {
                match self
                    .messages
                    .remove(pair_id, source.platform, &source.message_id)
                    .await
                {
                    Ok(true) => {
                        debug!(pair_id = %pair_id, "removed message map row after permanent refusal");
                    }
                    Ok(false) => {}
                    Err(e) => warn!(pair_id = %pair_id, error = %e, "message map cleanup failed"),
                }
                warn!(pair_id = %pair_id, reason = %msg, "permanent platform refusal, job completed");
                JobOutcome::Complete
            }
            CallFailure::Unsupported => {
                warn!(pair_id = %pair_id, "operation unsupported by platform, job completed");
                JobOutcome::Complete
            }
        }
    }

    /// Delete a destination message, logging failures instead of
    /// propagating them.
    async fn best_effort_delete(&self, pair: &BridgePair, target: &TargetRef, message_id: &str) {
        let adapter = self.registry.get(target.platform);
        let result = match pair.webhook(target.platform) {
            Some(creds) => self
                .breakers
                .guarded(
                    &breaker_name(target.platform, "webhook-delete"),
                    adapter.delete_webhook_message(creds, message_id),
                )
                .await
                .map(|_| ()),
            None => {
                self.breakers
                    .guarded(
                        &breaker_name(target.platform, "delete"),
                        adapter.delete_message(&target.channel_id, message_id),
                    )
                    .await
            }
        };
        if let Err(failure) = result {
            warn!(
                pair_id = %pair.id,
                message_id = %message_id,
                error = %failure,
                "best-effort delete failed"
            );
        }
    }
}
