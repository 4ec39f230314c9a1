//! In-memory scriptable adapter.
//!
//! Records every outbound call and replays scripted results, so worker
//! behavior can be asserted without a platform. Used across the delivery,
//! bridge-store, and supervisor test suites; also handy as a dry-run
//! adapter in local development.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use janus_protocol::{Platform, WebhookCredentials};

use super::{
    InboundEvent, NativeMessage, PlatformAdapter, PlatformError, WebhookMessage,
};

/// Everything an adapter was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Connect,
    Disconnect,
    CreateWebhook {
        channel_id: String,
        name: String,
    },
    FetchWebhook {
        channel_id: String,
    },
    WebhookSend {
        webhook_id: String,
        message: WebhookMessage,
    },
    WebhookEdit {
        webhook_id: String,
        message_id: String,
        content: String,
    },
    WebhookDelete {
        webhook_id: String,
        message_id: String,
    },
    NativeSend {
        channel_id: String,
        message: NativeMessage,
    },
    NativeEdit {
        channel_id: String,
        message_id: String,
        content: String,
    },
    NativeDelete {
        channel_id: String,
        message_id: String,
    },
}

/// Scriptable recording double for [`PlatformAdapter`].
pub struct RecordingAdapter {
    platform: Platform,
    webhook_edits_supported: bool,
    calls: Mutex<Vec<AdapterCall>>,
    counter: AtomicU64,
    events: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    webhook_send_script: Mutex<VecDeque<Result<Option<String>, PlatformError>>>,
    native_send_script: Mutex<VecDeque<Result<String, PlatformError>>>,
    webhook_edit_script: Mutex<VecDeque<Result<bool, PlatformError>>>,
    webhook_delete_script: Mutex<VecDeque<Result<bool, PlatformError>>>,
    native_edit_script: Mutex<VecDeque<Result<(), PlatformError>>>,
    native_delete_script: Mutex<VecDeque<Result<(), PlatformError>>>,
    create_webhook_script: Mutex<VecDeque<Result<Option<WebhookCredentials>, PlatformError>>>,
}

impl RecordingAdapter {
    /// Platform A semantics: webhook edits supported.
    pub fn platform_a() -> Self {
        Self::new(Platform::A, true)
    }

    /// Platform B semantics: no webhook edits (edit-workaround applies).
    pub fn platform_b() -> Self {
        Self::new(Platform::B, false)
    }

    pub fn new(platform: Platform, webhook_edits_supported: bool) -> Self {
        RecordingAdapter {
            platform,
            webhook_edits_supported,
            calls: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            events: Mutex::new(None),
            webhook_send_script: Mutex::new(VecDeque::new()),
            native_send_script: Mutex::new(VecDeque::new()),
            webhook_edit_script: Mutex::new(VecDeque::new()),
            webhook_delete_script: Mutex::new(VecDeque::new()),
            native_edit_script: Mutex::new(VecDeque::new()),
            native_delete_script: Mutex::new(VecDeque::new()),
            create_webhook_script: Mutex::new(VecDeque::new()),
        }
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Emit an inbound gateway event, as a connected transport would.
    pub async fn emit(&self, event: InboundEvent) {
        let sender = self.events.lock().unwrap().clone();
        if let Some(tx) = sender {
            let _ = tx.send(event).await;
        }
    }

    // Script the next result for one operation (queued FIFO).
    pub fn script_webhook_send(&self, result: Result<Option<String>, PlatformError>) {
        self.webhook_send_script.lock().unwrap().push_back(result);
    }

    pub fn script_native_send(&self, result: Result<String, PlatformError>) {
        self.native_send_script.lock().unwrap().push_back(result);
    }

    pub fn script_webhook_edit(&self, result: Result<bool, PlatformError>) {
        self.webhook_edit_script.lock().unwrap().push_back(result);
    }

    pub fn script_webhook_delete(&self, result: Result<bool, PlatformError>) {
        self.webhook_delete_script.lock().unwrap().push_back(result);
    }

    pub fn script_native_edit(&self, result: Result<(), PlatformError>) {
        self.native_edit_script.lock().unwrap().push_back(result);
    }

    pub fn script_native_delete(&self, result: Result<(), PlatformError>) {
        self.native_delete_script.lock().unwrap().push_back(result);
    }

    pub fn script_create_webhook(
        &self,
        result: Result<Option<WebhookCredentials>, PlatformError>,
    ) {
        self.create_webhook_script.lock().unwrap().push_back(result);
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}-{}", self.platform, prefix, n)
    }
}

#[async_trait]
impl PlatformAdapter for RecordingAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn supports_webhook_edits(&self) -> bool {
        self.webhook_edits_supported
    }

    async fn connect(
        &self,
        _token: &str,
        events: mpsc::Sender<InboundEvent>,
    ) -> Result<(), PlatformError> {
        self.record(AdapterCall::Connect);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        self.record(AdapterCall::Disconnect);
        *self.events.lock().unwrap() = None;
        Ok(())
    }

    async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        self.record(AdapterCall::CreateWebhook {
            channel_id: channel_id.to_owned(),
            name: name.to_owned(),
        });
        if let Some(scripted) = self.create_webhook_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(Some(WebhookCredentials {
            id: self.next_id("wh"),
            token: self.next_id("whtok"),
        }))
    }

    async fn fetch_webhook(
        &self,
        channel_id: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        self.record(AdapterCall::FetchWebhook {
            channel_id: channel_id.to_owned(),
        });
        Ok(None)
    }

    async fn send_webhook(
        &self,
        webhook: &WebhookCredentials,
        message: &WebhookMessage,
    ) -> Result<Option<String>, PlatformError> {
        self.record(AdapterCall::WebhookSend {
            webhook_id: webhook.id.clone(),
            message: message.clone(),
        });
        if let Some(scripted) = self.webhook_send_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(Some(self.next_id("msg")))
    }

    async fn edit_webhook_message(
        &self,
        webhook: &WebhookCredentials,
        message_id: &str,
        content: &str,
    ) -> Result<bool, PlatformError> {
        self.record(AdapterCall::WebhookEdit {
            webhook_id: webhook.id.clone(),
            message_id: message_id.to_owned(),
            content: content.to_owned(),
        });
        if let Some(scripted) = self.webhook_edit_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(self.webhook_edits_supported)
    }

    async fn delete_webhook_message(
        &self,
        webhook: &WebhookCredentials,
        message_id: &str,
    ) -> Result<bool, PlatformError> {
        self.record(AdapterCall::WebhookDelete {
            webhook_id: webhook.id.clone(),
            message_id: message_id.to_owned(),
        });
        if let Some(scripted) = self.webhook_delete_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(true)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &NativeMessage,
    ) -> Result<String, PlatformError> {
        self.record(AdapterCall::NativeSend {
            channel_id: channel_id.to_owned(),
            message: message.clone(),
        });
        if let Some(scripted) = self.native_send_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(self.next_id("msg"))
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.record(AdapterCall::NativeEdit {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
            content: content.to_owned(),
        });
        if let Some(scripted) = self.native_edit_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        self.record(AdapterCall::NativeDelete {
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
        });
        if let Some(scripted) = self.native_delete_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(())
    }
}
