//! Notification dispatch and delivery records
//!
//! The dispatcher receives requests over a bounded queue, fans them out to
//! every recipient on every configured channel, and records one row per
//! delivery attempt. The triggering state transition has already committed
//! by the time a request is enqueued.

use crate::channel::{ChannelKind, NotificationChannel, TracingChannel};
use crate::stage::{MessageContent, NotificationStage, StagePayload};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use signoff_core::{InstanceId, NotificationConfig, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A fan-out request enqueued by the engine
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub instance_id: InstanceId,
    pub stage: NotificationStage,
    pub recipients: Vec<UserId>,
    pub payload: StagePayload,
}

impl NotificationRequest {
    pub fn new(
        instance_id: InstanceId,
        stage: NotificationStage,
        recipients: Vec<UserId>,
        payload: StagePayload,
    ) -> Self {
        Self {
            instance_id,
            stage,
            recipients,
            payload,
        }
    }
}

/// One delivery attempt: (instance, recipient, channel, stage), write-once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub instance_id: InstanceId,
    pub recipient: UserId,
    pub channel: ChannelKind,
    pub stage: NotificationStage,
    pub subject: String,
    pub body: String,
    pub delivered: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Notification record storage
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn save(&self, record: &NotificationRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<NotificationRecord>>;

    async fn list_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<NotificationRecord>>;

    async fn list_for_recipient(&self, recipient: &UserId) -> Result<Vec<NotificationRecord>>;
}

/// In-memory notification store with per-instance indexing
pub struct InMemoryNotificationStore {
    records: DashMap<String, NotificationRecord>,
    by_instance: DashMap<InstanceId, Vec<String>>,
    total_count: RwLock<usize>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            by_instance: DashMap::new(),
            total_count: RwLock::new(0),
        }
    }

    pub fn count(&self) -> usize {
        *self.total_count.read()
    }
}

impl Default for InMemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn save(&self, record: &NotificationRecord) -> Result<()> {
        let is_new = !self.records.contains_key(&record.id);

        self.records.insert(record.id.clone(), record.clone());

        if is_new {
            self.by_instance
                .entry(record.instance_id)
                .or_default()
                .push(record.id.clone());

            let mut count = self.total_count.write();
            *count += 1;
        }

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<NotificationRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn list_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<NotificationRecord>> {
        let ids = self
            .by_instance
            .get(instance_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect())
    }

    async fn list_for_recipient(&self, recipient: &UserId) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| &r.recipient == recipient)
            .map(|r| r.clone())
            .collect())
    }
}

/// Fans requests out across recipients and channels
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    store: Arc<dyn NotificationStore>,
}

impl NotificationDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self { channels, store }
    }

    /// Log-only dispatcher wired from the configured channel names.
    /// Unknown names are dropped with a warning.
    pub fn from_config(config: &NotificationConfig, store: Arc<dyn NotificationStore>) -> Self {
        let channels = config
            .enabled_channels
            .iter()
            .filter_map(|name| match ChannelKind::parse(name) {
                Some(kind) => {
                    Some(Arc::new(TracingChannel::new(kind)) as Arc<dyn NotificationChannel>)
                }
                None => {
                    warn!(channel = %name, "Unknown notification channel in configuration");
                    None
                }
            })
            .collect();
        Self { channels, store }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Deliver one request to every recipient on every channel.
    ///
    /// Each attempt is independent: a failing channel produces a failed
    /// record and the fan-out continues.
    pub async fn dispatch(&self, request: &NotificationRequest) {
        let content = MessageContent::render(request.stage, &request.payload);

        debug!(
            instance_id = %request.instance_id,
            stage = %request.stage,
            recipients = request.recipients.len(),
            channels = self.channels.len(),
            "Dispatching notification"
        );

        for recipient in &request.recipients {
            for channel in &self.channels {
                let outcome = channel.deliver(recipient, &content).await;

                let record = NotificationRecord {
                    id: format!("ntf_{}", Uuid::new_v4().to_string().replace('-', "")),
                    instance_id: request.instance_id,
                    recipient: *recipient,
                    channel: channel.kind(),
                    stage: request.stage,
                    subject: content.subject.clone(),
                    body: content.body.clone(),
                    delivered: outcome.is_ok(),
                    error: outcome.as_ref().err().map(|e| e.to_string()),
                    created_at: Utc::now(),
                    delivered_at: outcome.is_ok().then(Utc::now),
                };

                if let Err(e) = &outcome {
                    warn!(
                        instance_id = %request.instance_id,
                        recipient = %recipient,
                        channel = channel.kind().as_str(),
                        stage = %request.stage,
                        error = %e,
                        "Notification delivery failed"
                    );
                }

                if let Err(e) = self.store.save(&record).await {
                    warn!(
                        instance_id = %request.instance_id,
                        error = %e,
                        "Failed to record notification attempt"
                    );
                }
            }
        }
    }
}

/// Bounded request queue between the engine and the dispatcher worker
pub fn notification_queue(
    config: &NotificationConfig,
) -> (
    mpsc::Sender<NotificationRequest>,
    mpsc::Receiver<NotificationRequest>,
) {
    mpsc::channel(config.queue_capacity)
}

/// Spawn the dispatcher worker draining the engine's queue.
///
/// The worker stops when every sender half has been dropped.
pub fn spawn_dispatcher(
    mut receiver: mpsc::Receiver<NotificationRequest>,
    dispatcher: Arc<NotificationDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Notification dispatcher started");

        while let Some(request) = receiver.recv().await {
            dispatcher.dispatch(&request).await;
        }

        info!("Notification dispatcher stopped");
    })
}
