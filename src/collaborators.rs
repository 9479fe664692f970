use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::CollaboratorError;
use crate::rule::Priority;

pub type TaskId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub due: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub source_event: String,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &NewTask) -> Result<TaskId, CollaboratorError>;
}

#[async_trait]
pub trait CrmConnector: Send + Sync {
    async fn push(
        &self,
        event_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Calendar: Send + Sync {
    async fn remind(&self, at: DateTime<Utc>, message: &str) -> Result<(), CollaboratorError>;
}

/// Tags and archive state of timeline events live outside the engine.
#[async_trait]
pub trait Timeline: Send + Sync {
    async fn add_tag(&self, event_id: &str, tag: &str) -> Result<(), CollaboratorError>;
    async fn archive(&self, event_id: &str) -> Result<(), CollaboratorError>;
}

pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// The full set of side-effect targets handed to the executor.
#[derive(Clone)]
pub struct Collaborators {
    pub messenger: Arc<dyn Messenger>,
    pub tasks: Arc<dyn TaskStore>,
    pub crm: Arc<dyn CrmConnector>,
    pub calendar: Arc<dyn Calendar>,
    pub timeline: Arc<dyn Timeline>,
    pub log: Arc<dyn LogSink>,
}

impl Collaborators {
    /// Everything recorded in memory; used by the replay tool and tests.
    pub fn in_memory() -> (Self, Arc<MemoryRecorder>) {
        let recorder = Arc::new(MemoryRecorder::default());
        let collaborators = Self {
            messenger: recorder.clone(),
            tasks: recorder.clone(),
            crm: recorder.clone(),
            calendar: recorder.clone(),
            timeline: recorder.clone(),
            log: recorder.clone(),
        };
        (collaborators, recorder)
    }
}

/// Routes log actions through the `log` facade.
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn log(&self, message: &str) {
        log::info!(target: "recipe_engine::actions", "{message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Notified { channel: String, message: String },
    TaskCreated { id: TaskId, task: NewTask },
    CrmPushed { event_id: String, fields: BTreeMap<String, String> },
    Reminder { at: DateTime<Utc>, message: String },
    Tagged { event_id: String, tag: String },
    Archived { event_id: String },
    Logged(String),
}

/// In-memory implementation of every collaborator. Individual collaborators can be
/// told to fail a number of times to exercise retry and partial-failure paths.
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<Recorded>>,
    next_task: AtomicU64,
    crm_failures: AtomicUsize,
    messenger_failures: AtomicUsize,
    crm_calls: AtomicUsize,
    crm_delay_ms: AtomicU64,
}

impl MemoryRecorder {
    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Make the next `count` CRM pushes fail with a network error.
    pub fn fail_crm(&self, count: usize) {
        self.crm_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_messenger(&self, count: usize) {
        self.messenger_failures.store(count, Ordering::SeqCst);
    }

    pub fn delay_crm(&self, delay: Duration) {
        self.crm_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn crm_calls(&self) -> usize {
        self.crm_calls.load(Ordering::SeqCst)
    }

    fn record(&self, entry: Recorded) {
        if let Ok(mut records) = self.records.lock() {
            records.push(entry);
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Messenger for MemoryRecorder {
    async fn notify(&self, channel: &str, message: &str) -> Result<(), CollaboratorError> {
        if Self::take_failure(&self.messenger_failures) {
            return Err(CollaboratorError::Network("messenger unavailable".to_string()));
        }
        self.record(Recorded::Notified {
            channel: channel.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryRecorder {
    async fn create_task(&self, task: &NewTask) -> Result<TaskId, CollaboratorError> {
        let id = format!("task-{}", self.next_task.fetch_add(1, Ordering::SeqCst) + 1);
        self.record(Recorded::TaskCreated {
            id: id.clone(),
            task: task.clone(),
        });
        Ok(id)
    }
}

#[async_trait]
impl CrmConnector for MemoryRecorder {
    async fn push(
        &self,
        event_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError> {
        self.crm_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.crm_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if Self::take_failure(&self.crm_failures) {
            return Err(CollaboratorError::Network("connection reset by CRM".to_string()));
        }
        self.record(Recorded::CrmPushed {
            event_id: event_id.to_string(),
            fields: fields.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl Calendar for MemoryRecorder {
    async fn remind(&self, at: DateTime<Utc>, message: &str) -> Result<(), CollaboratorError> {
        self.record(Recorded::Reminder {
            at,
            message: message.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Timeline for MemoryRecorder {
    async fn add_tag(&self, event_id: &str, tag: &str) -> Result<(), CollaboratorError> {
        self.record(Recorded::Tagged {
            event_id: event_id.to_string(),
            tag: tag.to_string(),
        });
        Ok(())
    }

    async fn archive(&self, event_id: &str) -> Result<(), CollaboratorError> {
        self.record(Recorded::Archived {
            event_id: event_id.to_string(),
        });
        Ok(())
    }
}

impl LogSink for MemoryRecorder {
    fn log(&self, message: &str) {
        self.record(Recorded::Logged(message.to_string()));
    }
}

/// Posts notifications to a Slack incoming webhook.
pub struct SlackWebhookMessenger {
    client: reqwest::Client,
    webhook_url: url::Url,
}

impl SlackWebhookMessenger {
    pub fn new(webhook_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let webhook_url = url::Url::parse(webhook_url)
            .map_err(|e| anyhow::anyhow!("Invalid Slack webhook URL '{webhook_url}': {e}"))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Messenger for SlackWebhookMessenger {
    async fn notify(&self, channel: &str, message: &str) -> Result<(), CollaboratorError> {
        let payload = serde_json::json!({ "channel": channel, "text": message });
        self.client
            .post(self.webhook_url.clone())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        log::debug!("Posted Slack notification to {channel}");
        Ok(())
    }
}

/// Pushes field maps as JSON to a CRM ingestion endpoint.
pub struct HttpCrmConnector {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpCrmConnector {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid CRM endpoint '{endpoint}': {e}"))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl CrmConnector for HttpCrmConnector {
    async fn push(
        &self,
        event_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError> {
        let payload = serde_json::json!({ "event_id": event_id, "fields": fields });
        self.client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
