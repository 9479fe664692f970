use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{
    Collaborators, HttpCrmConnector, LogFacadeSink, MemoryRecorder, SlackWebhookMessenger,
};
use crate::executor::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rules_path: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Quiet period before an editor change is saved. Read by applications that
    /// embed `editor::AutoSaver`; the binary itself never auto-saves.
    pub autosave_quiet_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_endpoint: Option<String>,
    pub statistics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rules_path: "/etc/recipe-engine/rules.yaml".to_string(),
            workers: 4,
            queue_capacity: 256,
            retry: RetryPolicy::default(),
            autosave_quiet_ms: 2000,
            slack_webhook_url: None,
            crm_endpoint: None,
            statistics_enabled: true,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!("retry.initial_backoff_ms must not exceed retry.max_backoff_ms");
        }
        if self.retry.timeout_seconds == 0 {
            bail!("retry.timeout_seconds must be at least 1");
        }
        for (field, value) in [
            ("slack_webhook_url", &self.slack_webhook_url),
            ("crm_endpoint", &self.crm_endpoint),
        ] {
            if let Some(value) = value {
                let parsed =
                    url::Url::parse(value).with_context(|| format!("{field} is not a valid URL"))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    bail!("{field} must use http or https, got '{}'", parsed.scheme());
                }
            }
        }
        Ok(())
    }

    /// Argument for `AutoSaver::spawn`.
    pub fn autosave_quiet(&self) -> Duration {
        Duration::from_millis(self.autosave_quiet_ms)
    }

    /// HTTP collaborators where endpoints are configured, in-memory ones elsewhere.
    /// Log actions always go to the `log` facade.
    pub fn build_collaborators(&self) -> anyhow::Result<(Collaborators, Arc<MemoryRecorder>)> {
        let (mut collaborators, recorder) = Collaborators::in_memory();
        let timeout = Duration::from_secs(self.retry.timeout_seconds);

        if let Some(url) = &self.slack_webhook_url {
            collaborators.messenger = Arc::new(SlackWebhookMessenger::new(url, timeout)?);
            log::info!("Slack notifications go to the configured webhook");
        }
        if let Some(endpoint) = &self.crm_endpoint {
            collaborators.crm = Arc::new(HttpCrmConnector::new(endpoint, timeout)?);
            log::info!("CRM pushes go to {endpoint}");
        }
        collaborators.log = Arc::new(LogFacadeSink);
        Ok((collaborators, recorder))
    }

    /// Collaborators for offline replay: everything in memory unless `live`.
    pub fn replay_collaborators(
        &self,
        live: bool,
    ) -> anyhow::Result<(Collaborators, Arc<MemoryRecorder>)> {
        if live {
            return self.build_collaborators();
        }
        if self.slack_webhook_url.is_some() || self.crm_endpoint.is_some() {
            log::info!("Configured endpoints are not called without --live");
        }
        Ok(Collaborators::in_memory())
    }
}
