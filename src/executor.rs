use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::collaborators::{Collaborators, NewTask};
use crate::error::CollaboratorError;
use crate::event::Event;
use crate::rule::{Action, Rule};
use crate::template::{Template, TemplateContext};

/// Timeout and bounded exponential backoff applied to every collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            timeout_seconds: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based: the delay after the first failure).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    /// No collaborator was called.
    Skipped,
}

/// What happened when one action ran. Outcomes are independent of each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub rule_id: String,
    pub action: &'static str,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub detail: String,
    pub warnings: Vec<String>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}

/// Dispatches actions to collaborators. Holds no state beyond its configuration.
#[derive(Clone)]
pub struct ActionExecutor {
    collaborators: Collaborators,
    retry: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(collaborators: Collaborators, retry: RetryPolicy) -> Self {
        Self {
            collaborators,
            retry,
        }
    }

    pub async fn execute(&self, action: &Action, event: &Event, rule: &Rule) -> ActionOutcome {
        let context = TemplateContext {
            event,
            rule_id: &rule.id,
            rule_name: &rule.name,
        };
        let mut warnings = Vec::new();
        let mut render = |template: &Template| -> String {
            let rendered = template.render(&context);
            for variable in rendered.unresolved {
                let warning = format!(
                    "unresolved template variable '{{{{{variable}}}}}' in {} action of rule '{}'",
                    action.kind(),
                    rule.id
                );
                log::warn!("{warning} (event {})", event.id);
                warnings.push(warning);
            }
            rendered.text
        };

        let c = &self.collaborators;
        let (result, attempts) = match action {
            Action::AddTag(tag) => {
                let tag = tag.as_str();
                self.with_retry(|| c.timeline.add_tag(&event.id, tag))
                    .await
                    .map_ok(|_| format!("tagged '{tag}'"))
            }
            Action::NotifySlack { channel, message } => {
                let message = render(message);
                self.with_retry(|| c.messenger.notify(channel, &message))
                    .await
                    .map_ok(|_| format!("notified {channel}"))
            }
            Action::CreateTask {
                title,
                due,
                priority,
            } => {
                let task = NewTask {
                    title: render(title),
                    due: due.as_ref().map(|offset| offset.apply(event.timestamp)),
                    priority: *priority,
                    source_event: event.id.clone(),
                };
                self.with_retry(|| c.tasks.create_task(&task))
                    .await
                    .map_ok(|id| format!("created task {id}"))
            }
            Action::PushToCrm { fields } => {
                let rendered: BTreeMap<String, String> = fields
                    .iter()
                    .map(|(name, template)| (name.clone(), render(template)))
                    .collect();
                self.with_retry(|| c.crm.push(&event.id, &rendered))
                    .await
                    .map_ok(|_| format!("pushed {} field(s) to CRM", rendered.len()))
            }
            Action::CalendarReminder { offset, message } => {
                let message = render(message);
                let at = offset.apply(event.timestamp);
                self.with_retry(|| c.calendar.remind(at, &message))
                    .await
                    .map_ok(|_| format!("reminder at {}", at.to_rfc3339()))
            }
            Action::Archive => self
                .with_retry(|| c.timeline.archive(&event.id))
                .await
                .map_ok(|_| "archived".to_string()),
            Action::SkipProcessing => {
                log::debug!("Rule '{}' stops propagation of event {}", rule.id, event.id);
                return ActionOutcome {
                    rule_id: rule.id.clone(),
                    action: action.kind(),
                    status: OutcomeStatus::Skipped,
                    attempts: 0,
                    detail: "event will not propagate".to_string(),
                    warnings: Vec::new(),
                };
            }
            Action::Log(message) => {
                let message = render(message);
                c.log.log(&message);
                (Ok(message), 1)
            }
        };

        match result {
            Ok(detail) => {
                log::debug!(
                    "Action {} for rule '{}' on event {} succeeded: {detail}",
                    action.kind(),
                    rule.id,
                    event.id
                );
                ActionOutcome {
                    rule_id: rule.id.clone(),
                    action: action.kind(),
                    status: OutcomeStatus::Succeeded,
                    attempts,
                    detail,
                    warnings,
                }
            }
            Err(e) => {
                log::error!(
                    "Action {} for rule '{}' on event {} failed after {attempts} attempt(s): {e}",
                    action.kind(),
                    rule.id,
                    event.id
                );
                ActionOutcome {
                    rule_id: rule.id.clone(),
                    action: action.kind(),
                    status: OutcomeStatus::Failed,
                    attempts,
                    detail: e.to_string(),
                    warnings,
                }
            }
        }
    }

    /// Run `call` under the timeout, retrying retryable failures with backoff.
    /// Returns the final result and the number of attempts made.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> (Result<T, CollaboratorError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let timeout = Duration::from_secs(self.retry.timeout_seconds.max(1));
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(timeout.as_secs())),
            };

            match result {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    log::warn!(
                        "Collaborator call failed (attempt {attempt}/{max_attempts}): {e}; retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

trait MapOk<T> {
    fn map_ok<U>(self, f: impl FnOnce(T) -> U) -> (Result<U, CollaboratorError>, u32);
}

impl<T> MapOk<T> for (Result<T, CollaboratorError>, u32) {
    fn map_ok<U>(self, f: impl FnOnce(T) -> U) -> (Result<U, CollaboratorError>, u32) {
        (self.0.map(f), self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryRecorder, Recorded};
    use crate::event::{Channel, Contact};
    use crate::rule::Priority;
    use crate::template::Offset;
    use std::sync::Arc;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            timeout_seconds: 1,
        }
    }

    fn setup() -> (ActionExecutor, Arc<MemoryRecorder>) {
        let (collaborators, recorder) = Collaborators::in_memory();
        (ActionExecutor::new(collaborators, fast_retry()), recorder)
    }

    fn event() -> Event {
        Event::new("evt-1", Channel::Email, "sarah@techcorp.com", "intro")
            .with_timestamp("2024-05-01T10:00:00Z".parse().unwrap())
            .with_contact(Contact {
                name: "Sarah Chen".to_string(),
                title: None,
                company: Some("TechCorp Inc.".to_string()),
            })
    }

    #[test]
    fn test_backoff_is_bounded_exponential() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_skip_processing_is_skipped_without_calls() {
        let (executor, recorder) = setup();
        let rule = Rule::new("Quiet");

        let outcome = executor
            .execute(&Action::SkipProcessing, &event(), &rule)
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.attempts, 0);
        assert!(!outcome.succeeded());
        assert!(!outcome.failed());
        assert!(recorder.records().is_empty());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap()["status"],
            "skipped"
        );
    }

    #[tokio::test]
    async fn test_create_task_renders_title_and_due() {
        let (executor, recorder) = setup();
        let rule = Rule::new("Intros");
        let action = Action::CreateTask {
            title: Template::parse("Process intro from {{contact_name}}").unwrap(),
            due: Some(Offset::parse("+2 hours").unwrap()),
            priority: Priority::High,
        };

        let outcome = executor.execute(&action, &event(), &rule).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.detail, "created task task-1");

        match &recorder.records()[0] {
            Recorded::TaskCreated { task, .. } => {
                assert_eq!(task.title, "Process intro from Sarah Chen");
                assert_eq!(
                    task.due.unwrap().to_rfc3339(),
                    "2024-05-01T12:00:00+00:00"
                );
                assert_eq!(task.priority, Priority::High);
            }
            other => panic!("Expected task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_crm_failure_is_retried_then_reported() {
        let (executor, recorder) = setup();
        recorder.fail_crm(10);
        let rule = Rule::new("CRM");
        let action = Action::PushToCrm {
            fields: BTreeMap::from([(
                "contact".to_string(),
                Template::parse("{{contact_name}}").unwrap(),
            )]),
        };

        let outcome = executor.execute(&action, &event(), &rule).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(recorder.crm_calls(), 3);
        assert!(outcome.detail.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let (executor, recorder) = setup();
        recorder.fail_messenger(1);
        let rule = Rule::new("Notify");
        let action = Action::NotifySlack {
            channel: "#intros".to_string(),
            message: Template::parse("Intro from {{contact_name}}").unwrap(),
        };

        let outcome = executor.execute(&action, &event(), &rule).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            recorder.records(),
            vec![Recorded::Notified {
                channel: "#intros".to_string(),
                message: "Intro from Sarah Chen".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_slow_collaborator_times_out() {
        let (collaborators, recorder) = Collaborators::in_memory();
        let executor = ActionExecutor::new(
            collaborators,
            RetryPolicy {
                max_attempts: 1,
                timeout_seconds: 1,
                ..fast_retry()
            },
        );
        recorder.delay_crm(Duration::from_millis(1_500));
        let action = Action::PushToCrm {
            fields: BTreeMap::from([("k".to_string(), Template::parse("v").unwrap())]),
        };

        let outcome = executor.execute(&action, &event(), &Rule::new("Slow")).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.detail.contains("Timed out"));
    }

    #[tokio::test]
    async fn test_unresolved_variable_is_a_warning() {
        let (executor, recorder) = setup();
        let anonymous = Event::new("evt-2", Channel::Slack, "marcus", "hello");
        let action = Action::Log(Template::parse("Ping from {{contact_name}}").unwrap());

        let outcome = executor.execute(&action, &anonymous, &Rule::new("Log")).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("{{contact_name}}"));
        assert_eq!(
            recorder.records(),
            vec![Recorded::Logged("Ping from ".to_string())]
        );
    }
}
