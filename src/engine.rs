use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::error::EngineError;
use crate::event::Event;
use crate::executor::{ActionExecutor, ActionOutcome, OutcomeStatus};
use crate::loader::load_rules;
use crate::rule::{Action, Rule, RuleSet};
use crate::statistics::{StatEvent, StatisticsCollector};

/// One rule matching one event. Produced and consumed within a single pass.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub rule: &'a Rule,
    pub event: &'a Event,
    pub matched_trigger: usize,
}

/// Match an event against rules in declaration order. Every enabled rule is
/// evaluated; each contributes at most one result, for its first matching trigger.
pub fn match_event<'a>(event: &'a Event, rules: &'a [Rule]) -> Vec<MatchResult<'a>> {
    rules
        .iter()
        .filter(|rule| rule.enabled)
        .filter_map(|rule| {
            let matched_trigger = rule.first_matching_trigger(event);
            log::debug!(
                "Rule '{}' evaluation result for event {}: {}",
                rule.id,
                event.id,
                matched_trigger.is_some()
            );
            matched_trigger.map(|matched_trigger| MatchResult {
                rule,
                event,
                matched_trigger,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub event_id: String,
    pub matched_rules: Vec<String>,
    pub outcomes: Vec<ActionOutcome>,
    /// False when a matched rule asked for `skip_processing`.
    pub propagate: bool,
}

impl ProcessReport {
    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.failed())
    }
}

pub struct RuleEngine {
    rules: RwLock<Arc<RuleSet>>,
    executor: ActionExecutor,
    statistics: Option<Arc<StatisticsCollector>>,
}

impl RuleEngine {
    pub fn new(rules: RuleSet, executor: ActionExecutor) -> Self {
        log::info!(
            "Rule engine starting with {} rule(s), {} enabled",
            rules.len(),
            rules.enabled_count()
        );
        Self {
            rules: RwLock::new(Arc::new(rules)),
            executor,
            statistics: None,
        }
    }

    pub fn with_statistics(mut self, statistics: Arc<StatisticsCollector>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// The active rule set. Holding the snapshot keeps it alive across reloads.
    pub fn snapshot(&self) -> Result<Arc<RuleSet>, EngineError> {
        self.rules
            .read()
            .map(|rules| Arc::clone(&*rules))
            .map_err(|_| EngineError::Fault("rule set lock poisoned".to_string()))
    }

    /// Replace the whole rule set at once.
    pub fn reload(&self, rules: RuleSet) -> Result<(), EngineError> {
        let count = rules.len();
        let mut active = self
            .rules
            .write()
            .map_err(|_| EngineError::Fault("rule set lock poisoned".to_string()))?;
        *active = Arc::new(rules);
        log::info!("Rule set reloaded: {count} rule(s)");
        Ok(())
    }

    /// Parse recipe text and swap it in; the active set is untouched on any error.
    pub fn reload_from_text(&self, text: &str) -> Result<usize, EngineError> {
        let rules = load_rules(text).map_err(|errors| {
            log::warn!("Rejected rule set with {} error(s)", errors.len());
            EngineError::Invalid(errors)
        })?;
        let count = rules.len();
        self.reload(rules)?;
        Ok(count)
    }

    /// Enable or disable one rule by id. Returns false if no rule has that id.
    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<bool, EngineError> {
        let mut active = self
            .rules
            .write()
            .map_err(|_| EngineError::Fault("rule set lock poisoned".to_string()))?;
        let mut rules = active.rules().to_vec();
        let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) else {
            return Ok(false);
        };
        rule.enabled = enabled;
        *active = Arc::new(RuleSet::new(rules));
        log::info!(
            "Rule '{rule_id}' {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(true)
    }

    fn record(&self, event: StatEvent) {
        if let Some(statistics) = &self.statistics {
            statistics.record_event(event);
        }
    }

    /// Match an event and run the actions of every matched rule, rule by rule in
    /// declaration order. Action failures are reported in the outcomes, never raised.
    pub async fn process(&self, event: &Event) -> Result<ProcessReport, EngineError> {
        let rules = self.snapshot()?;
        let matches = match_event(event, rules.rules());

        let mut report = ProcessReport {
            event_id: event.id.clone(),
            matched_rules: Vec::with_capacity(matches.len()),
            outcomes: Vec::new(),
            propagate: true,
        };

        if matches.is_empty() {
            log::debug!("No rules matched event {}", event.id);
            self.record(StatEvent::NoRuleMatch);
        }

        for matched in &matches {
            let rule = matched.rule;
            log::info!(
                "Rule '{}' matched event {} via trigger {} ({}), running {} action(s)",
                rule.id,
                event.id,
                matched.matched_trigger,
                rule.triggers[matched.matched_trigger].channel,
                rule.actions.len()
            );
            self.record(StatEvent::RuleMatch {
                rule_id: rule.id.clone(),
            });
            report.matched_rules.push(rule.id.clone());

            for action in &rule.actions {
                if matches!(action, Action::SkipProcessing) {
                    report.propagate = false;
                }
                let outcome = self.executor.execute(action, matched.event, rule).await;
                if outcome.status != OutcomeStatus::Skipped {
                    self.record(StatEvent::ActionOutcome {
                        rule_id: rule.id.clone(),
                        succeeded: outcome.succeeded(),
                    });
                }
                report.outcomes.push(outcome);
            }
        }

        self.record(StatEvent::EventProcessed {
            propagated: report.propagate,
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, MemoryRecorder, Recorded};
    use crate::condition::Condition;
    use crate::event::Channel;
    use crate::executor::RetryPolicy;
    use crate::rule::Trigger;
    use crate::template::Template;

    fn engine_with(rules: RuleSet) -> (RuleEngine, Arc<MemoryRecorder>) {
        let (collaborators, recorder) = Collaborators::in_memory();
        let executor = ActionExecutor::new(
            collaborators,
            RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                timeout_seconds: 1,
            },
        );
        (RuleEngine::new(rules, executor), recorder)
    }

    fn logging_rule(name: &str, needle: &str) -> Rule {
        Rule::new(name)
            .with_trigger(Trigger::new(
                Channel::Email,
                vec![Condition::contains(&[needle])],
            ))
            .with_action(Action::Log(Template::parse(&format!("{name} fired")).unwrap()))
    }

    fn logged(recorder: &MemoryRecorder) -> Vec<String> {
        recorder
            .records()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Logged(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_at_most_one_match_per_rule() {
        let rule = Rule::new("Twice")
            .with_trigger(Trigger::new(Channel::Email, vec![]))
            .with_trigger(Trigger::new(
                Channel::Email,
                vec![Condition::contains(&["hello"])],
            ))
            .with_action(Action::Archive);
        let rules = vec![rule];
        let event = Event::new("1", Channel::Email, "a@b.com", "hello");

        let matches = match_event(&event, &rules);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_trigger, 0);
    }

    #[test]
    fn test_channel_must_match() {
        let rules = vec![logging_rule("Email only", "hello")];
        let slack = Event::new("1", Channel::Slack, "a@b.com", "hello");
        assert!(match_event(&slack, &rules).is_empty());
    }

    #[test]
    fn test_disabled_rule_does_not_affect_others() {
        let rules = vec![
            logging_rule("First", "hello"),
            logging_rule("Second", "hello").disabled(),
            logging_rule("Third", "hello"),
        ];
        let event = Event::new("1", Channel::Email, "a@b.com", "hello");

        let ids: Vec<&str> = match_event(&event, &rules)
            .iter()
            .map(|m| m.rule.id.as_str())
            .collect();
        assert_eq!(ids, vec!["first", "third"]);
    }

    #[tokio::test]
    async fn test_reordering_changes_action_order_not_match_set() {
        let event = Event::new("1", Channel::Email, "a@b.com", "hello world");

        let (engine, recorder) = engine_with(RuleSet::new(vec![
            logging_rule("Alpha", "hello"),
            logging_rule("Beta", "world"),
        ]));
        let report = engine.process(&event).await.unwrap();
        assert_eq!(logged(&recorder), vec!["Alpha fired", "Beta fired"]);

        let (reversed, reversed_recorder) = engine_with(RuleSet::new(vec![
            logging_rule("Beta", "world"),
            logging_rule("Alpha", "hello"),
        ]));
        let reversed_report = reversed.process(&event).await.unwrap();
        assert_eq!(logged(&reversed_recorder), vec!["Beta fired", "Alpha fired"]);

        let mut a = report.matched_rules.clone();
        let mut b = reversed_report.matched_rules.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_raise() {
        let rule = Rule::new("Sync")
            .with_trigger(Trigger::new(Channel::Email, vec![]))
            .with_action(Action::PushToCrm {
                fields: [("stage".to_string(), Template::parse("lead").unwrap())]
                    .into_iter()
                    .collect(),
            })
            .with_action(Action::AddTag("synced".to_string()));
        let (engine, recorder) = engine_with(RuleSet::new(vec![rule]));
        recorder.fail_crm(usize::MAX);

        let event = Event::new("e9", Channel::Email, "a@b.com", "hi");
        let report = engine.process(&event).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Succeeded);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(
            recorder.records(),
            vec![Recorded::Tagged {
                event_id: "e9".to_string(),
                tag: "synced".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_skip_processing_does_not_stop_later_rules() {
        let skipper = Rule::new("Skipper")
            .with_trigger(Trigger::new(Channel::Email, vec![]))
            .with_action(Action::SkipProcessing);
        let (engine, recorder) = engine_with(RuleSet::new(vec![
            skipper,
            logging_rule("After", "hi"),
        ]));

        let report = engine
            .process(&Event::new("1", Channel::Email, "a@b.com", "hi"))
            .await
            .unwrap();
        assert!(!report.propagate);
        assert_eq!(report.matched_rules, vec!["skipper", "after"]);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Skipped);
        assert_eq!(report.failures().count(), 0);
        assert_eq!(logged(&recorder), vec!["After fired"]);
    }

    #[tokio::test]
    async fn test_reload_is_all_or_nothing() {
        let (engine, _) = engine_with(RuleSet::new(vec![logging_rule("Original", "hi")]));
        let before = engine.snapshot().unwrap();

        let result = engine.reload_from_text("name: Broken\ntriggers: []\n");
        assert!(matches!(result, Err(EngineError::Invalid(_))));
        assert_eq!(engine.snapshot().unwrap().rules()[0].id, "original");

        let count = engine
            .reload_from_text(
                "rules:\n  - name: New A\n    triggers: [{type: call}]\n    actions: [archive]\n  - name: New B\n    triggers: [{type: email}]\n    actions: [archive]\n",
            )
            .unwrap();
        assert_eq!(count, 2);
        let after = engine.snapshot().unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(before.rules()[0].id, "original");
    }

    #[tokio::test]
    async fn test_set_enabled_toggles_rule() {
        let (engine, recorder) = engine_with(RuleSet::new(vec![logging_rule("Toggle", "hi")]));
        let event = Event::new("1", Channel::Email, "a@b.com", "hi");

        assert!(engine.set_enabled("toggle", false).unwrap());
        assert!(engine.process(&event).await.unwrap().matched_rules.is_empty());
        assert!(!engine.set_enabled("missing", true).unwrap());

        assert!(engine.set_enabled("toggle", true).unwrap());
        engine.process(&event).await.unwrap();
        assert_eq!(logged(&recorder), vec!["Toggle fired"]);
    }

    #[tokio::test]
    async fn test_statistics_recorded() {
        let statistics = Arc::new(StatisticsCollector::new());
        let (engine, _) = engine_with(RuleSet::new(vec![logging_rule("Counted", "hi")]));
        let engine = engine.with_statistics(statistics.clone());

        engine
            .process(&Event::new("1", Channel::Email, "a@b.com", "hi"))
            .await
            .unwrap();
        engine
            .process(&Event::new("2", Channel::Email, "a@b.com", "bye"))
            .await
            .unwrap();
        statistics.flush().await;

        let (global, rules) = statistics.snapshot();
        assert_eq!(global.total_events, 2);
        assert_eq!(global.no_rule_matches, 1);
        assert_eq!(rules[0].rule_id, "counted");
        assert_eq!(rules[0].actions_succeeded, 1);
    }
}
