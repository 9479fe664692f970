use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule_id: String,
    pub matches: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
    pub first_match: Option<DateTime<Utc>>,
    pub last_match: Option<DateTime<Utc>>,
}

impl RuleStats {
    fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            matches: 0,
            actions_succeeded: 0,
            actions_failed: 0,
            first_match: None,
            last_match: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_events: u64,
    pub no_rule_matches: u64, // Events that didn't match any rule
    pub skipped_events: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
pub enum StatEvent {
    EventProcessed { propagated: bool },
    RuleMatch { rule_id: String },
    ActionOutcome { rule_id: String, succeeded: bool },
    NoRuleMatch,
    Flush(oneshot::Sender<()>),
}

#[derive(Debug)]
struct StatsState {
    global: GlobalStats,
    rules: HashMap<String, RuleStats>,
}

/// Aggregates engine activity on a background task fed by an unbounded channel,
/// so recording never blocks event processing.
pub struct StatisticsCollector {
    sender: mpsc::UnboundedSender<StatEvent>,
    state: Arc<Mutex<StatsState>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StatisticsCollector {
    /// Starts the aggregation worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new() -> Self {
        let now = Utc::now();
        let state = Arc::new(Mutex::new(StatsState {
            global: GlobalStats {
                total_events: 0,
                no_rule_matches: 0,
                skipped_events: 0,
                start_time: now,
                last_updated: now,
            },
            rules: HashMap::new(),
        }));

        let (sender, receiver) = mpsc::unbounded_channel();
        let worker_state = state.clone();
        let handle = tokio::spawn(async move {
            Self::stats_worker(worker_state, receiver).await;
        });

        Self {
            sender,
            state,
            _handle: handle,
        }
    }

    pub fn record_event(&self, event: StatEvent) {
        if let Err(e) = self.sender.send(event) {
            log::warn!("Failed to send statistics event: {e}");
        }
    }

    /// Wait until every event recorded before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.record_event(StatEvent::Flush(tx));
        if rx.await.is_err() {
            log::warn!("Statistics worker stopped before flush completed");
        }
    }

    async fn stats_worker(
        state: Arc<Mutex<StatsState>>,
        mut receiver: mpsc::UnboundedReceiver<StatEvent>,
    ) {
        while let Some(event) = receiver.recv().await {
            if let StatEvent::Flush(ack) = event {
                let _ = ack.send(());
                continue;
            }
            match state.lock() {
                Ok(mut state) => Self::process_event(event, &mut state),
                Err(e) => {
                    log::error!("Statistics state poisoned: {e}");
                    break;
                }
            }
        }
        log::debug!("Statistics worker exiting");
    }

    fn process_event(event: StatEvent, state: &mut StatsState) {
        let now = Utc::now();
        state.global.last_updated = now;

        match event {
            StatEvent::EventProcessed { propagated } => {
                state.global.total_events += 1;
                if !propagated {
                    state.global.skipped_events += 1;
                }
            }
            StatEvent::NoRuleMatch => {
                state.global.no_rule_matches += 1;
            }
            StatEvent::RuleMatch { rule_id } => {
                let stats = state
                    .rules
                    .entry(rule_id.clone())
                    .or_insert_with(|| RuleStats::new(&rule_id));
                stats.matches += 1;
                stats.first_match.get_or_insert(now);
                stats.last_match = Some(now);
            }
            StatEvent::ActionOutcome { rule_id, succeeded } => {
                let stats = state
                    .rules
                    .entry(rule_id.clone())
                    .or_insert_with(|| RuleStats::new(&rule_id));
                if succeeded {
                    stats.actions_succeeded += 1;
                } else {
                    stats.actions_failed += 1;
                }
            }
            StatEvent::Flush(_) => {}
        }
    }

    /// Global counters and per-rule stats sorted by match count.
    pub fn snapshot(&self) -> (GlobalStats, Vec<RuleStats>) {
        match self.state.lock() {
            Ok(state) => {
                let mut rules: Vec<RuleStats> = state.rules.values().cloned().collect();
                rules.sort_by(|a, b| b.matches.cmp(&a.matches).then(a.rule_id.cmp(&b.rule_id)));
                (state.global.clone(), rules)
            }
            Err(e) => {
                log::error!("Statistics state poisoned: {e}");
                let global = e.into_inner().global.clone();
                (global, Vec::new())
            }
        }
    }

    /// Rules that have never matched, in the order given.
    pub fn unmatched_rules(&self, rule_ids: &[String]) -> Vec<String> {
        let (_, stats) = self.snapshot();
        rule_ids
            .iter()
            .filter(|id| !stats.iter().any(|s| &s.rule_id == *id && s.matches > 0))
            .cloned()
            .collect()
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}
