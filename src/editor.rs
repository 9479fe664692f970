use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collaborators::{Collaborators, Recorded};
use crate::engine::{ProcessReport, RuleEngine};
use crate::event::Event;
use crate::error::ValidationError;
use crate::executor::{ActionExecutor, RetryPolicy};
use crate::loader::load_rules;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

/// Result of testing a draft against one event.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub report: ProcessReport,
    pub side_effects: Vec<Recorded>,
}

/// Backs the recipe editor's save and test actions. Saved text is optionally
/// written to the rules file before it is swapped into the engine.
pub struct RuleEditor {
    engine: Arc<RuleEngine>,
    path: Option<PathBuf>,
}

impl RuleEditor {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine, path: None }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Validate, write to disk, then swap. A failure at any step leaves the
    /// active rule set untouched.
    pub fn save(&self, text: &str) -> SaveResponse {
        let rules = match load_rules(text) {
            Ok(rules) => rules,
            Err(errors) => {
                log::warn!("Rejected rule set with {} error(s)", errors.len());
                return SaveResponse {
                    success: false,
                    errors,
                };
            }
        };

        if let Err(e) = self.persist(text) {
            log::error!("Rule set not saved: {e:#}");
            return SaveResponse {
                success: false,
                errors: vec![ValidationError::new(0, format!("{e:#}"))],
            };
        }

        let count = rules.len();
        match self.engine.reload(rules) {
            Ok(()) => {
                log::info!("Saved rule set with {count} rule(s)");
                SaveResponse {
                    success: true,
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                log::error!("Save failed: {e}");
                SaveResponse {
                    success: false,
                    errors: vec![ValidationError::new(0, e.to_string())],
                }
            }
        }
    }

    /// Dry run of a draft: validate it, then run `event` through it against
    /// in-memory collaborators. The active rule set is not touched and no
    /// external system is called.
    pub async fn test(&self, text: &str, event: &Event) -> Result<TestRun, Vec<ValidationError>> {
        let rules = load_rules(text)?;
        let (collaborators, recorder) = Collaborators::in_memory();
        let draft = RuleEngine::new(
            rules,
            ActionExecutor::new(collaborators, RetryPolicy::default()),
        );
        let report = draft
            .process(event)
            .await
            .map_err(|e| vec![ValidationError::new(0, e.to_string())])?;
        log::info!(
            "Draft test against event {}: {} rule(s) matched",
            event.id,
            report.matched_rules.len()
        );
        Ok(TestRun {
            report,
            side_effects: recorder.records(),
        })
    }

    fn persist(&self, text: &str) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write rules file: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Coalesces editor changes: a save is issued once no edit has arrived for the
/// quiet period, and each new edit restarts the wait.
pub struct AutoSaver {
    edits: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

impl AutoSaver {
    pub fn spawn(
        editor: Arc<RuleEditor>,
        quiet: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SaveResponse>) {
        let (edits, receiver) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(editor, quiet, receiver, results_tx));
        (Self { edits, handle }, results_rx)
    }

    pub fn edit(&self, text: impl Into<String>) {
        if self.edits.send(text.into()).is_err() {
            log::warn!("Auto-save worker has stopped; edit dropped");
        }
    }

    /// Stop accepting edits, saving any pending one immediately.
    pub async fn shutdown(self) {
        drop(self.edits);
        if let Err(e) = self.handle.await {
            log::error!("Auto-save worker failed: {e}");
        }
    }

    async fn run(
        editor: Arc<RuleEditor>,
        quiet: Duration,
        mut edits: mpsc::UnboundedReceiver<String>,
        results: mpsc::UnboundedSender<SaveResponse>,
    ) {
        let save = |text: String| {
            let response = editor.save(&text);
            if !response.success {
                log::warn!("Auto-save rejected with {} error(s)", response.errors.len());
            }
            let _ = results.send(response);
        };

        let mut pending: Option<String> = None;
        loop {
            match pending.take() {
                None => match edits.recv().await {
                    Some(text) => pending = Some(text),
                    None => break,
                },
                Some(text) => {
                    tokio::select! {
                        next = edits.recv() => match next {
                            Some(newer) => {
                                log::debug!("Edit superseded pending auto-save");
                                pending = Some(newer);
                            }
                            None => {
                                save(text);
                                break;
                            }
                        },
                        _ = tokio::time::sleep(quiet) => save(text),
                    }
                }
            }
        }
    }
}
