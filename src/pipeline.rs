use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::engine::{ProcessReport, RuleEngine};
use crate::event::Event;

/// Feeds events to the engine with up to `workers` events in flight. Each task
/// owns its event and reads the shared, immutable rule set, so a slow
/// collaborator call only holds up the event that made it.
pub struct Pipeline {
    events: mpsc::Sender<Event>,
    dispatcher: JoinHandle<()>,
}

impl Pipeline {
    pub fn spawn(
        engine: Arc<RuleEngine>,
        workers: usize,
        queue_capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessReport>) {
        let (events, receiver) = mpsc::channel(queue_capacity.max(1));
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(Self::dispatch(
            engine,
            workers.max(1),
            receiver,
            reports_tx,
        ));
        log::info!("Event pipeline started with {} worker(s)", workers.max(1));
        (Self { events, dispatcher }, reports_rx)
    }

    /// Queue an event, waiting for space if the queue is full.
    pub async fn submit(&self, event: Event) -> anyhow::Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("Pipeline closed; event {} dropped", e.0.id))
    }

    /// Stop accepting events and wait for every queued event to finish.
    pub async fn shutdown(self) {
        drop(self.events);
        if let Err(e) = self.dispatcher.await {
            log::error!("Pipeline dispatcher failed: {e}");
        }
    }

    async fn dispatch(
        engine: Arc<RuleEngine>,
        workers: usize,
        mut events: mpsc::Receiver<Event>,
        reports: mpsc::UnboundedSender<ProcessReport>,
    ) {
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        while let Some(event) = events.recv().await {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let engine = engine.clone();
            let reports = reports.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match engine.process(&event).await {
                    Ok(report) => {
                        let _ = reports.send(report);
                    }
                    Err(e) => log::error!("Event {} could not be processed: {e}", event.id),
                }
            });

            // Reap finished tasks so the set does not grow with the stream.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    log::error!("Event task panicked: {e}");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Event task panicked: {e}");
            }
        }
        log::info!("Event pipeline drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::event::Channel;
    use crate::executor::{ActionExecutor, RetryPolicy};
    use crate::loader::load_rules;
    use std::time::{Duration, Instant};

    const RULES: &str = r#"rules:
  - name: Slow CRM sync
    triggers:
      - type: call
    actions:
      - push_to_crm:
          note: "call {{event_id}}"
  - name: Tag email
    triggers:
      - type: email
    actions:
      - add_tag: seen
"#;

    #[tokio::test]
    async fn test_slow_event_does_not_block_others() {
        let (collaborators, recorder) = Collaborators::in_memory();
        recorder.delay_crm(Duration::from_millis(500));
        let engine = Arc::new(RuleEngine::new(
            load_rules(RULES).unwrap(),
            ActionExecutor::new(collaborators, RetryPolicy::default()),
        ));
        let (pipeline, mut reports) = Pipeline::spawn(engine, 4, 16);

        let started = Instant::now();
        pipeline
            .submit(Event::new("slow", Channel::Call, "+15550100", "notes"))
            .await
            .unwrap();
        pipeline
            .submit(Event::new("fast", Channel::Email, "a@b.com", "hi"))
            .await
            .unwrap();

        let first = reports.recv().await.unwrap();
        assert_eq!(first.event_id, "fast");
        assert!(started.elapsed() < Duration::from_millis(500));

        let second = reports.recv().await.unwrap();
        assert_eq!(second.event_id, "slow");
        assert_eq!(second.matched_rules, vec!["slow-crm-sync"]);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let (collaborators, recorder) = Collaborators::in_memory();
        let engine = Arc::new(RuleEngine::new(
            load_rules(RULES).unwrap(),
            ActionExecutor::new(collaborators, RetryPolicy::default()),
        ));
        let (pipeline, mut reports) = Pipeline::spawn(engine, 2, 4);

        for i in 0..10 {
            pipeline
                .submit(Event::new(format!("e{i}"), Channel::Email, "a@b.com", "hi"))
                .await
                .unwrap();
        }
        pipeline.shutdown().await;

        let mut seen = 0;
        while reports.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 10);
        assert_eq!(recorder.records().len(), 10);
    }
}
