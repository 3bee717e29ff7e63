//! Aggregator - the single coordinating event loop.
//!
//! # Flow
//! 1. subscribe to `NewTaskCreated` and `TaskResponded` logs
//! 2. multiplex (biased, in this order): shutdown, subscription failures,
//!    aggregation completions, new tasks, task-responded logs
//! 3. one event at a time; nothing else mutates the loop's own state
//!
//! A dropped subscription is replaced with backoff. The event channels are
//! created once and outlive every subscription, so events already buffered
//! are not lost across a re-subscribe.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::app::intake::ResponseIntake;
use crate::app::registry::TaskRegistry;
use crate::app::retry::ResubscribePolicy;
use crate::app::submission::{SubmissionPipeline, SubmissionReport};
use crate::config::{AggregationFailurePolicy, AggregatorConfig};
use crate::domain::{
    AggregationError, AggregationOutcome, OrchestratorError, SubscriptionError, TaskCreated,
    TaskResponded,
};
use crate::observability::{AggregatorStats, Metrics};
use crate::ports::{AggregationService, Subscription, TaskEventSource};

const NEW_TASKS: &str = "new_tasks";
const TASK_RESPONSES: &str = "task_responses";

pub struct Aggregator {
    config: AggregatorConfig,
    events: Arc<dyn TaskEventSource>,
    aggregation: Arc<dyn AggregationService>,
    completions: mpsc::Receiver<AggregationOutcome>,
    registry: Arc<TaskRegistry>,
    pipeline: SubmissionPipeline,
    metrics: Arc<Metrics>,
}

impl Aggregator {
    /// Use `AggregatorBuilder` unless every part is already at hand.
    pub fn new(
        config: AggregatorConfig,
        events: Arc<dyn TaskEventSource>,
        aggregation: Arc<dyn AggregationService>,
        completions: mpsc::Receiver<AggregationOutcome>,
        registry: Arc<TaskRegistry>,
        pipeline: SubmissionPipeline,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            events,
            aggregation,
            completions,
            registry,
            pipeline,
            metrics,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn stats(&self) -> AggregatorStats {
        self.metrics.snapshot()
    }

    /// Operator-facing intake sharing this aggregator's registry and engine.
    pub fn intake(&self) -> ResponseIntake {
        ResponseIntake::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.aggregation),
            Arc::clone(&self.metrics),
        )
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Returns `Err` when a stream cannot be re-subscribed within the policy's
    /// attempts, when the completion channel closes, or when a session ends
    /// without quorum under `AggregationFailurePolicy::Halt`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), OrchestratorError> {
        let (task_tx, mut task_rx) = mpsc::channel::<TaskCreated>(self.config.event_buffer);
        let (resp_tx, mut resp_rx) = mpsc::channel::<TaskResponded>(self.config.event_buffer);

        let Some(mut new_tasks) = self.subscribe_new_tasks(&task_tx, &mut shutdown).await? else {
            return Ok(());
        };
        let Some(mut task_responses) = self
            .subscribe_task_responses(&resp_tx, &mut shutdown)
            .await?
        else {
            new_tasks.unsubscribe();
            return Ok(());
        };

        tracing::info!(
            challenge_window_blocks = self.config.challenge_window_blocks,
            block_time_secs = self.config.block_time_secs,
            failure_policy = ?self.config.failure_policy,
            "aggregator started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // sender gone: nobody can ever stop us otherwise
                        break;
                    }
                    // 次のループ先頭で判定
                    continue;
                }

                err = new_tasks.err() => {
                    tracing::warn!(stream = NEW_TASKS, error = %err, "subscription failed, re-subscribing");
                    new_tasks.unsubscribe();
                    match self.subscribe_new_tasks(&task_tx, &mut shutdown).await? {
                        Some(sub) => {
                            self.metrics.inc_resubscriptions();
                            new_tasks = sub;
                        }
                        None => {
                            task_responses.unsubscribe();
                            return Ok(());
                        }
                    }
                }

                err = task_responses.err() => {
                    tracing::warn!(stream = TASK_RESPONSES, error = %err, "subscription failed, re-subscribing");
                    task_responses.unsubscribe();
                    match self.subscribe_task_responses(&resp_tx, &mut shutdown).await? {
                        Some(sub) => {
                            self.metrics.inc_resubscriptions();
                            task_responses = sub;
                        }
                        None => {
                            new_tasks.unsubscribe();
                            return Ok(());
                        }
                    }
                }

                outcome = self.completions.recv() => {
                    let Some(outcome) = outcome else {
                        tracing::error!("aggregation completion channel closed");
                        new_tasks.unsubscribe();
                        task_responses.unsubscribe();
                        return Err(OrchestratorError::CompletionChannelClosed);
                    };
                    if let Err(err) = self.handle_outcome(outcome).await {
                        new_tasks.unsubscribe();
                        task_responses.unsubscribe();
                        return Err(err);
                    }
                }

                Some(created) = task_rx.recv() => {
                    self.process_task_created(created).await;
                }

                Some(responded) = resp_rx.recv() => {
                    self.metrics.inc_task_responses_observed();
                    tracing::info!(
                        task_index = %responded.task_index,
                        digest = %responded.digest,
                        "task responded on chain"
                    );
                }
            }
        }

        tracing::info!("aggregator shutting down");
        new_tasks.unsubscribe();
        task_responses.unsubscribe();
        Ok(())
    }

    /// Register the task, then open its aggregation session.
    ///
    /// Failures are logged and the event dropped; the loop never stops here.
    /// A task whose session could not be opened is taken out of the registry
    /// again, so a corrected event for the same index is still accepted.
    pub async fn process_task_created(&self, created: TaskCreated) {
        self.metrics.inc_tasks_received();
        let task = created.task;
        let index = task.index;
        tracing::info!(task_index = %index, created_at_block = %task.created_at_block, "new task created");

        if let Err(err) = self.registry.register_task(task.clone()).await {
            self.metrics.inc_tasks_rejected();
            tracing::warn!(task_index = %index, error = %err, "dropping duplicate task event");
            return;
        }

        if let Err(err) = self
            .aggregation
            .initialize_new_task(
                index,
                task.created_at_block,
                task.quorum_numbers,
                task.quorum_threshold_percentages,
                self.config.time_to_expiry(),
            )
            .await
        {
            self.metrics.inc_tasks_rejected();
            tracing::error!(task_index = %index, error = %err, kind = ?err.kind(), "failed to open aggregation session");
            // セッションの無いタスクは登録に残さない
            if !matches!(err, AggregationError::TaskAlreadyInitialized(_)) {
                self.registry.remove_task(index).await;
            }
        }
    }

    async fn handle_outcome(&self, outcome: AggregationOutcome) -> Result<(), OrchestratorError> {
        let task_index = outcome.task_index();
        let reason = match outcome {
            AggregationOutcome::Finalized(aggregated) => {
                let report = self.pipeline.submit(&aggregated).await;
                if let SubmissionReport::Skipped(reason) = report {
                    tracing::debug!(task_index = %task_index, ?reason, "submission skipped");
                }
                return Ok(());
            }
            AggregationOutcome::Expired { .. } => "expired before reaching quorum".to_string(),
            AggregationOutcome::Failed { reason, .. } => reason,
        };

        self.metrics.inc_aggregations_failed();
        match self.config.failure_policy {
            AggregationFailurePolicy::Halt => {
                tracing::error!(task_index = %task_index, %reason, "aggregation did not finalize, halting");
                Err(OrchestratorError::AggregationFailed { task_index, reason })
            }
            AggregationFailurePolicy::Skip => {
                tracing::warn!(task_index = %task_index, %reason, "aggregation did not finalize, task left unresolved");
                Ok(())
            }
        }
    }

    async fn subscribe_new_tasks(
        &self,
        sink: &mpsc::Sender<TaskCreated>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Subscription>, OrchestratorError> {
        let events = &self.events;
        subscribe_with_backoff(&self.config.resubscribe, NEW_TASKS, shutdown, || {
            events.subscribe_new_tasks(sink.clone())
        })
        .await
    }

    async fn subscribe_task_responses(
        &self,
        sink: &mpsc::Sender<TaskResponded>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Subscription>, OrchestratorError> {
        let events = &self.events;
        subscribe_with_backoff(&self.config.resubscribe, TASK_RESPONSES, shutdown, || {
            events.subscribe_task_responses(sink.clone())
        })
        .await
    }
}

/// Try `subscribe` up to `policy.max_attempts` times, sleeping
/// `policy.next_delay(attempt)` before each try.
///
/// `Ok(None)` means shutdown was requested while waiting.
async fn subscribe_with_backoff<F, Fut>(
    policy: &ResubscribePolicy,
    stream: &'static str,
    shutdown: &mut watch::Receiver<bool>,
    mut subscribe: F,
) -> Result<Option<Subscription>, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Subscription, SubscriptionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = SubscriptionError::Closed;

    for attempt in 1..=max_attempts {
        let delay = policy.next_delay(attempt);
        if !delay.is_zero() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(None);
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if *shutdown.borrow() {
            return Ok(None);
        }

        match subscribe().await {
            Ok(sub) => {
                if attempt > 1 {
                    tracing::info!(stream, attempt, "subscribed after retry");
                }
                return Ok(Some(sub));
            }
            Err(err) => {
                tracing::warn!(stream, attempt, max_attempts, error = %err, "subscribe attempt failed");
                last_err = err;
            }
        }
    }

    tracing::error!(stream, attempts = max_attempts, "giving up on subscription");
    Err(OrchestratorError::Resubscribe {
        stream,
        attempts: max_attempts,
        source: last_err,
    })
}
