//! Shared wiring for the integration tests: a running aggregator over the
//! in-memory ports.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_core::domain::{
    BlockNumber, IntakeError, OperatorId, OrchestratorError, QuorumNum, ResponseDigest,
    SignedTaskResponse, Task, TaskCreated, TaskIndex, TaskPayload, TaskResponse,
    ThresholdPercentage,
};
use tally_core::impls::{
    HashXorScheme, InMemoryAggregationService, InMemoryEventSource, RecordingChainWriter,
    StaticOperatorRegistry,
};
use tally_core::{AggregatorBuilder, AggregatorConfig, Metrics, ResponseIntake, TaskRegistry};

pub struct Harness {
    pub events: Arc<InMemoryEventSource>,
    pub aggregation: Arc<InMemoryAggregationService>,
    pub writer: RecordingChainWriter,
    pub intake: ResponseIntake,
    pub registry: Arc<TaskRegistry>,
    pub metrics: Arc<Metrics>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), OrchestratorError>>,
}

impl Harness {
    /// Build and spawn an aggregator. Must run inside a tokio runtime.
    pub fn start(config: AggregatorConfig, operators: StaticOperatorRegistry) -> Self {
        let events = Arc::new(InMemoryEventSource::new());
        let (service, completions) =
            InMemoryAggregationService::new(Arc::new(operators), Arc::new(HashXorScheme));
        let aggregation = Arc::new(service);
        let writer = RecordingChainWriter::new();

        let aggregator = AggregatorBuilder::new()
            .config(config)
            .event_source(events.clone())
            .aggregation(aggregation.clone(), completions)
            .chain_writer(Arc::new(writer.clone()))
            .build()
            .expect("complete wiring");

        let intake = aggregator.intake();
        let registry = aggregator.registry();
        let metrics = aggregator.metrics();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(aggregator.run(shutdown_rx));

        Self {
            events,
            aggregation,
            writer,
            intake,
            registry,
            metrics,
            shutdown,
            handle,
        }
    }

    pub async fn publish_task(&self, task: Task) {
        self.events.publish_task_created(TaskCreated::new(task)).await;
    }

    /// Wait until the task has an open aggregation session.
    pub async fn wait_tracked(&self, index: u32) {
        let aggregation = &self.aggregation;
        eventually(|| async move { aggregation.is_tracked(TaskIndex::new(index)) }).await;
    }

    /// Sign `result` as `operator` and push it through the intake.
    pub async fn respond(
        &self,
        index: u32,
        result: serde_json::Value,
        operator: u8,
    ) -> Result<ResponseDigest, IntakeError> {
        self.intake
            .process_signed_task_response(signed(index, result, operator))
            .await
    }

    /// Request shutdown and wait for the loop to return.
    pub async fn stop(self) -> Result<(), OrchestratorError> {
        let _ = self.shutdown.send(true);
        self.join().await
    }

    /// Wait for the loop to return on its own.
    pub async fn join(self) -> Result<(), OrchestratorError> {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("aggregator loop did not return")
            .expect("aggregator loop panicked")
    }
}

pub fn signed(index: u32, result: serde_json::Value, operator: u8) -> SignedTaskResponse {
    let response = TaskResponse::new(TaskIndex::new(index), result);
    let id = OperatorId::from_low_byte(operator);
    let signature = HashXorScheme.sign(&HashXorScheme::pubkey_for(&id), &response.digest());
    SignedTaskResponse::new(response, signature, id)
}

pub fn task(index: u32, block: u32, quorums: &[u8], threshold: u8) -> Task {
    Task::uniform_thresholds(
        TaskIndex::new(index),
        TaskPayload::new(serde_json::json!({ "numberToBeSquared": index })),
        quorums.iter().map(|&q| QuorumNum(q)).collect(),
        ThresholdPercentage(threshold),
        BlockNumber::new(block),
    )
}

/// Poll `check` until it holds; panics after 5 seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached in time");
}
