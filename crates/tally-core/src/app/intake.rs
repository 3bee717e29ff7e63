//! ResponseIntake - operator-facing entry point for signed responses.
//!
//! Transport is out of scope; an RPC or HTTP handler calls
//! `process_signed_task_response` and maps the error to its own status.

use std::sync::Arc;

use crate::app::registry::TaskRegistry;
use crate::domain::{IntakeError, ResponseDigest, SignedTaskResponse};
use crate::observability::Metrics;
use crate::ports::AggregationService;

#[derive(Clone)]
pub struct ResponseIntake {
    registry: Arc<TaskRegistry>,
    aggregation: Arc<dyn AggregationService>,
    metrics: Arc<Metrics>,
}

impl ResponseIntake {
    pub fn new(
        registry: Arc<TaskRegistry>,
        aggregation: Arc<dyn AggregationService>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            aggregation,
            metrics,
        }
    }

    /// Record the response, then hand the signature to the aggregation engine.
    ///
    /// The response is stored before the engine sees the signature, so a
    /// session that finalizes on this very signature always finds its
    /// response in the registry.
    pub async fn process_signed_task_response(
        &self,
        signed: SignedTaskResponse,
    ) -> Result<ResponseDigest, IntakeError> {
        let index = signed.response.task_index;
        if !self.registry.contains_task(index).await {
            tracing::warn!(task_index = %index, operator = %signed.operator_id, "response for unknown task");
            return Err(IntakeError::UnknownTask(index));
        }

        let digest = signed.response.digest();
        let inserted = self
            .registry
            .record_response(index, digest, signed.response)
            .await;
        tracing::debug!(task_index = %index, digest = %digest, new_digest = inserted, "response recorded");

        self.aggregation
            .process_signed_response(index, digest, signed.signature, signed.operator_id)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    task_index = %index,
                    operator = %signed.operator_id,
                    error = %err,
                    "aggregation rejected signature"
                );
            })?;

        self.metrics.inc_responses_accepted();
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AggregationError, BlockNumber, OperatorId, QuorumNum, Signature, Task, TaskIndex,
        TaskPayload, TaskResponse, ThresholdPercentage,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingAggregation {
        reject: Option<AggregationError>,
        seen: Mutex<Vec<(TaskIndex, ResponseDigest, OperatorId)>>,
    }

    #[async_trait]
    impl AggregationService for RecordingAggregation {
        async fn initialize_new_task(
            &self,
            _task_index: TaskIndex,
            _created_at_block: BlockNumber,
            _quorum_numbers: Vec<QuorumNum>,
            _quorum_threshold_percentages: Vec<ThresholdPercentage>,
            _time_to_expiry: Duration,
        ) -> Result<(), AggregationError> {
            Ok(())
        }

        async fn process_signed_response(
            &self,
            task_index: TaskIndex,
            digest: ResponseDigest,
            _signature: Signature,
            operator_id: OperatorId,
        ) -> Result<(), AggregationError> {
            if let Some(err) = &self.reject {
                return Err(err.clone());
            }
            self.seen
                .lock()
                .unwrap()
                .push((task_index, digest, operator_id));
            Ok(())
        }
    }

    async fn registry_with_task(index: u32) -> Arc<TaskRegistry> {
        let registry = Arc::new(TaskRegistry::new());
        registry
            .register_task(Task::uniform_thresholds(
                TaskIndex::new(index),
                TaskPayload::new(serde_json::json!(null)),
                vec![QuorumNum(0)],
                ThresholdPercentage(50),
                BlockNumber::new(1),
            ))
            .await
            .unwrap();
        registry
    }

    fn signed(index: u32, value: i64, operator: u8) -> SignedTaskResponse {
        SignedTaskResponse::new(
            TaskResponse::new(TaskIndex::new(index), serde_json::json!(value)),
            Signature([operator; 32]),
            OperatorId::from_low_byte(operator),
        )
    }

    #[tokio::test]
    async fn records_then_forwards_signature() {
        let registry = registry_with_task(1).await;
        let aggregation = Arc::new(RecordingAggregation::default());
        let metrics = Arc::new(Metrics::default());
        let intake = ResponseIntake::new(
            Arc::clone(&registry),
            aggregation.clone(),
            Arc::clone(&metrics),
        );

        let digest = intake
            .process_signed_task_response(signed(1, 49, 1))
            .await
            .unwrap();

        assert!(registry.get_response(TaskIndex::new(1), &digest).await.is_some());
        assert_eq!(
            aggregation.seen.lock().unwrap().as_slice(),
            &[(TaskIndex::new(1), digest, OperatorId::from_low_byte(1))]
        );
        assert_eq!(metrics.snapshot().responses_accepted, 1);
    }

    #[tokio::test]
    async fn unknown_task_is_rejected_without_registry_write() {
        let registry = Arc::new(TaskRegistry::new());
        let intake = ResponseIntake::new(
            Arc::clone(&registry),
            Arc::new(RecordingAggregation::default()),
            Arc::new(Metrics::default()),
        );

        let err = intake
            .process_signed_task_response(signed(9, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err, IntakeError::UnknownTask(TaskIndex::new(9)));
        assert_eq!(registry.response_count(TaskIndex::new(9)).await, 0);
    }

    #[tokio::test]
    async fn identical_responses_from_two_operators_share_one_entry() {
        let registry = registry_with_task(2).await;
        let intake = ResponseIntake::new(
            Arc::clone(&registry),
            Arc::new(RecordingAggregation::default()),
            Arc::new(Metrics::default()),
        );

        let a = intake.process_signed_task_response(signed(2, 4, 1)).await.unwrap();
        let b = intake.process_signed_task_response(signed(2, 4, 2)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.response_count(TaskIndex::new(2)).await, 1);
    }

    #[tokio::test]
    async fn aggregation_rejection_is_surfaced() {
        let registry = registry_with_task(3).await;
        let operator = OperatorId::from_low_byte(7);
        let intake = ResponseIntake::new(
            registry,
            Arc::new(RecordingAggregation {
                reject: Some(AggregationError::InvalidSignature(operator)),
                ..RecordingAggregation::default()
            }),
            Arc::new(Metrics::default()),
        );

        let err = intake
            .process_signed_task_response(signed(3, 1, 7))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IntakeError::Aggregation(AggregationError::InvalidSignature(operator))
        );
    }
}
