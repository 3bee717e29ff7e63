//! AggregationService port - per-task signature aggregation.
//!
//! The service tracks one session per task index, accepts operator
//! signatures out of band, and delivers exactly one `AggregationOutcome` per
//! initialized task on a completion channel. The receiving end of that
//! channel is handed to the aggregator when it is built.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    AggregationError, BlockNumber, OperatorId, QuorumNum, ResponseDigest, Signature, TaskIndex,
    ThresholdPercentage,
};

#[async_trait]
pub trait AggregationService: Send + Sync {
    /// Start tracking a task.
    ///
    /// Fails if the index is already tracked, or if the quorum arrays are
    /// malformed (length mismatch, duplicates, threshold above 100).
    async fn initialize_new_task(
        &self,
        task_index: TaskIndex,
        created_at_block: BlockNumber,
        quorum_numbers: Vec<QuorumNum>,
        quorum_threshold_percentages: Vec<ThresholdPercentage>,
        time_to_expiry: Duration,
    ) -> Result<(), AggregationError>;

    /// Feed one operator signature into the task's session.
    async fn process_signed_response(
        &self,
        task_index: TaskIndex,
        digest: ResponseDigest,
        signature: Signature,
        operator_id: OperatorId,
    ) -> Result<(), AggregationError>;
}
