//! Task model: one unit of work published on chain.

use serde::{Deserialize, Serialize};

use super::ids::{BlockNumber, QuorumNum, TaskIndex, ThresholdPercentage};

/// Opaque task description. The aggregator never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(serde_json::Value);

impl TaskPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A task as emitted by the task manager contract.
///
/// Design:
/// - Immutable once ingested (the registry refuses to overwrite it).
/// - Quorum arrays are carried as-is; validation happens when an
///   aggregation session is opened, so a malformed event can be logged and
///   dropped rather than rejected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub index: TaskIndex,
    pub payload: TaskPayload,
    pub quorum_numbers: Vec<QuorumNum>,
    pub quorum_threshold_percentages: Vec<ThresholdPercentage>,
    pub created_at_block: BlockNumber,
}

impl Task {
    pub fn new(
        index: TaskIndex,
        payload: TaskPayload,
        quorum_numbers: Vec<QuorumNum>,
        quorum_threshold_percentages: Vec<ThresholdPercentage>,
        created_at_block: BlockNumber,
    ) -> Self {
        Self {
            index,
            payload,
            quorum_numbers,
            quorum_threshold_percentages,
            created_at_block,
        }
    }

    /// Build a task whose quorums all share one threshold.
    ///
    /// The contract event carries a single percentage that applies to every
    /// quorum; this expands it into the per-quorum form.
    pub fn uniform_thresholds(
        index: TaskIndex,
        payload: TaskPayload,
        quorum_numbers: Vec<QuorumNum>,
        threshold: ThresholdPercentage,
        created_at_block: BlockNumber,
    ) -> Self {
        let thresholds = vec![threshold; quorum_numbers.len()];
        Self::new(index, payload, quorum_numbers, thresholds, created_at_block)
    }
}
