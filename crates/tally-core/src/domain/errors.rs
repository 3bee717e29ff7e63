//! Errors and their operational classification.

use thiserror::Error;

use super::ids::{OperatorId, QuorumNum, TaskIndex, ThresholdPercentage};
use super::session::SessionState;

/// Operational classification of a failure.
///
/// - Configuration: malformed input or programming error; drop and continue.
/// - Transient: infrastructure hiccup recovered locally (subscription drop).
/// - Aggregation: a task could not reach quorum or the engine faulted.
/// - Submission: the chain writer refused or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transient,
    Aggregation,
    Submission,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task {0} is already registered")]
    DuplicateTask(TaskIndex),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("task {0} is already being aggregated")]
    TaskAlreadyInitialized(TaskIndex),

    #[error("{quorums} quorum numbers but {thresholds} threshold percentages")]
    QuorumLengthMismatch { quorums: usize, thresholds: usize },

    #[error("quorum {0} listed more than once")]
    DuplicateQuorum(QuorumNum),

    #[error("threshold {threshold:?} for {quorum} is above 100%")]
    InvalidThreshold {
        quorum: QuorumNum,
        threshold: ThresholdPercentage,
    },

    #[error("task has no quorum numbers")]
    EmptyQuorums,

    #[error("task {0} is not being aggregated")]
    TaskNotFound(TaskIndex),

    #[error("aggregation session for task {0} has already finished")]
    SessionClosed(TaskIndex),

    #[error("operator {0} is not registered in any quorum of the task")]
    UnknownOperator(OperatorId),

    #[error("signature from operator {0} does not verify")]
    InvalidSignature(OperatorId),

    #[error("operator {0} already signed this response")]
    DuplicateSignature(OperatorId),

    #[error("operator state unavailable: {0}")]
    OperatorState(String),
}

impl AggregationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AggregationError::OperatorState(_) => ErrorKind::Transient,
            AggregationError::TaskNotFound(_) | AggregationError::SessionClosed(_) => {
                ErrorKind::Aggregation
            }
            _ => ErrorKind::Configuration,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription transport error: {0}")]
    Transport(String),

    #[error("subscription closed by the event source")]
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("chain writer transport error: {0}")]
    Transport(String),
}

impl SubmissionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Submission
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("task {0} is unknown to the aggregator")]
    UnknownTask(TaskIndex),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

/// Conditions that end the dispatch loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("could not re-subscribe to {stream} after {attempts} attempts: {source}")]
    Resubscribe {
        stream: &'static str,
        attempts: u32,
        #[source]
        source: SubscriptionError,
    },

    #[error("aggregation for task {task_index} did not finalize: {reason}")]
    AggregationFailed { task_index: TaskIndex, reason: String },

    #[error("aggregation completion channel closed")]
    CompletionChannelClosed,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Resubscribe { .. } => ErrorKind::Transient,
            OrchestratorError::AggregationFailed { .. } => ErrorKind::Aggregation,
            OrchestratorError::CompletionChannelClosed => ErrorKind::Aggregation,
        }
    }
}
