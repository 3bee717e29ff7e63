//! RecordingChainWriter - in-memory stand-in for the task manager contract.
//!
//! Records every call it receives and can be told to fail, so tests can
//! assert exactly what would have gone on chain.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::{NonSignerStakesAndSignature, SubmissionError, Task, TaskIndex, TaskResponse};
use crate::ports::{ChainWriter, Clock, SystemClock, TxReceipt};

/// One recorded `respondToTask` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSubmission {
    pub task: Task,
    pub response: TaskResponse,
    pub proof: NonSignerStakesAndSignature,
    pub receipt: Option<TxReceipt>,
}

#[derive(Clone)]
pub struct RecordingChainWriter {
    submissions: Arc<Mutex<Vec<RecordedSubmission>>>,
    fail_with: Arc<Mutex<Option<SubmissionError>>>,
    clock: Arc<dyn Clock>,
}

impl RecordingChainWriter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            submissions: Arc::new(Mutex::new(Vec::new())),
            fail_with: Arc::new(Mutex::new(None)),
            clock,
        }
    }

    /// Fail every call with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<SubmissionError>) {
        *lock(&self.fail_with) = err;
    }

    /// Every call so far, failed ones included (their `receipt` is `None`).
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        lock(&self.submissions).clone()
    }

    pub fn submitted_indices(&self) -> Vec<TaskIndex> {
        lock(&self.submissions)
            .iter()
            .filter(|s| s.receipt.is_some())
            .map(|s| s.task.index)
            .collect()
    }
}

impl Default for RecordingChainWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChainWriter for RecordingChainWriter {
    async fn send_aggregated_response(
        &self,
        task: &Task,
        response: &TaskResponse,
        proof: &NonSignerStakesAndSignature,
    ) -> Result<TxReceipt, SubmissionError> {
        let failure = lock(&self.fail_with).clone();
        let receipt = match failure {
            Some(_) => None,
            None => Some(TxReceipt {
                tx_hash: format!("0x{}", hex::encode(rand::random::<[u8; 32]>())),
                submitted_at: self.clock.now(),
            }),
        };

        lock(&self.submissions).push(RecordedSubmission {
            task: task.clone(),
            response: response.clone(),
            proof: proof.clone(),
            receipt: receipt.clone(),
        });

        match (receipt, failure) {
            (Some(receipt), _) => Ok(receipt),
            (None, Some(err)) => Err(err),
            (None, None) => Err(SubmissionError::Transport("no receipt".into())),
        }
    }
}
