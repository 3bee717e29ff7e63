//! SubmissionPipeline - turns a finalized aggregate into one on-chain call.
//!
//! Flow:
//! 1. claim the per-task marker (a task is submitted at most once)
//! 2. look up the task and the agreed response in the registry
//! 3. build `NonSignerStakesAndSignature`
//! 4. `ChainWriter::send_aggregated_response`, exactly one attempt
//!
//! Every miss is a logged skip, never a panic. A failed send leaves the task
//! unresolved and releases the marker.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::app::registry::TaskRegistry;
use crate::domain::{AggregatedResponse, NonSignerStakesAndSignature, SubmissionError, TaskIndex};
use crate::observability::Metrics;
use crate::ports::{ChainWriter, TxReceipt};

/// Why a finalized aggregate was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The task is not (or no longer) in the registry.
    MissingTask,
    /// No response was recorded under the finalized digest.
    MissingResponse,
    /// A submission for this task already went through.
    AlreadySubmitted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionReport {
    Submitted(TxReceipt),
    Skipped(SkipReason),
    Failed(SubmissionError),
}

impl SubmissionReport {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmissionReport::Submitted(_))
    }
}

pub struct SubmissionPipeline {
    registry: Arc<TaskRegistry>,
    writer: Arc<dyn ChainWriter>,
    submitted: Mutex<HashSet<TaskIndex>>,
    metrics: Arc<Metrics>,
    retain_finalized: bool,
}

impl SubmissionPipeline {
    pub fn new(
        registry: Arc<TaskRegistry>,
        writer: Arc<dyn ChainWriter>,
        metrics: Arc<Metrics>,
        retain_finalized: bool,
    ) -> Self {
        Self {
            registry,
            writer,
            submitted: Mutex::new(HashSet::new()),
            metrics,
            retain_finalized,
        }
    }

    pub fn is_submitted(&self, index: TaskIndex) -> bool {
        self.lock_submitted().contains(&index)
    }

    pub async fn submit(&self, aggregated: &AggregatedResponse) -> SubmissionReport {
        let index = aggregated.task_index;
        let digest = aggregated.digest;

        if !self.lock_submitted().insert(index) {
            tracing::warn!(task_index = %index, "task already submitted, ignoring second aggregate");
            return self.skip(SkipReason::AlreadySubmitted);
        }

        let Some(task) = self.registry.get_task(index).await else {
            tracing::warn!(task_index = %index, "finalized task not found in registry, skipping submission");
            self.release(index);
            return self.skip(SkipReason::MissingTask);
        };
        let Some(response) = self.registry.get_response(index, &digest).await else {
            tracing::warn!(
                task_index = %index,
                digest = %digest,
                "no response recorded for finalized digest, skipping submission"
            );
            self.release(index);
            return self.skip(SkipReason::MissingResponse);
        };

        let registered_at = self.registry.registered_at(index).await;
        let proof = NonSignerStakesAndSignature::from(aggregated);
        tracing::info!(
            task_index = %index,
            digest = %digest,
            non_signers = proof.non_signer_pubkeys.len(),
            "sending aggregated response"
        );

        // no registry guard is held across this await
        match self
            .writer
            .send_aggregated_response(&task, &response, &proof)
            .await
        {
            Ok(receipt) => {
                self.metrics.inc_submissions_sent();
                tracing::info!(
                    task_index = %index,
                    tx_hash = %receipt.tx_hash,
                    since_registered_ms = registered_at
                        .map(|at| (receipt.submitted_at - at).num_milliseconds()),
                    "aggregated response submitted"
                );
                if !self.retain_finalized {
                    self.registry.remove_task(index).await;
                }
                SubmissionReport::Submitted(receipt)
            }
            Err(err) => {
                self.metrics.inc_submissions_failed();
                tracing::error!(task_index = %index, error = %err, kind = ?err.kind(), "failed to send aggregated response");
                self.release(index);
                SubmissionReport::Failed(err)
            }
        }
    }

    fn skip(&self, reason: SkipReason) -> SubmissionReport {
        self.metrics.inc_submissions_skipped();
        SubmissionReport::Skipped(reason)
    }

    fn release(&self, index: TaskIndex) {
        self.lock_submitted().remove(&index);
    }

    fn lock_submitted(&self) -> std::sync::MutexGuard<'_, HashSet<TaskIndex>> {
        // 中身は HashSet だけなので poison されても使い続けて問題ない
        self.submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
