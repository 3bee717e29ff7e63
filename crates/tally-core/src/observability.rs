//! Counters and a serializable snapshot of aggregator activity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub tasks_received: u64,
    pub tasks_rejected: u64,
    pub task_responses_observed: u64,
    pub responses_accepted: u64,
    pub submissions_sent: u64,
    pub submissions_failed: u64,
    pub submissions_skipped: u64,
    pub aggregations_failed: u64,
    pub resubscriptions: u64,
}

/// Lock-free counters shared by the loop, the pipeline and the intake.
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_received: AtomicU64,
    tasks_rejected: AtomicU64,
    task_responses_observed: AtomicU64,
    responses_accepted: AtomicU64,
    submissions_sent: AtomicU64,
    submissions_failed: AtomicU64,
    submissions_skipped: AtomicU64,
    aggregations_failed: AtomicU64,
    resubscriptions: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Metrics {
    counter!(inc_tasks_received, tasks_received);
    counter!(inc_tasks_rejected, tasks_rejected);
    counter!(inc_task_responses_observed, task_responses_observed);
    counter!(inc_responses_accepted, responses_accepted);
    counter!(inc_submissions_sent, submissions_sent);
    counter!(inc_submissions_failed, submissions_failed);
    counter!(inc_submissions_skipped, submissions_skipped);
    counter!(inc_aggregations_failed, aggregations_failed);
    counter!(inc_resubscriptions, resubscriptions);

    pub fn snapshot(&self) -> AggregatorStats {
        AggregatorStats {
            tasks_received: self.tasks_received.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            task_responses_observed: self.task_responses_observed.load(Ordering::Relaxed),
            responses_accepted: self.responses_accepted.load(Ordering::Relaxed),
            submissions_sent: self.submissions_sent.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            submissions_skipped: self.submissions_skipped.load(Ordering::Relaxed),
            aggregations_failed: self.aggregations_failed.load(Ordering::Relaxed),
            resubscriptions: self.resubscriptions.load(Ordering::Relaxed),
        }
    }
}
