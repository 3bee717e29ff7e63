//! ChainWriter port - sends the aggregated response to the task manager
//! contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{NonSignerStakesAndSignature, SubmissionError, Task, TaskResponse};

/// Result of a mined submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// One attempt; the caller never retries.
    async fn send_aggregated_response(
        &self,
        task: &Task,
        response: &TaskResponse,
        proof: &NonSignerStakesAndSignature,
    ) -> Result<TxReceipt, SubmissionError>;
}
