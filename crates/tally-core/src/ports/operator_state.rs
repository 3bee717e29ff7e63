//! OperatorStateReader port - stake snapshots per quorum at a block.
//!
//! Only the aggregation engine reads this; the aggregator itself never does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AggregationError, BlockNumber, OperatorId, PublicKey, QuorumNum};

/// One operator's standing in one quorum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorStake {
    pub operator_id: OperatorId,
    pub pubkey: PublicKey,
    pub stake: u128,
    /// Index into the operator's quorum bitmap history.
    pub quorum_bitmap_index: u32,
    /// Index into the operator's stake history for this quorum.
    pub stake_index: u32,
}

/// All operators of one quorum at a given block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuorumSnapshot {
    pub quorum: QuorumNum,
    pub operators: Vec<OperatorStake>,
    pub apk_index: u32,
    pub total_stake_index: u32,
}

impl QuorumSnapshot {
    pub fn total_stake(&self) -> u128 {
        self.operators.iter().map(|op| op.stake).sum()
    }

    pub fn stake_of(&self, operator_id: &OperatorId) -> Option<&OperatorStake> {
        self.operators.iter().find(|op| &op.operator_id == operator_id)
    }
}

#[async_trait]
pub trait OperatorStateReader: Send + Sync {
    /// Snapshots in the same order as `quorums`.
    async fn quorum_snapshots(
        &self,
        quorums: &[QuorumNum],
        block: BlockNumber,
    ) -> Result<Vec<QuorumSnapshot>, AggregationError>;
}
