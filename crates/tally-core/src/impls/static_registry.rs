//! StaticOperatorRegistry - fixed operator table.
//!
//! Stakes do not change with block height; every query sees the same table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::{AggregationError, BlockNumber, OperatorId, QuorumNum};
use crate::impls::hash_xor::HashXorScheme;
use crate::ports::{OperatorStake, OperatorStateReader, QuorumSnapshot};

#[derive(Debug, Default)]
pub struct StaticOperatorRegistry {
    quorums: BTreeMap<QuorumNum, QuorumSnapshot>,
    unavailable: AtomicBool,
}

impl StaticOperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `operators` operators with equal `stake` in every quorum, keyed with
    /// `HashXorScheme::pubkey_for`. Operator ids are `1..=operators`.
    pub fn uniform(quorums: &[QuorumNum], operators: u8, stake: u128) -> Self {
        let mut registry = Self::new();
        for &quorum in quorums {
            for n in 1..=operators {
                registry = registry.with_operator(quorum, OperatorId::from_low_byte(n), stake);
            }
        }
        registry
    }

    /// Add an operator to `quorum`. Indices are assigned in insertion order.
    pub fn with_operator(mut self, quorum: QuorumNum, operator_id: OperatorId, stake: u128) -> Self {
        let snapshot = self.quorums.entry(quorum).or_insert_with(|| QuorumSnapshot {
            quorum,
            operators: Vec::new(),
            apk_index: u32::from(quorum.0),
            total_stake_index: u32::from(quorum.0),
        });
        let position = snapshot.operators.len() as u32;
        snapshot.operators.push(OperatorStake {
            operator_id,
            pubkey: HashXorScheme::pubkey_for(&operator_id),
            stake,
            quorum_bitmap_index: position,
            stake_index: position,
        });
        self
    }

    /// Make every subsequent query fail, as an unreachable RPC node would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl OperatorStateReader for StaticOperatorRegistry {
    async fn quorum_snapshots(
        &self,
        quorums: &[QuorumNum],
        block: BlockNumber,
    ) -> Result<Vec<QuorumSnapshot>, AggregationError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AggregationError::OperatorState(format!(
                "operator state at {block} is unavailable"
            )));
        }
        quorums
            .iter()
            .map(|quorum| {
                self.quorums.get(quorum).cloned().ok_or_else(|| {
                    AggregationError::OperatorState(format!("{quorum} has no registered operators"))
                })
            })
            .collect()
    }
}
