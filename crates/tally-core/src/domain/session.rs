//! Aggregation session state machine and its terminal outcome.

use serde::{Deserialize, Serialize};

use super::crypto::{PublicKey, Signature};
use super::errors::SessionError;
use super::ids::{QuorumNum, TaskIndex};
use super::response::ResponseDigest;

/// Session state.
///
/// State transitions:
/// - Pending -> Collecting (first response arrives)
/// - Pending | Collecting -> Finalized (every quorum reached its threshold)
/// - Pending | Collecting -> Expired (deadline elapsed first)
/// - Pending | Collecting -> Failed (internal fault)
///
/// Only one terminal transition may ever happen per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Collecting,
    Finalized,
    Expired,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Finalized | SessionState::Expired | SessionState::Failed
        )
    }

    /// Apply a transition, refusing anything that leaves a terminal state.
    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        let allowed = match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (SessionState::Pending, SessionState::Collecting) => true,
            (SessionState::Collecting, SessionState::Collecting) => true,
            (_, to) => to.is_terminal(),
        };
        if !allowed {
            return Err(SessionError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

/// Everything the chain-side verifier needs to check one finalized response.
///
/// Index vectors point into the registry contracts' history arrays at the
/// block where the task was created; they are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub task_index: TaskIndex,
    pub digest: ResponseDigest,
    /// Combined signature of all signers.
    pub signers_agg_sig: Signature,
    /// Combined key of all signers (over all quorums).
    pub signers_apk: PublicKey,
    /// One combined key per quorum, in the task's quorum order.
    pub quorum_apks: Vec<PublicKey>,
    pub quorum_numbers: Vec<QuorumNum>,
    pub non_signers_pubkeys: Vec<PublicKey>,
    pub non_signer_quorum_bitmap_indices: Vec<u32>,
    pub quorum_apk_indices: Vec<u32>,
    pub total_stake_indices: Vec<u32>,
    /// `non_signer_stake_indices[quorum_pos][non_signer_pos]`
    pub non_signer_stake_indices: Vec<Vec<u32>>,
}

/// Terminal result of one aggregation session.
///
/// Exactly one of these is delivered per initialized task.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutcome {
    Finalized(AggregatedResponse),
    Expired { task_index: TaskIndex },
    Failed { task_index: TaskIndex, reason: String },
}

impl AggregationOutcome {
    pub fn task_index(&self) -> TaskIndex {
        match self {
            AggregationOutcome::Finalized(resp) => resp.task_index,
            AggregationOutcome::Expired { task_index } => *task_index,
            AggregationOutcome::Failed { task_index, .. } => *task_index,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            AggregationOutcome::Finalized(_) => SessionState::Finalized,
            AggregationOutcome::Expired { .. } => SessionState::Expired,
            AggregationOutcome::Failed { .. } => SessionState::Failed,
        }
    }
}
