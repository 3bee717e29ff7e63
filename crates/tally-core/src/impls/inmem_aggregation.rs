//! InMemoryAggregationService - runnable stand-in for the BLS aggregation
//! service.
//!
//! # 実装詳細
//! - one tokio task per session, fed through its own mpsc inbox
//! - each inbox message carries a oneshot so the caller learns whether its
//!   signature was accepted
//! - the session races its inbox against `sleep(time_to_expiry)`
//! - exactly one `AggregationOutcome` per session goes out on the shared
//!   completion channel
//!
//! Finished sessions keep their (closed) inbox handle for the life of the
//! service, one small entry per task index, so an index is never opened
//! twice. Long-running deployments replace this service with a chain-backed
//! one that owns its own retention.
//!
//! Threshold rule, per quorum q of the task:
//! `signed_stake(q) * 100 >= total_stake(q) * threshold(q)`.
//! Every quorum must pass for the same digest.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::domain::{
    AggregatedResponse, AggregationError, AggregationOutcome, BlockNumber, OperatorId, PublicKey,
    QuorumNum, ResponseDigest, SessionId, SessionState, Signature, TaskIndex, ThresholdPercentage,
};
use crate::ports::{AggregationService, OperatorStateReader, QuorumSnapshot, SignatureScheme};

const COMPLETION_BUFFER: usize = 1024;
const INBOX_BUFFER: usize = 64;

struct Submitted {
    digest: ResponseDigest,
    signature: Signature,
    operator_id: OperatorId,
    reply: oneshot::Sender<Result<(), AggregationError>>,
}

/// Handles of every session ever opened; finished ones stay so that a task
/// index can never be initialized twice.
type Inboxes = HashMap<TaskIndex, mpsc::Sender<Submitted>>;

pub struct InMemoryAggregationService {
    reader: Arc<dyn OperatorStateReader>,
    scheme: Arc<dyn SignatureScheme>,
    sessions: Mutex<Inboxes>,
    completions: mpsc::Sender<AggregationOutcome>,
}

impl InMemoryAggregationService {
    /// The receiver is the completion channel to hand to the aggregator.
    pub fn new(
        reader: Arc<dyn OperatorStateReader>,
        scheme: Arc<dyn SignatureScheme>,
    ) -> (Self, mpsc::Receiver<AggregationOutcome>) {
        let (completions, rx) = mpsc::channel(COMPLETION_BUFFER);
        (
            Self {
                reader,
                scheme,
                sessions: Mutex::new(HashMap::new()),
                completions,
            },
            rx,
        )
    }

    pub fn is_tracked(&self, task_index: TaskIndex) -> bool {
        self.lock_sessions().contains_key(&task_index)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, Inboxes> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_quorums(
    quorum_numbers: &[QuorumNum],
    thresholds: &[ThresholdPercentage],
) -> Result<(), AggregationError> {
    if quorum_numbers.is_empty() {
        return Err(AggregationError::EmptyQuorums);
    }
    if quorum_numbers.len() != thresholds.len() {
        return Err(AggregationError::QuorumLengthMismatch {
            quorums: quorum_numbers.len(),
            thresholds: thresholds.len(),
        });
    }
    let mut seen = HashSet::new();
    for (&quorum, &threshold) in quorum_numbers.iter().zip(thresholds) {
        if !seen.insert(quorum) {
            return Err(AggregationError::DuplicateQuorum(quorum));
        }
        if !threshold.is_valid() {
            return Err(AggregationError::InvalidThreshold { quorum, threshold });
        }
    }
    Ok(())
}

#[async_trait]
impl AggregationService for InMemoryAggregationService {
    async fn initialize_new_task(
        &self,
        task_index: TaskIndex,
        created_at_block: BlockNumber,
        quorum_numbers: Vec<QuorumNum>,
        quorum_threshold_percentages: Vec<ThresholdPercentage>,
        time_to_expiry: Duration,
    ) -> Result<(), AggregationError> {
        if self.is_tracked(task_index) {
            return Err(AggregationError::TaskAlreadyInitialized(task_index));
        }
        validate_quorums(&quorum_numbers, &quorum_threshold_percentages)?;

        let snapshots = self
            .reader
            .quorum_snapshots(&quorum_numbers, created_at_block)
            .await?;

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_BUFFER);
        {
            let mut sessions = self.lock_sessions();
            // reader の await 中に同じ index が登録されていないか再確認
            if sessions.contains_key(&task_index) {
                return Err(AggregationError::TaskAlreadyInitialized(task_index));
            }
            sessions.insert(task_index, inbox_tx);
        }

        let session = Session {
            id: SessionId::generate(),
            task_index,
            thresholds: quorum_threshold_percentages,
            quorum_numbers,
            snapshots,
            state: SessionState::Pending,
            tallies: HashMap::new(),
            scheme: Arc::clone(&self.scheme),
        };
        let span = tracing::info_span!("session", session_id = %session.id, task_index = %task_index);
        tracing::debug!(parent: &span, expiry_secs = time_to_expiry.as_secs(), "aggregation session opened");
        tokio::spawn(
            run_session(session, inbox_rx, time_to_expiry, self.completions.clone()).instrument(span),
        );
        Ok(())
    }

    async fn process_signed_response(
        &self,
        task_index: TaskIndex,
        digest: ResponseDigest,
        signature: Signature,
        operator_id: OperatorId,
    ) -> Result<(), AggregationError> {
        let inbox = self
            .lock_sessions()
            .get(&task_index)
            .cloned()
            .ok_or(AggregationError::TaskNotFound(task_index))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        inbox
            .send(Submitted {
                digest,
                signature,
                operator_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AggregationError::SessionClosed(task_index))?;

        // session finished before reading our message
        reply_rx
            .await
            .unwrap_or(Err(AggregationError::SessionClosed(task_index)))
    }
}

#[derive(Default)]
struct DigestTally {
    signers: BTreeMap<OperatorId, Signature>,
}

struct Session {
    id: SessionId,
    task_index: TaskIndex,
    quorum_numbers: Vec<QuorumNum>,
    thresholds: Vec<ThresholdPercentage>,
    /// Same order as `quorum_numbers`.
    snapshots: Vec<QuorumSnapshot>,
    state: SessionState,
    tallies: HashMap<ResponseDigest, DigestTally>,
    scheme: Arc<dyn SignatureScheme>,
}

impl Session {
    fn pubkey_of(&self, operator_id: &OperatorId) -> Option<PublicKey> {
        self.snapshots
            .iter()
            .find_map(|snapshot| snapshot.stake_of(operator_id))
            .map(|stake| stake.pubkey)
    }

    /// `Ok(Some(_))` when this signature completed the quorum.
    fn accept(
        &mut self,
        digest: ResponseDigest,
        signature: Signature,
        operator_id: OperatorId,
    ) -> Result<Option<AggregatedResponse>, AggregationError> {
        let pubkey = self
            .pubkey_of(&operator_id)
            .ok_or(AggregationError::UnknownOperator(operator_id))?;
        if !self.scheme.verify(&pubkey, &digest, &signature) {
            return Err(AggregationError::InvalidSignature(operator_id));
        }

        let tally = self.tallies.entry(digest).or_default();
        if tally.signers.contains_key(&operator_id) {
            return Err(AggregationError::DuplicateSignature(operator_id));
        }
        tally.signers.insert(operator_id, signature);

        if self.state == SessionState::Pending
            && let Err(err) = self.state.transition(SessionState::Collecting)
        {
            tracing::error!(error = %err, "session state out of sync");
        }

        if self.quorum_reached(&digest) {
            return Ok(Some(self.aggregate(digest)));
        }
        Ok(None)
    }

    fn quorum_reached(&self, digest: &ResponseDigest) -> bool {
        let Some(tally) = self.tallies.get(digest) else {
            return false;
        };
        self.snapshots
            .iter()
            .zip(&self.thresholds)
            .all(|(snapshot, threshold)| {
                let signed: u128 = snapshot
                    .operators
                    .iter()
                    .filter(|op| tally.signers.contains_key(&op.operator_id))
                    .map(|op| op.stake)
                    .sum();
                let total = snapshot.total_stake();
                signed.saturating_mul(100) >= total.saturating_mul(u128::from(threshold.0))
            })
    }

    fn aggregate(&self, digest: ResponseDigest) -> AggregatedResponse {
        let empty = DigestTally::default();
        let tally = self.tallies.get(&digest).unwrap_or(&empty);

        let signatures: Vec<Signature> = tally.signers.values().copied().collect();
        let signer_keys: Vec<PublicKey> = tally
            .signers
            .keys()
            .filter_map(|id| self.pubkey_of(id))
            .collect();

        // non-signers across all quorums, ordered by operator id
        let mut non_signers: BTreeMap<OperatorId, (PublicKey, u32)> = BTreeMap::new();
        for snapshot in &self.snapshots {
            for op in &snapshot.operators {
                if !tally.signers.contains_key(&op.operator_id) {
                    non_signers
                        .entry(op.operator_id)
                        .or_insert((op.pubkey, op.quorum_bitmap_index));
                }
            }
        }

        let non_signer_stake_indices: Vec<Vec<u32>> = self
            .snapshots
            .iter()
            .map(|snapshot| {
                non_signers
                    .keys()
                    .filter_map(|id| snapshot.stake_of(id).map(|op| op.stake_index))
                    .collect::<Vec<u32>>()
            })
            .collect();

        AggregatedResponse {
            task_index: self.task_index,
            digest,
            signers_agg_sig: self.scheme.aggregate_signatures(&signatures),
            signers_apk: self.scheme.aggregate_pubkeys(&signer_keys),
            quorum_apks: self
                .snapshots
                .iter()
                .map(|snapshot| {
                    let keys: Vec<PublicKey> = snapshot.operators.iter().map(|op| op.pubkey).collect();
                    self.scheme.aggregate_pubkeys(&keys)
                })
                .collect(),
            quorum_numbers: self.quorum_numbers.clone(),
            non_signers_pubkeys: non_signers.values().map(|(pk, _)| *pk).collect(),
            non_signer_quorum_bitmap_indices: non_signers.values().map(|(_, idx)| *idx).collect(),
            quorum_apk_indices: self.snapshots.iter().map(|s| s.apk_index).collect(),
            total_stake_indices: self.snapshots.iter().map(|s| s.total_stake_index).collect(),
            non_signer_stake_indices,
        }
    }
}

async fn run_session(
    mut session: Session,
    mut inbox: mpsc::Receiver<Submitted>,
    time_to_expiry: Duration,
    completions: mpsc::Sender<AggregationOutcome>,
) {
    let task_index = session.task_index;
    let deadline = tokio::time::sleep(time_to_expiry);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!(digests = session.tallies.len(), "session expired before quorum");
                break AggregationOutcome::Expired { task_index };
            }
            msg = inbox.recv() => {
                let Some(msg) = msg else {
                    break AggregationOutcome::Failed {
                        task_index,
                        reason: "aggregation service dropped".to_string(),
                    };
                };
                match session.accept(msg.digest, msg.signature, msg.operator_id) {
                    Ok(Some(aggregated)) => {
                        let _ = msg.reply.send(Ok(()));
                        tracing::info!(
                            digest = %aggregated.digest,
                            non_signers = aggregated.non_signers_pubkeys.len(),
                            "quorum reached"
                        );
                        break AggregationOutcome::Finalized(aggregated);
                    }
                    Ok(None) => {
                        tracing::debug!(operator = %msg.operator_id, digest = %msg.digest, "signature accepted");
                        let _ = msg.reply.send(Ok(()));
                    }
                    Err(err) => {
                        tracing::warn!(operator = %msg.operator_id, error = %err, "signature rejected");
                        let _ = msg.reply.send(Err(err));
                    }
                }
            }
        }
    };

    if let Err(err) = session.state.transition(outcome.state()) {
        tracing::error!(error = %err, "session finished twice");
        return;
    }
    // 受け取り側がいなければ誰も結果を待っていない
    if completions.send(outcome).await.is_err() {
        tracing::debug!("completion receiver dropped");
    }
}
