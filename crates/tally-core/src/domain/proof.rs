//! On-chain proof payload built from a finalized aggregate.

use serde::{Deserialize, Serialize};

use super::crypto::{PublicKey, Signature};
use super::session::AggregatedResponse;

/// Argument of the signature checker contract.
///
/// The four pubkey/signature fields are computed off chain by the
/// aggregation engine; the four index fields locate the stake history entries
/// at the task's creation block so the verifier can recompute stakes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonSignerStakesAndSignature {
    pub non_signer_quorum_bitmap_indices: Vec<u32>,
    pub non_signer_pubkeys: Vec<PublicKey>,
    pub quorum_apks: Vec<PublicKey>,
    pub apk_g2: PublicKey,
    pub sigma: Signature,
    pub quorum_apk_indices: Vec<u32>,
    pub total_stake_indices: Vec<u32>,
    pub non_signer_stake_indices: Vec<Vec<u32>>,
}

impl From<&AggregatedResponse> for NonSignerStakesAndSignature {
    fn from(resp: &AggregatedResponse) -> Self {
        Self {
            non_signer_quorum_bitmap_indices: resp.non_signer_quorum_bitmap_indices.clone(),
            non_signer_pubkeys: resp.non_signers_pubkeys.clone(),
            quorum_apks: resp.quorum_apks.clone(),
            apk_g2: resp.signers_apk,
            sigma: resp.signers_agg_sig,
            quorum_apk_indices: resp.quorum_apk_indices.clone(),
            total_stake_indices: resp.total_stake_indices.clone(),
            non_signer_stake_indices: resp.non_signer_stake_indices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QuorumNum, ResponseDigest, TaskIndex};

    #[test]
    fn proof_carries_aggregate_material() {
        let resp = AggregatedResponse {
            task_index: TaskIndex::new(1),
            digest: ResponseDigest([1; 32]),
            signers_agg_sig: Signature([2; 32]),
            signers_apk: PublicKey([3; 32]),
            quorum_apks: vec![PublicKey([4; 32])],
            quorum_numbers: vec![QuorumNum(0)],
            non_signers_pubkeys: vec![PublicKey([5; 32])],
            non_signer_quorum_bitmap_indices: vec![7],
            quorum_apk_indices: vec![8],
            total_stake_indices: vec![9],
            non_signer_stake_indices: vec![vec![10]],
        };

        let proof = NonSignerStakesAndSignature::from(&resp);
        assert_eq!(proof.sigma, Signature([2; 32]));
        assert_eq!(proof.apk_g2, PublicKey([3; 32]));
        assert_eq!(proof.non_signer_pubkeys, vec![PublicKey([5; 32])]);
        assert_eq!(proof.non_signer_stake_indices, vec![vec![10]]);
    }
}
