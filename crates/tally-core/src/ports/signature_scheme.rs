//! SignatureScheme port - the curve arithmetic the aggregator delegates.

use crate::domain::{PublicKey, ResponseDigest, Signature};

/// Verify and combine signatures.
///
/// Aggregation must be order independent: combining the same set in any
/// order yields the same value.
pub trait SignatureScheme: Send + Sync {
    fn verify(&self, pubkey: &PublicKey, digest: &ResponseDigest, signature: &Signature) -> bool;

    fn aggregate_signatures(&self, signatures: &[Signature]) -> Signature;

    fn aggregate_pubkeys(&self, pubkeys: &[PublicKey]) -> PublicKey;
}
