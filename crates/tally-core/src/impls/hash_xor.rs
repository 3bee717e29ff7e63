//! HashXorScheme - development signature scheme.
//!
//! signature = SHA-256(pubkey || digest), aggregation = byte-wise XOR.
//! Anyone who knows a public key can forge its signature: this exists so the
//! aggregation engine can be exercised without curve arithmetic. Never use it
//! outside tests and the demo binary.

use sha2::{Digest, Sha256};

use crate::domain::{OperatorId, PublicKey, ResponseDigest, Signature};
use crate::ports::SignatureScheme;

#[derive(Debug, Clone, Copy, Default)]
pub struct HashXorScheme;

impl HashXorScheme {
    pub fn sign(&self, pubkey: &PublicKey, digest: &ResponseDigest) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(pubkey.0);
        hasher.update(digest.as_bytes());
        Signature(hasher.finalize().into())
    }

    /// Deterministic key for an operator, so demos and tests can rebuild it.
    pub fn pubkey_for(operator_id: &OperatorId) -> PublicKey {
        let mut hasher = Sha256::new();
        hasher.update(b"tally-dev-key");
        hasher.update(operator_id.0);
        PublicKey(hasher.finalize().into())
    }

    /// Fresh random key.
    pub fn random_pubkey() -> PublicKey {
        PublicKey(rand::random())
    }
}

fn xor_all<'a>(items: impl IntoIterator<Item = &'a [u8; 32]>) -> [u8; 32] {
    let mut acc = [0u8; 32];
    for item in items {
        for (a, b) in acc.iter_mut().zip(item.iter()) {
            *a ^= b;
        }
    }
    acc
}

impl SignatureScheme for HashXorScheme {
    fn verify(&self, pubkey: &PublicKey, digest: &ResponseDigest, signature: &Signature) -> bool {
        self.sign(pubkey, digest) == *signature
    }

    fn aggregate_signatures(&self, signatures: &[Signature]) -> Signature {
        Signature(xor_all(signatures.iter().map(|s| &s.0)))
    }

    fn aggregate_pubkeys(&self, pubkeys: &[PublicKey]) -> PublicKey {
        PublicKey(xor_all(pubkeys.iter().map(|k| &k.0)))
    }
}
