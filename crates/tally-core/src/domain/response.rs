//! Operator responses and their content digests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::crypto::Signature;
use super::ids::{OperatorId, TaskIndex};

/// Content hash identifying one candidate result for a task.
///
/// Operators that disagree produce different digests; signatures are only
/// ever combined among operators that agree on the same digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResponseDigest(pub [u8; 32]);

impl ResponseDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ResponseDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ResponseDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseDigest({self})")
    }
}

/// The result an operator attests to for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_index: TaskIndex,
    pub result: serde_json::Value,
}

impl TaskResponse {
    pub fn new(task_index: TaskIndex, result: serde_json::Value) -> Self {
        Self { task_index, result }
    }

    /// SHA-256 over the canonical JSON encoding.
    ///
    /// `serde_json::Value` objects keep their keys sorted, and struct fields
    /// serialize in declaration order, so equal responses hash equally.
    pub fn digest(&self) -> ResponseDigest {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        ResponseDigest(Sha256::digest(&bytes).into())
    }
}

/// A response together with the operator's signature over its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTaskResponse {
    pub response: TaskResponse,
    pub signature: Signature,
    pub operator_id: OperatorId,
}

impl SignedTaskResponse {
    pub fn new(response: TaskResponse, signature: Signature, operator_id: OperatorId) -> Self {
        Self {
            response,
            signature,
            operator_id,
        }
    }
}
