//! Domain model (ids, tasks, responses, sessions, proofs, errors).
//!
//! Everything here is plain data plus the session state machine; no I/O and
//! no locking.

pub mod crypto;
pub mod errors;
pub mod events;
pub mod ids;
pub mod proof;
pub mod response;
pub mod session;
pub mod task;

pub use crypto::{PublicKey, Signature};
pub use errors::{
    AggregationError, ErrorKind, IntakeError, OrchestratorError, RegistryError, SessionError,
    SubmissionError, SubscriptionError,
};
pub use events::{TaskCreated, TaskResponded};
pub use ids::{BlockNumber, OperatorId, QuorumNum, SessionId, TaskIndex, ThresholdPercentage};
pub use proof::NonSignerStakesAndSignature;
pub use response::{ResponseDigest, SignedTaskResponse, TaskResponse};
pub use session::{AggregatedResponse, AggregationOutcome, SessionState};
pub use task::{Task, TaskPayload};
