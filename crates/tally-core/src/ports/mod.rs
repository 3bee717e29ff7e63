//! Ports - the seams to external collaborators.
//!
//! Each trait hides one system the aggregator talks to: the chain event
//! stream, the aggregation engine, the chain writer, the operator registry,
//! the signature scheme, and the wall clock. In-memory implementations live
//! in `impls`.

pub mod aggregation;
pub mod chain_writer;
pub mod clock;
pub mod event_source;
pub mod operator_state;
pub mod signature_scheme;

pub use self::aggregation::AggregationService;
pub use self::chain_writer::{ChainWriter, TxReceipt};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_source::{Subscription, SubscriptionFeed, TaskEventSource};
pub use self::operator_state::{OperatorStake, OperatorStateReader, QuorumSnapshot};
pub use self::signature_scheme::SignatureScheme;
