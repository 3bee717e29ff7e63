//! App - アプリケーション層
//!
//! Combines the ports into the aggregator itself.
//!
//! # 主要コンポーネント
//! - **TaskRegistry**: tasks and responses, two independent locks
//! - **Aggregator**: the coordinating event loop (`run`)
//! - **SubmissionPipeline**: finalized aggregate -> one chain call
//! - **ResponseIntake**: operator-facing signed-response entry point
//! - **AggregatorBuilder**: wiring with fail-fast validation
//! - **ResubscribePolicy**: backoff for dropped subscriptions

pub mod builder;
pub mod dispatcher;
pub mod intake;
pub mod registry;
pub mod retry;
pub mod submission;

// 主要な型を再エクスポート
pub use self::builder::{AggregatorBuilder, BuildError};
pub use self::dispatcher::Aggregator;
pub use self::intake::ResponseIntake;
pub use self::registry::TaskRegistry;
pub use self::retry::ResubscribePolicy;
pub use self::submission::{SkipReason, SubmissionPipeline, SubmissionReport};
