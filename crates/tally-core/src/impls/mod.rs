//! Impls - 実装（開発用・テスト用）
//!
//! In-memory implementations of every port, so the aggregator runs and can be
//! tested end to end without a chain node.
//!
//! # 含まれる実装
//! - **InMemoryEventSource**: scriptable log subscriptions (failure injection)
//! - **InMemoryAggregationService**: per-task quorum aggregation engine
//! - **RecordingChainWriter**: records submissions instead of sending them
//! - **StaticOperatorRegistry**: fixed operator stake table
//! - **HashXorScheme**: insecure development signature scheme
//!
//! # 本番用実装
//! Chain-backed implementations (RPC subscriptions, contract bindings, BLS
//! arithmetic) belong in separate crates.

pub mod hash_xor;
pub mod inmem_aggregation;
pub mod inmem_chain;
pub mod inmem_events;
pub mod static_registry;

// 主要な型を再エクスポート
pub use self::hash_xor::HashXorScheme;
pub use self::inmem_aggregation::InMemoryAggregationService;
pub use self::inmem_chain::{RecordedSubmission, RecordingChainWriter};
pub use self::inmem_events::{EventStream, InMemoryEventSource};
pub use self::static_registry::StaticOperatorRegistry;
