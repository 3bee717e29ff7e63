//! tally-core
//!
//! Core of the tally task-verification aggregator: tracks tasks published on
//! chain, collects operator signatures into per-task quorum sessions, and
//! submits each finalized aggregate back on chain at most once.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, response, session, proof, errors, events）
//! - **ports**: 抽象化レイヤー（TaskEventSource, AggregationService, ChainWriter, OperatorStateReader, SignatureScheme, Clock）
//! - **app**: アプリケーションロジック（registry, dispatcher, submission, intake, builder, retry）
//! - **impls**: in-memory implementations of every port
//! - **config**: typed configuration (JSON file + `TALLY_*` env)
//! - **observability**: counters and their snapshot

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{
    Aggregator, AggregatorBuilder, BuildError, ResponseIntake, ResubscribePolicy, SkipReason,
    SubmissionPipeline, SubmissionReport, TaskRegistry,
};
pub use config::{AggregationFailurePolicy, AggregatorConfig, ConfigError};
pub use observability::{AggregatorStats, Metrics};
