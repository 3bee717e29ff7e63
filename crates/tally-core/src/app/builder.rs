//! AggregatorBuilder - wiring and start-up validation.
//!
//! # Fail-fast
//! - every required port must be supplied; `build()` lists all the missing
//!   ones at once instead of failing on the first
//! - the config is validated here so a bad file never reaches the loop

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::app::dispatcher::Aggregator;
use crate::app::registry::TaskRegistry;
use crate::app::submission::SubmissionPipeline;
use crate::config::{AggregatorConfig, ConfigError};
use crate::domain::AggregationOutcome;
use crate::observability::Metrics;
use crate::ports::{AggregationService, ChainWriter, Clock, TaskEventSource};

/// # 使用例
/// ```ignore
/// let (service, completions) = InMemoryAggregationService::new(reader, scheme);
/// let aggregator = AggregatorBuilder::new()
///     .config(config)
///     .event_source(Arc::new(events))
///     .aggregation(Arc::new(service), completions)
///     .chain_writer(Arc::new(writer))
///     .build()?;
/// ```
pub struct AggregatorBuilder {
    config: AggregatorConfig,
    event_source: Option<Arc<dyn TaskEventSource>>,
    aggregation: Option<(Arc<dyn AggregationService>, mpsc::Receiver<AggregationOutcome>)>,
    chain_writer: Option<Arc<dyn ChainWriter>>,
    registry: Option<Arc<TaskRegistry>>,
    clock: Option<Arc<dyn Clock>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing components: {0:?}. These must be supplied before build().")]
    MissingComponents(Vec<&'static str>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl AggregatorBuilder {
    pub fn new() -> Self {
        Self {
            config: AggregatorConfig::default(),
            event_source: None,
            aggregation: None,
            chain_writer: None,
            registry: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_source(mut self, source: Arc<dyn TaskEventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    /// The engine and the receiving end of its completion channel.
    pub fn aggregation(
        mut self,
        service: Arc<dyn AggregationService>,
        completions: mpsc::Receiver<AggregationOutcome>,
    ) -> Self {
        self.aggregation = Some((service, completions));
        self
    }

    pub fn chain_writer(mut self, writer: Arc<dyn ChainWriter>) -> Self {
        self.chain_writer = Some(writer);
        self
    }

    /// Share an existing registry. A fresh one is created otherwise.
    pub fn registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Clock for the registry created by `build()`. Ignored when a registry is
    /// supplied.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Aggregator, BuildError> {
        let mut missing = Vec::new();
        if self.event_source.is_none() {
            missing.push("event_source");
        }
        if self.aggregation.is_none() {
            missing.push("aggregation");
        }
        if self.chain_writer.is_none() {
            missing.push("chain_writer");
        }

        let (Some(events), Some((aggregation, completions)), Some(writer)) =
            (self.event_source, self.aggregation, self.chain_writer)
        else {
            return Err(BuildError::MissingComponents(missing));
        };

        self.config.validate()?;

        let registry = match (self.registry, self.clock) {
            (Some(registry), _) => registry,
            (None, Some(clock)) => Arc::new(TaskRegistry::with_clock(clock)),
            (None, None) => Arc::new(TaskRegistry::new()),
        };
        let metrics = Arc::new(Metrics::default());
        let pipeline = SubmissionPipeline::new(
            Arc::clone(&registry),
            writer,
            Arc::clone(&metrics),
            self.config.retain_finalized,
        );

        Ok(Aggregator::new(
            self.config,
            events,
            aggregation,
            completions,
            registry,
            pipeline,
            metrics,
        ))
    }
}

impl Default for AggregatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
