use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::time::{Duration, interval, sleep, timeout};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tally_core::domain::{
    BlockNumber, OperatorId, QuorumNum, SignedTaskResponse, Task, TaskCreated, TaskIndex,
    TaskPayload, TaskResponse, ThresholdPercentage,
};
use tally_core::impls::{
    HashXorScheme, InMemoryAggregationService, InMemoryEventSource, RecordingChainWriter,
    StaticOperatorRegistry,
};
use tally_core::{Aggregator, AggregatorBuilder, AggregatorConfig, TaskRegistry};

#[derive(Debug, Parser)]
#[command(name = "tally", about = "Task-response signature aggregator")]
struct Cli {
    /// JSON config file; `TALLY_*` env vars override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operators registered in quorum 0, equal stake each
    #[arg(long, global = true, default_value_t = 3)]
    operators: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the aggregator until Ctrl-C
    Run,
    /// Publish one task, have every operator sign it, print the submission
    Demo {
        #[arg(long, default_value_t = 9)]
        number: u64,
    },
}

/// Wired aggregator plus the in-memory handles the demo drives.
struct Node {
    aggregator: Aggregator,
    events: Arc<InMemoryEventSource>,
    aggregation: Arc<InMemoryAggregationService>,
    writer: RecordingChainWriter,
}

fn init_tracing() {
    // RUST_LOG 未指定なら info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build_node(config: AggregatorConfig, operators: u8) -> anyhow::Result<Node> {
    if operators == 0 {
        bail!("--operators must be at least 1");
    }
    let registry = StaticOperatorRegistry::uniform(&[QuorumNum(0)], operators, 100);
    let events = Arc::new(InMemoryEventSource::new());
    let (service, completions) =
        InMemoryAggregationService::new(Arc::new(registry), Arc::new(HashXorScheme));
    let aggregation = Arc::new(service);
    let writer = RecordingChainWriter::new();

    let aggregator = AggregatorBuilder::new()
        .config(config)
        .event_source(events.clone())
        .aggregation(aggregation.clone(), completions)
        .chain_writer(Arc::new(writer.clone()))
        .build()
        .context("wiring aggregator")?;

    Ok(Node {
        aggregator,
        events,
        aggregation,
        writer,
    })
}

/// Drop tasks whose challenge window closed long ago, resolved or not.
async fn prune_loop(registry: Arc<TaskRegistry>, window: Duration) {
    let retention = window.saturating_mul(2);
    let mut tick = interval(window);
    loop {
        tick.tick().await;
        let pruned = registry.prune_older_than(retention).await;
        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "pruned tasks past their challenge window");
        }
    }
}

async fn run(node: Node) -> anyhow::Result<()> {
    let pruner = tokio::spawn(prune_loop(
        node.aggregator.registry(),
        node.aggregator.config().time_to_expiry(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(node.aggregator.run(shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            tracing::info!("ctrl-c received");
            let _ = shutdown_tx.send(true);
            handle.await.context("aggregator task panicked")??;
        }
        finished = &mut handle => {
            pruner.abort();
            finished.context("aggregator task panicked")??;
        }
    }
    pruner.abort();
    Ok(())
}

async fn demo(node: Node, operators: u8, number: u64) -> anyhow::Result<()> {
    let Node {
        aggregator,
        events,
        aggregation,
        writer,
    } = node;
    let intake = aggregator.intake();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(aggregator.run(shutdown_rx));

    let index = TaskIndex::new(0);
    let task = Task::uniform_thresholds(
        index,
        TaskPayload::new(serde_json::json!({ "numberToBeSquared": number })),
        vec![QuorumNum(0)],
        ThresholdPercentage(66),
        BlockNumber::new(1),
    );
    events.publish_task_created(TaskCreated::new(task)).await;

    timeout(Duration::from_secs(5), async {
        while !aggregation.is_tracked(index) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("task session never opened")?;

    let squared = u128::from(number) * u128::from(number);
    let response = TaskResponse::new(index, serde_json::json!({ "numberSquared": squared.to_string() }));
    for low in 1..=operators {
        let operator = OperatorId::from_low_byte(low);
        let signature = HashXorScheme.sign(&HashXorScheme::pubkey_for(&operator), &response.digest());
        let signed = SignedTaskResponse::new(response.clone(), signature, operator);
        match intake.process_signed_task_response(signed).await {
            Ok(digest) => tracing::info!(%operator, %digest, "response accepted"),
            // 定足数に達した後の署名は拒否される
            Err(err) => tracing::info!(%operator, error = %err, "response not taken"),
        }
    }

    timeout(Duration::from_secs(5), async {
        while writer.submissions().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("no submission reached the chain writer")?;

    for submission in writer.submissions() {
        let printed = serde_json::json!({
            "task": submission.task,
            "response": submission.response,
            "proof": submission.proof,
            "receipt": submission.receipt,
        });
        println!("{}", serde_json::to_string_pretty(&printed)?);
    }

    let _ = shutdown_tx.send(true);
    handle.await.context("aggregator task panicked")??;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AggregatorConfig::load(cli.config.as_deref()).context("loading config")?;
    let node = build_node(config, cli.operators)?;

    match cli.command {
        Command::Run => run(node).await,
        Command::Demo { number } => demo(node, cli.operators, number).await,
    }
}
