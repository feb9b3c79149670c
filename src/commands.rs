//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bridge_core::{ChangeSource, EventPublisher, EventType, TableSpec};
use checkpoint::{Checkpoint, CheckpointManager, FilesystemStore};
use pos_bridge_amqp::{AmqpPublisher, Topology};
use pos_bridge_pipeline::{PipelineState, Scheduler, TableProcessor, WatermarkCheckpoint};
use pos_bridge_postgresql::{
    install_change_log, new_postgresql_pool, PostgresChangeSource, QueryRegistry,
};
use tokio::sync::watch;
use tracing::info;

use crate::config::{load_policy, resolve_tables};
use crate::{BrokerOpts, DatabaseOpts, RunOpts, TableOpts};

/// Create the change log and the tracking trigger of every tracked table.
pub async fn setup(database: &DatabaseOpts, tables: &TableOpts) -> anyhow::Result<()> {
    let tables = resolve_tables(&tables.tables)?;
    let registry = QueryRegistry::new(&tables)?;
    let pool = new_postgresql_pool(&database.into()).await?;

    let client = pool
        .get()
        .await
        .context("Failed to get a database connection")?;
    install_change_log(&client, &registry).await?;
    drop(client);

    PostgresChangeSource::new(pool, registry)
        .validate()
        .await
        .context("Schema validation failed after setup")?;
    info!("Change log installed for {} table(s)", tables.len());
    Ok(())
}

/// Declare the exchange, queues and dead-letter queues, then disconnect.
pub async fn declare_topology(broker: &BrokerOpts) -> anyhow::Result<()> {
    let publisher = AmqpPublisher::new(broker.into(), Topology::default());
    publisher.initialize().await?;
    for binding in &publisher.topology().queues {
        info!(
            "{} -> {} (dead letters: {})",
            binding.routing_key, binding.queue, binding.dead_letter_queue
        );
    }
    publisher.close().await;
    Ok(())
}

/// Run the bridge until `shutdown` flips to `true`.
///
/// Fails before the first cycle when the database or the broker cannot be
/// reached, or a tracked table does not match what the bridge expects.
pub async fn run(opts: RunOpts, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let policy = load_policy(opts.policy_file.as_deref())?;
    let tables = resolve_tables(&opts.tables.tables)?;
    let registry = QueryRegistry::new(&tables)?;

    let pool = new_postgresql_pool(&(&opts.database).into()).await?;
    let source = PostgresChangeSource::new(pool, registry);
    source
        .validate()
        .await
        .context("Tracked tables failed validation (has `setup` been run?)")?;
    let source: Arc<dyn ChangeSource> = Arc::new(source);

    let event_types: Vec<EventType> = tables.iter().map(|t| t.event_type).collect();
    let publisher = Arc::new(AmqpPublisher::new(
        (&opts.broker).into(),
        Topology::new(&event_types),
    ));
    publisher.initialize().await?;

    let checkpoints = opts.checkpoint_dir.as_ref().map(|dir| {
        info!("Watermark checkpoints in {}", dir.display());
        CheckpointManager::new(Arc::new(FilesystemStore::new(dir)))
    });

    let state = PipelineState::new(policy);
    state
        .initialize_watermarks(source.as_ref(), &tables, checkpoints.as_ref())
        .await
        .context("Failed to initialize watermarks")?;

    let host = opts.source_name.clone().unwrap_or_else(source_host);
    info!("Publishing as '{}'", host);

    let processors = build_processors(&tables, &source, publisher.clone(), &state, &host);
    let result = Scheduler::new(processors, state, checkpoints)
        .run(shutdown)
        .await;

    publisher.close().await;
    result
}

fn build_processors(
    tables: &[TableSpec],
    source: &Arc<dyn ChangeSource>,
    publisher: Arc<dyn EventPublisher>,
    state: &Arc<PipelineState>,
    host: &str,
) -> Vec<TableProcessor> {
    tables
        .iter()
        .map(|table| {
            TableProcessor::new(
                table.clone(),
                source.clone(),
                publisher.clone(),
                state.clone(),
                host,
            )
        })
        .collect()
}

fn source_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Print every stored watermark.
pub async fn list_checkpoints(dir: &Path) -> anyhow::Result<Vec<WatermarkCheckpoint>> {
    let manager = CheckpointManager::new(Arc::new(FilesystemStore::new(dir)));
    let mut watermarks = Vec::new();
    for file in manager.list().await? {
        if file.checkpoint_type() != WatermarkCheckpoint::CHECKPOINT_TYPE {
            continue;
        }
        let watermark: WatermarkCheckpoint = file.parse()?;
        println!(
            "{}\t{}",
            watermark.to_cli_string(),
            watermark.timestamp.to_rfc3339()
        );
        watermarks.push(watermark);
    }
    if watermarks.is_empty() {
        println!("No watermark checkpoints in {}", dir.display());
    }
    Ok(watermarks)
}

/// Store a watermark given as `table:version`, e.g. to replay or skip a range.
pub async fn set_checkpoint(dir: &Path, value: &str) -> anyhow::Result<WatermarkCheckpoint> {
    let watermark = WatermarkCheckpoint::from_cli_string(value)
        .with_context(|| format!("Invalid watermark '{value}' (expected table:version)"))?;
    let manager = CheckpointManager::new(Arc::new(FilesystemStore::new(dir)));
    manager.save(&watermark.table, &watermark).await?;
    info!(
        "Set watermark of {} to {}",
        watermark.table, watermark.version
    );
    Ok(watermark)
}
