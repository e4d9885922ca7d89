//! ifthen-engine: evaluates measurement events against rules and dispatches
//! the resulting triggers to target agents.
//!
//! # Usage
//!
//! ```bash
//! # Rules from YAML files, events from SQS
//! ifthen-engine --rules-dir data/rules --queue sqs
//!
//! # Local run: one AgentResult JSON per stdin line, rule files hot-reloaded
//! cat events.jsonl | ifthen-engine --queue stdin --watch
//!
//! # Shared PostgreSQL rule store
//! IFTHEN_PROFILE=PROD ifthen-engine --store postgres
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use ifthen_core::config::{self, Config};
use ifthen_engine::{
    spawn_health_server, EngineMetrics, HealthState, IngestionListener, ListenerConfig, Pipeline,
};
use ifthen_queue::{MemoryQueue, QueueConsumer, SqsConsumer};
use ifthen_rules::{MemoryRuleStore, RuleStore};
use ifthen_storage::loader::summarize;
use ifthen_storage::{LoadStatus, PgRuleStore, RuleFileLoader};
use ifthen_targets::{Dispatcher, TargetRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueueKind {
    Sqs,
    Stdin,
}

/// Rule evaluation and dispatch engine.
#[derive(Parser, Debug)]
#[command(name = "ifthen-engine", version, about)]
struct Cli {
    /// Directory of YAML rule files. Overrides `RULES_DIR`; with the
    /// postgres store the files are upserted at startup.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Rule store backend (defaults to `RULE_STORE`, then memory).
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// Event source: SQS, or one JSON message per stdin line.
    #[arg(long, value_enum, env = "ENGINE_QUEUE", default_value = "sqs")]
    queue: QueueKind,

    /// Maximum messages processed concurrently.
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Port for /health, /metrics, /targets and /config (0 = disabled).
    #[arg(long)]
    health_port: Option<u16>,

    /// Hot-reload rule files on change (memory store only).
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(dir) = &cli.rules_dir {
        cfg.store.rules_dir = dir.clone();
    }
    if let Some(n) = cli.max_in_flight {
        cfg.engine.max_in_flight = n.max(1);
    }
    if let Some(port) = cli.health_port {
        cfg.health.enabled = port > 0;
        cfg.health.port = port;
    }
    if let Some(kind) = cli.store {
        cfg.store.backend = match kind {
            StoreKind::Memory => "memory",
            StoreKind::Postgres => "postgres",
        }
        .to_string();
    }
    cfg.store.watch |= cli.watch;
    cfg.log_summary();

    let store_kind = StoreKind::from_str(&cfg.store.backend, true)
        .map_err(|_| anyhow::anyhow!("unknown rule store backend '{}'", cfg.store.backend))?;

    // Held until shutdown so the watcher stays alive.
    let (store, _loader) = build_store(store_kind, cli.rules_dir.is_some(), &cfg).await?;

    let registry = Arc::new(TargetRegistry::with_builtin());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Duration::from_millis(cfg.engine.dispatch_timeout_ms),
    );
    let pipeline = Arc::new(Pipeline::new(store, dispatcher));

    let consumer: Arc<dyn QueueConsumer> = match cli.queue {
        QueueKind::Sqs => Arc::new(
            SqsConsumer::new(&cfg.aws, &cfg.queue)
                .await
                .context("failed to create SQS consumer")?,
        ),
        QueueKind::Stdin => {
            let queue = Arc::new(MemoryQueue::new(Duration::from_secs(u64::from(
                cfg.queue.visibility_timeout_secs,
            ))));
            spawn_stdin_feeder(queue.clone());
            queue
        }
    };

    let metrics = Arc::new(EngineMetrics::new());
    let listener = IngestionListener::new(
        consumer.clone(),
        pipeline,
        metrics.clone(),
        ListenerConfig::from(&cfg.engine),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let health = if cfg.health.enabled {
        let state = Arc::new(
            HealthState::new(metrics.clone(), consumer, registry)
                .with_config(cfg.redacted_summary()),
        );
        Some(spawn_health_server(cfg.health.port, state, shutdown_rx))
    } else {
        None
    };

    listener.start()?;

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    listener.stop().await;
    let _ = shutdown_tx.send(true);
    if let Some(handle) = health {
        handle.await.ok();
    }

    let snap = metrics.snapshot();
    tracing::info!(
        received = snap.messages_received,
        processed = snap.messages_processed,
        malformed = snap.messages_malformed,
        failed = snap.messages_failed,
        dispatched = snap.triggers_dispatched,
        "ifthen-engine exited cleanly"
    );
    Ok(())
}

async fn build_store(
    kind: StoreKind,
    seed_from_files: bool,
    cfg: &Config,
) -> anyhow::Result<(Arc<dyn RuleStore>, Option<RuleFileLoader>)> {
    match kind {
        StoreKind::Memory => {
            let store = Arc::new(MemoryRuleStore::new());
            let mut loader = RuleFileLoader::new(&cfg.store.rules_dir, store.clone());
            let results = loader.load_all().with_context(|| {
                format!("failed to read rules directory {}", cfg.store.rules_dir.display())
            })?;
            let (loaded, failed) = summarize(&results);
            tracing::info!(loaded, failed, path = %cfg.store.rules_dir.display(), "rule files loaded");
            if cfg.store.watch {
                loader.watch().context("failed to watch rules directory")?;
            }
            let store: Arc<dyn RuleStore> = store;
            Ok((store, Some(loader)))
        }
        StoreKind::Postgres => {
            let store = PgRuleStore::connect(&cfg.postgres)
                .await
                .context("failed to connect to PostgreSQL")?;
            store.migrate().await?;

            if seed_from_files {
                let seed = Arc::new(MemoryRuleStore::new());
                let loader = RuleFileLoader::new(&cfg.store.rules_dir, seed.clone());
                let mut count = 0usize;
                for result in loader.load_all()? {
                    match result.status {
                        LoadStatus::Loaded { rule_ids } => {
                            for rule in rule_ids.iter().filter_map(|id| seed.get(id)) {
                                store.upsert(&rule).await?;
                                count += 1;
                            }
                        }
                        LoadStatus::Failed { error } => {
                            tracing::warn!(path = %result.path.display(), error = %error, "skipping rule file");
                        }
                        LoadStatus::Skipped { .. } => {}
                    }
                }
                tracing::info!(count, "seeded PostgreSQL from rule files");
            }
            if cfg.store.watch {
                tracing::warn!("--watch is ignored with the postgres store");
            }
            let store: Arc<dyn RuleStore> = Arc::new(store);
            Ok((store, None))
        }
    }
}

/// Feed one message per non-empty stdin line into `queue`.
fn spawn_stdin_feeder(queue: Arc<MemoryQueue>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut count = 0u64;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        queue.send(line);
                        count += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
        tracing::info!(messages = count, "stdin closed");
    });
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
