//! anvil: runs a small demo workload through an anvil dispatcher.
//!
//! Queues a mix of task kinds, waits for the pool to drain, stops it and
//! prints the final stats.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use anvil_core::{Dispatcher, DispatcherConfig, DispatcherStats, Task, TaskHandler};

// ── CLI ─────────────────────────────────────────────────────────────

/// Demo driver for the anvil task dispatcher.
#[derive(Parser, Debug)]
#[command(name = "anvil", version, about)]
struct Cli {
    /// Number of workers (defaults to the available parallelism).
    #[arg(long, env = "ANVIL_WORKERS")]
    workers: Option<usize>,

    /// Cap on tasks waiting for an idle worker.
    #[arg(long, env = "ANVIL_MAX_PENDING_DISPATCHES")]
    max_pending: Option<usize>,

    /// Number of tasks to queue.
    #[arg(long, default_value_t = 30)]
    tasks: usize,

    /// Seconds to wait for the workload to finish.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

// ── Workload ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DemoKind {
    Greet,
    Sum,
    Nap,
}

impl DemoKind {
    fn for_index(i: usize) -> Self {
        match i % 3 {
            0 => Self::Greet,
            1 => Self::Sum,
            _ => Self::Nap,
        }
    }

    fn payload(self, i: usize) -> Value {
        match self {
            Self::Greet => json!({ "name": format!("smith-{i}") }),
            Self::Sum => json!({ "values": [i, i * 2, i * 3] }),
            Self::Nap => json!({ "millis": 10 + (i % 5) * 10 }),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    greet: AtomicUsize,
    sum: AtomicUsize,
    nap: AtomicUsize,
}

impl Counters {
    fn total(&self) -> usize {
        self.greet.load(Ordering::SeqCst)
            + self.sum.load(Ordering::SeqCst)
            + self.nap.load(Ordering::SeqCst)
    }
}

/// Sleeps without holding up the worker's thread.
struct NapHandler {
    counters: Arc<Counters>,
}

#[async_trait]
impl TaskHandler<DemoKind, Value> for NapHandler {
    async fn handle(&self, task: Task<DemoKind, Value>) {
        let millis = task.payload()["millis"].as_u64().unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.counters.nap.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(millis, "nap finished");
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    queued: usize,
    greet: usize,
    sum: usize,
    nap: usize,
    stats: DispatcherStats,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = DispatcherConfig::from_env().context("reading ANVIL_* settings")?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if cli.max_pending.is_some() {
        config.max_pending_dispatches = cli.max_pending;
    }
    info!(
        workers = config.workers,
        max_pending = ?config.max_pending_dispatches,
        tasks = cli.tasks,
        "starting demo"
    );

    let counters = Arc::new(Counters::default());
    let pool = Dispatcher::<DemoKind, Value>::with_config(config)
        .set_handler(DemoKind::Greet, {
            let counters = Arc::clone(&counters);
            move |task| {
                let name = task.payload()["name"].as_str().unwrap_or("stranger");
                info!(%name, "hello");
                counters.greet.fetch_add(1, Ordering::SeqCst);
            }
        })
        .set_handler(DemoKind::Sum, {
            let counters = Arc::clone(&counters);
            move |task| {
                let total: u64 = task.payload()["values"]
                    .as_array()
                    .map(|values| values.iter().filter_map(Value::as_u64).sum())
                    .unwrap_or(0);
                info!(total, "sum");
                counters.sum.fetch_add(1, Ordering::SeqCst);
            }
        })
        .set_task_handler(
            DemoKind::Nap,
            NapHandler {
                counters: Arc::clone(&counters),
            },
        )
        .run()?;

    for i in 0..cli.tasks {
        let kind = DemoKind::for_index(i);
        pool.queue_task(kind, kind.payload(i)).await?;
    }

    let drained = tokio::time::timeout(Duration::from_secs(cli.timeout), async {
        while counters.total() < cli.tasks {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            done = counters.total(),
            queued = cli.tasks,
            "workload did not finish in time, stopping anyway"
        );
    }

    pool.stop().stopped().await;

    let summary = Summary {
        queued: cli.tasks,
        greet: counters.greet.load(Ordering::SeqCst),
        sum: counters.sum.load(Ordering::SeqCst),
        nap: counters.nap.load(Ordering::SeqCst),
        stats: pool.stats(),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "queued={} greet={} sum={} nap={} workers={} stopped={}",
            summary.queued,
            summary.greet,
            summary.sum,
            summary.nap,
            summary.stats.workers,
            summary.stats.stopped,
        );
    }

    Ok(())
}
