mod alerts;
mod broadcast;
mod collectors;
mod config;
mod http;
mod metrics;
mod model;
mod ranker;
mod rollup;
mod sampler;
mod scheduler;
mod sinks;

use axum::serve;
use broadcast::Broadcaster;
use chrono::Local;
use clap::Parser;
use collectors::system::SysinfoProvider;
use config::Config;
use metrics::Metrics;
use ranker::ProcessRanker;
use sampler::Sampler;
use scheduler::Scheduler;
use sinks::csv_file::CsvFileSink;
use sinks::history::{HistorySink, MemoryStore};
use sinks::json_lines::JsonLinesSink;
use sinks::log_file::LogFileSink;
use sinks::{SinkError, SinkManager};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "telemd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `log_dir` from the config file.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, config = %cli.config, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        log_dir = %cfg.log_dir.display(),
        sample_interval = ?cfg.sample_interval,
        report_interval = ?cfg.report_interval,
        "starting telemd"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to build tokio runtime");
            std::process::exit(1);
        }
    };

    let grace = cfg.shutdown_grace;
    runtime.block_on(run(cfg));
    // A provider read stuck on the blocking pool must not keep the process alive.
    runtime.shutdown_timeout(grace);
}

async fn run(cfg: Config) {
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    // validate() already checked the address
    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "failed to start HTTP server");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let store = MemoryStore::new();
    let broadcaster = Arc::new(Broadcaster::new(cfg.subscriber_queue_capacity));

    let http_task = {
        let app = http::build_router(
            metrics.clone(),
            store.clone(),
            broadcaster.clone(),
            cfg.subscriber_timeout,
        );
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                cancel.cancelled().await;
            });
            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let today = Local::now().date_naive();
    let sinks = match build_sinks(&cfg, store, metrics.clone(), today) {
        Ok(sinks) => sinks,
        Err(err) => {
            error!(error = %err, "failed to start sinks");
            std::process::exit(1);
        }
    };
    let sampler = Sampler::new(
        SysinfoProvider::new(),
        ProcessRanker::new(&cfg.ranking_keys, cfg.top_n, cfg.noise_floor),
        cfg.sample_timeout,
    );
    let scheduler = Scheduler::new(&cfg, sampler, sinks, broadcaster, metrics, today);
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");
    cancel.cancel();

    if let Err(err) = scheduler_task.await {
        error!(error = %err, "scheduler task failed");
    }
    if tokio::time::timeout(cfg.shutdown_grace, http_task)
        .await
        .is_err()
    {
        warn!("HTTP server did not stop within the grace period");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads the config file, falling back to defaults when it does not exist,
/// then applies command-line overrides.
fn load_config(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut cfg = if Path::new(&cli.config).exists() {
        Config::load_from_file(&cli.config)?
    } else {
        warn!(config = %cli.config, "config file not found, using defaults");
        Config::default()
    };
    if let Some(dir) = &cli.log_dir {
        cfg.log_dir = dir.clone();
    }
    if let Some(listen) = &cli.listen {
        cfg.listen = listen.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn build_sinks(
    cfg: &Config,
    store: MemoryStore,
    metrics: Arc<Metrics>,
    today: chrono::NaiveDate,
) -> Result<SinkManager, SinkError> {
    let mut sinks = SinkManager::new(cfg.sink_queue_capacity, metrics);
    if cfg.sinks.log {
        sinks.register(Box::new(LogFileSink::new(
            cfg.log_dir.clone(),
            &cfg.file_prefix,
            today,
            cfg.top_n,
        )))?;
    }
    if cfg.sinks.csv {
        sinks.register(Box::new(CsvFileSink::new(
            cfg.log_dir.clone(),
            &cfg.file_prefix,
            today,
        )))?;
    }
    if cfg.sinks.json {
        sinks.register(Box::new(JsonLinesSink::new(
            cfg.log_dir.clone(),
            &cfg.file_prefix,
            today,
        )))?;
    }
    if cfg.sinks.history {
        sinks.register(Box::new(HistorySink::new(store, cfg.history_capacity)))?;
    }
    if sinks.is_empty() {
        warn!("all sinks are disabled, data is only published to subscribers");
    }
    Ok(sinks)
}
