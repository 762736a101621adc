use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use taskmon_daemon::{
    collector::LinuxProcessCollector,
    config::Config,
    logging::LogContext,
    monitor::{take_snapshot, Monitor, MonitorConfig},
    sampler::ProcessSampler,
    server::{ReportServer, ReportService},
    sink::CsvSink,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "taskmon", version, about = "Task Monitor - process memory and CPU sampling")]
struct Cli {
    /// TOML config file (defaults to the per-user config directory)
    #[arg(short, long, env = "TASKMON_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take a single snapshot and overwrite the snapshot log
    Snapshot {
        /// Number of top processes to keep
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Sample continuously, appending to the monitoring log
    Monitor {
        /// Number of top processes to keep per pass
        #[arg(long)]
        limit: Option<usize>,
        /// Seconds between passes
        #[arg(long)]
        interval: Option<u64>,
        /// Also serve the reporting API while monitoring
        #[arg(long)]
        serve: bool,
    },
    /// Serve the reporting API
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:5000
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut log = LogContext::new(config.logging.clone());
    if let Err(e) = log.init() {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command, config, &log).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, mut config: Config, log: &LogContext) -> Result<()> {
    match command {
        Commands::Snapshot { limit } => {
            if let Some(limit) = limit {
                config.general.limit = limit;
            }
            let path = config.storage.snapshot_path();
            info!("Taking performance snapshot...");
            let mut sampler = ProcessSampler::new(LinuxProcessCollector::new(), log);
            let sink = CsvSink::new(&path, log);
            let report = take_snapshot(&mut sampler, &sink, config.general.limit)
                .context("Snapshot failed")?;
            info!(rows = report.rows, skipped = report.errors, "Snapshot saved to {}", path.display());
        }
        Commands::Monitor {
            limit,
            interval,
            serve,
        } => {
            if let Some(limit) = limit {
                config.general.limit = limit;
            }
            if let Some(interval) = interval {
                config.general.interval_secs = interval;
            }
            let (shutdown, signal) = shutdown_channel();
            let server = if serve {
                Some(spawn_server(&config, log, shutdown.clone()).await?)
            } else {
                None
            };

            info!(
                "Monitoring top {} processes every {} seconds, press Ctrl+C to stop",
                config.general.limit, config.general.interval_secs
            );
            let sampler = ProcessSampler::new(LinuxProcessCollector::new(), log);
            let sink = CsvSink::new(config.storage.monitoring_path(), log);
            let monitor_config = MonitorConfig {
                limit: config.general.limit,
                interval: config.general.interval(),
                warmup: config.general.warmup(),
            };
            let mut monitor = Monitor::new(sampler, sink, monitor_config, log);
            let result = tokio::spawn(async move { monitor.run(shutdown).await })
                .await
                .context("monitoring task panicked")?;

            signal.abort();
            if let Some(server) = server {
                server.abort();
            }
            let report = result.context("Monitoring failed")?;
            info!(passes = report.passes, rows = report.rows, "Monitoring completed");
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let (shutdown, signal) = shutdown_channel();
            let server = spawn_server(&config, log, shutdown).await?;
            server.await.context("reporting server panicked")?;
            signal.abort();
        }
    }
    Ok(())
}

/// Shutdown flag flipped by Ctrl+C. The sender lives in the signal task.
fn shutdown_channel() -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    });
    (rx, signal)
}

async fn spawn_server(
    config: &Config,
    log: &LogContext,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let service = ReportService::new(
        config.storage.monitoring_path(),
        config.storage.snapshot_path(),
        log,
    );
    let server = ReportServer::bind(&config.server.bind, service)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    Ok(tokio::spawn(server.serve(shutdown)))
}
