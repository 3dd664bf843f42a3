use clap::{Parser, Subcommand};
use dodohook::config::{Config, DEFAULT_CONFIG_PATH};
use dodohook::rate_limiter::RateLimiter;
use dodohook::signal_server::{self, SignalState};
use dodohook::stats::RequestStats;
use dodohook::tasks::PeriodicTask;
use dodohook::tunnel::{self, fingerprint, TunnelState};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dodohook")]
#[command(about = "Self-hosted webhook tunnel and MetaTrader signal dispatcher")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run the public webhook gateway
    Tunnel,
    /// Run the local signal processing server
    Signals,
    /// Run the gateway and the signal server together
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (mut config, load_warnings) = Config::load_with_warnings(&cli.config)?;
    let generated = config.ensure_auth_token();
    let _log_guard = dodohook::logging::init_logging(&config.logging);
    dodohook::metrics::init_metrics();
    for warning in &load_warnings {
        warn!("{warning}");
    }

    if generated {
        println!("Generated webhook token for this run: {}", config.tunnel.auth_token);
        warn!(
            fingerprint = %fingerprint(&config.tunnel.auth_token),
            "no auth token configured, generated one"
        );
    }

    let config = Arc::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    let result = match cli.command {
        Commands::Tunnel => run_tunnel(config.clone(), shutdown_rx).await,
        Commands::Signals => run_signals(config.clone(), shutdown_rx).await,
        Commands::Run => run_both(config.clone(), shutdown_rx).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "server exited with error");
    }
    result
}

async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Runs the gateway and the signal server together. The first failure ends both.
async fn run_both(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    tokio::try_join!(
        run_tunnel(config.clone(), shutdown.clone()),
        run_signals(config, shutdown),
    )
    .map(|_| ())
}

async fn run_tunnel(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let limiter = Arc::new(RateLimiter::new(config.security.rate_limit));
    let stats = Arc::new(RequestStats::new());
    let state = Arc::new(TunnelState::new(config.clone(), limiter.clone(), stats.clone())?);

    let prune = PeriodicTask::spawn(
        "rate_limiter_prune",
        Duration::from_secs(config.maintenance.cleanup_interval_secs),
        {
            let limiter = limiter.clone();
            move || {
                let limiter = limiter.clone();
                async move {
                    let removed = limiter.prune(Instant::now());
                    info!(removed, tracked = limiter.tracked_clients(), "pruned rate limiter");
                }
            }
        },
    );
    let report = PeriodicTask::spawn(
        "gateway_report",
        Duration::from_secs(config.maintenance.report_interval_secs),
        {
            let stats = stats.clone();
            move || {
                let snapshot = stats.snapshot();
                let connections = stats.connections();
                async move {
                    info!(
                        total = snapshot.total,
                        success = snapshot.success,
                        errors = snapshot.errors,
                        connections,
                        "gateway stats"
                    );
                }
            }
        },
    );

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))?;
    let result = tunnel::serve(listener, state, shutdown_signal(shutdown)).await;

    prune.cancel().await;
    report.cancel().await;
    result
}

async fn run_signals(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let state = SignalState::from_config(&config);

    let report = PeriodicTask::spawn(
        "signal_report",
        Duration::from_secs(config.maintenance.report_interval_secs),
        {
            let state = state.clone();
            move || {
                let snapshot = state.stats().snapshot();
                async move {
                    info!(
                        processed = snapshot.total,
                        delivered = snapshot.success,
                        failed = snapshot.errors,
                        "signal stats"
                    );
                }
            }
        },
    );

    let listener = TcpListener::bind((config.signals.host.as_str(), config.signals.port))?;
    let result = signal_server::serve(listener, state, shutdown_signal(shutdown)).await;

    report.cancel().await;
    result
}
