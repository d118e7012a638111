#![forbid(unsafe_code)]

//! `orc-supervisor` worker session supervisor binary.
//!
//! Bootstraps configuration, spawns the primary session, and runs the
//! event dispatcher, the reconciliation loop and the terminal bridge until
//! a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use orc_supervisor::bridge;
use orc_supervisor::config::GlobalConfig;
use orc_supervisor::host::PtyHost;
use orc_supervisor::orchestrator::{Reconciler, ReconcilerOptions, RegistryOptions, SessionRegistry};
use orc_supervisor::sinks::{self, EventPublisher, NoticeSink, NotificationSink, WebhookSink};
use orc_supervisor::workspace::GitWorktreeProvisioner;
use orc_supervisor::{AppError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "orc-supervisor", about = "Worker session supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the root workspace bound to the primary session.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("orc-supervisor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(ws) = args.workspace {
        config.root_workspace = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
    }
    info!(root = %config.root_workspace.display(), "configuration loaded");

    let ct = CancellationToken::new();

    // ── Notification fan-out ────────────────────────────
    let (events, events_rx) = EventPublisher::channel(EVENT_CHANNEL_CAPACITY);
    let mut sink_list: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(NoticeSink::stderr())];
    if let Some(url) = config.notifications.webhook_url.clone() {
        info!(%url, "webhook notifications enabled");
        sink_list.push(Arc::new(WebhookSink::new(url)));
    }
    let dispatcher_handle = sinks::spawn_event_dispatcher(events_rx, sink_list, ct.clone());

    // ── Session registry ────────────────────────────────
    let provisioner = GitWorktreeProvisioner::new(config.root_workspace.clone(), config.worktrees_dir());
    let registry = SessionRegistry::new(
        Arc::new(PtyHost::new()),
        Arc::new(provisioner),
        events.clone(),
        RegistryOptions::from_config(&config),
    );

    match registry.spawn_primary().await {
        Ok(session) => info!(session = %session.name, "primary session started"),
        Err(err) => error!(%err, "failed to start primary session"),
    }

    // ── Reconciliation loop ─────────────────────────────
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        events,
        ReconcilerOptions::from_config(&config.reconcile),
    ));
    let reconciler_handle = reconciler.spawn(ct.clone());

    // ── Terminal bridge ─────────────────────────────────
    let bind = SocketAddr::from(([127, 0, 0, 1], config.bridge.http_port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind terminal bridge on {bind}: {err}")))?;
    let bridge_ct = ct.clone();
    let bridge_registry = registry.clone();
    let bridge_handle = tokio::spawn(async move {
        if let Err(err) = bridge::serve(listener, bridge_registry, bridge_ct).await {
            error!(%err, "terminal bridge failed");
        }
    });

    info!(%bind, "orc-supervisor ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    registry.shutdown().await;
    ct.cancel();

    let _ = tokio::join!(reconciler_handle, bridge_handle, dispatcher_handle);
    info!("orc-supervisor shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
