#![forbid(unsafe_code)]

//! `agent-arena`: session orchestrator binary.
//!
//! Bootstraps configuration and the database, starts the event bridge
//! ingress and listener, and serves the orchestrator HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_arena::api::{self, AppState};
use agent_arena::bridge::hub::EventHub;
use agent_arena::bridge::listener::spawn_event_listener;
use agent_arena::bridge::server::spawn_ingress;
use agent_arena::bridge::EventSink;
use agent_arena::config::GlobalConfig;
use agent_arena::environment::docker::DockerRuntime;
use agent_arena::environment::manager::EnvironmentManager;
use agent_arena::environment::runtime::ContainerRuntime;
use agent_arena::orchestrator::agent::{AgentService, HttpAgentService};
use agent_arena::orchestrator::driver::SessionDriver;
use agent_arena::orchestrator::lifecycle::LifecycleRunner;
use agent_arena::orchestrator::runs::RunRegistry;
use agent_arena::orchestrator::scaffold::Scaffolder;
use agent_arena::orchestrator::state_machine::StateMachine;
use agent_arena::persistence::batch_repo::BatchRepo;
use agent_arena::persistence::db;
use agent_arena::persistence::environment_repo::EnvironmentRepo;
use agent_arena::persistence::session_repo::SessionRepo;
use agent_arena::persistence::turn_repo::TurnRepo;
use agent_arena::ports::allocator::PortAllocator;
use agent_arena::ports::reservation::PortReservations;
use agent_arena::supervisor::{ProcessSupervisor, SupervisorConfig};
use agent_arena::{AppError, Result};

/// Upper bound for requests forwarded to environment control APIs.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-arena", about = "Session orchestrator for sandboxed coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the configuration file.
    #[arg(long)]
    http_port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-arena bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config.load_credentials().await;
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path).await?);
    let sessions = SessionRepo::new(Arc::clone(&db));
    let environments_repo = EnvironmentRepo::new(Arc::clone(&db));
    info!(path = %config.db_path.display(), "database connected");

    // ── Container runtime ───────────────────────────────
    let runtime: Option<Arc<dyn ContainerRuntime>> = if config.environment.enabled {
        match DockerRuntime::connect(config.environment.image.clone()) {
            Ok(docker) => Some(Arc::new(docker)),
            Err(err) => {
                warn!(%err, "container runtime unavailable; environment endpoints disabled");
                None
            }
        }
    } else {
        info!("container runtime disabled by configuration");
        None
    };

    let allocator = PortAllocator::new(config.ports.control_range, config.ports.app_range);
    let reservations = Arc::new(PortReservations::new(
        allocator,
        sessions.clone(),
        environments_repo.clone(),
        runtime.clone(),
    ));

    let environments = match runtime {
        Some(runtime) => Some(Arc::new(EnvironmentManager::new(
            &config,
            runtime,
            Arc::clone(&reservations),
            environments_repo,
            sessions.clone(),
        )?)),
        None => None,
    };

    // ── Supervisor and event bridge ─────────────────────
    let supervisor = ProcessSupervisor::new(
        SupervisorConfig::from_config(&config.dev_server)?,
        sessions.clone(),
    );
    reconcile_dev_servers(&sessions, &supervisor).await;

    let ct = CancellationToken::new();
    let hub = EventHub::new(config.bridge.capacity);
    let machine = Arc::new(StateMachine::new(sessions.clone(), TurnRepo::new(Arc::clone(&db))));
    let listener_handle = spawn_event_listener(&hub, machine, ct.clone());

    let bridge_listener = TcpListener::bind(&config.bridge.bind).await.map_err(|err| {
        AppError::Config(format!("failed to bind bridge on {}: {err}", config.bridge.bind))
    })?;
    let ingress_handle = spawn_ingress(bridge_listener, hub.clone(), ct.clone());

    // ── Session driver ──────────────────────────────────
    let agent: Arc<dyn AgentService> = Arc::new(HttpAgentService::new(
        &config.agent.base_url,
        Duration::from_secs(config.agent.request_timeout_seconds),
    )?);
    let sink: Arc<dyn EventSink> = Arc::new(hub);
    let driver = SessionDriver::new(sink, agent, Scaffolder::from_config(&config.scaffold));
    let lifecycle = LifecycleRunner::new(driver, supervisor.clone(), Arc::clone(&reservations));

    let http = reqwest::Client::builder()
        .timeout(FORWARD_TIMEOUT)
        .build()?;

    let state = Arc::new(AppState {
        sessions,
        batches: BatchRepo::new(Arc::clone(&db)),
        reservations,
        supervisor: supervisor.clone(),
        lifecycle,
        runs: RunRegistry::new(),
        environments,
        http,
    });

    // ── Start HTTP API ──────────────────────────────────
    let bind = SocketAddr::from(([127, 0, 0, 1], config.http_port));
    let api_listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind api on {bind}: {err}")))?;
    let api_ct = ct.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api::serve_api(api_listener, state, api_ct).await {
            error!(%err, "orchestrator api failed");
        }
    });

    info!("agent-arena ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    supervisor.drain().await;
    let _ = tokio::join!(api_handle, ingress_handle, listener_handle);
    info!("agent-arena shut down");

    Ok(())
}

/// Stop dev servers a previous process left marked as starting/running.
///
/// Their handles are gone, so only the persisted pid and the port remain
/// to act on.
async fn reconcile_dev_servers(sessions: &SessionRepo, supervisor: &ProcessSupervisor) {
    let stale = match sessions.list_dev_server_active().await {
        Ok(stale) => stale,
        Err(err) => {
            error!(%err, "failed to list dev servers left from a previous run");
            return;
        }
    };
    for session in &stale {
        if let Err(err) = supervisor.stop(session.id).await {
            warn!(session_id = session.id, %err, "failed to reset stale dev server");
        }
    }
    if !stale.is_empty() {
        info!(count = stale.len(), "reset dev servers from a previous run");
    }
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
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

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
