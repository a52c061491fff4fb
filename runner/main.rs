#![forbid(unsafe_code)]

//! `agent-arena-runner`: control API inside an execution environment.
//!
//! Accepts setup/execute requests from the orchestrator, drives the coding
//! agent, and reports lifecycle events to the orchestrator's bridge.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_arena::bridge::publisher::BridgePublisher;
use agent_arena::bridge::EventSink;
use agent_arena::config::GlobalConfig;
use agent_arena::orchestrator::agent::{AgentService, HttpAgentService};
use agent_arena::orchestrator::driver::SessionDriver;
use agent_arena::orchestrator::scaffold::Scaffolder;
use agent_arena::runner::server::serve_runner;
use agent_arena::runner::{RunnerConfig, RunnerState};
use agent_arena::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-arena-runner", about = "In-environment control API", version, long_about = None)]
struct Cli {
    /// Optional TOML configuration file; built-in defaults otherwise.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Working directory for the session's code.
    #[arg(long, default_value = "/code")]
    code_dir: PathBuf,

    /// Bridge address; falls back to `BRIDGE_ADDR`, then the config file.
    #[arg(long)]
    bridge_addr: Option<String>,

    /// Provider used when an execute request names none.
    #[arg(long, default_value = "opencode")]
    default_provider: String,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-arena-runner bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };

    let bridge_addr = args
        .bridge_addr
        .or_else(|| env::var("BRIDGE_ADDR").ok())
        .unwrap_or_else(|| config.bridge.public_addr.clone());
    info!(%bridge_addr, "publishing events to bridge");

    let sink: Arc<dyn EventSink> = Arc::new(BridgePublisher::new(bridge_addr));
    let agent: Arc<dyn AgentService> = Arc::new(HttpAgentService::new(
        &config.agent.base_url,
        Duration::from_secs(config.agent.request_timeout_seconds),
    )?);
    let driver = SessionDriver::new(sink, agent, Scaffolder::from_config(&config.scaffold));

    let state = Arc::new(RunnerState::new(
        RunnerConfig {
            code_dir: args.code_dir,
            templates: config.scaffold.templates.clone(),
            default_provider: args.default_provider,
        },
        driver,
    ));

    let listener = TcpListener::bind(args.bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {}: {err}", args.bind)))?;

    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server = tokio::spawn(serve_runner(listener, state, server_ct));

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    match server.await {
        Ok(result) => result?,
        Err(err) => warn!(%err, "control api task failed"),
    }
    info!("agent-arena-runner shut down");
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
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
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
