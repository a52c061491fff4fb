//! Dev-server process supervision.
//!
//! The supervisor owns the `dev_server_status` / `dev_server_pid` columns.
//! Every start and stop for a session runs under that session's lock;
//! sessions never wait on each other.

pub mod readiness;
pub mod terminate;

use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{info, info_span, warn, Instrument};

use self::readiness::{watch_output, ReadinessMatcher};
use crate::config::DevServerConfig;
use crate::models::session::DevServerStatus;
use crate::orchestrator::locks::KeyedLocks;
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

/// Launch and timing parameters for dev servers.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Program to run.
    pub command: String,
    /// Arguments before the port flag.
    pub args: Vec<String>,
    /// Flag preceding the port number.
    pub port_flag: String,
    /// Ready marker matcher.
    pub matcher: ReadinessMatcher,
    /// How long to wait for a marker before assuming readiness.
    pub ready_timeout: Duration,
    /// Delay between SIGTERM and SIGKILL.
    pub grace_period: Duration,
}

impl SupervisorConfig {
    /// Build from the `[dev_server]` config section.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a ready pattern does not compile.
    pub fn from_config(config: &DevServerConfig) -> Result<Self> {
        Ok(Self {
            command: config.command.clone(),
            args: config.args.clone(),
            port_flag: config.port_flag.clone(),
            matcher: ReadinessMatcher::new(&config.ready_patterns)?,
            ready_timeout: Duration::from_secs(config.ready_timeout_seconds),
            grace_period: Duration::from_millis(config.grace_period_ms),
        })
    }
}

/// A dev server as reported by `start`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DevServer {
    /// Process id (also the process group id).
    pub pid: u32,
    /// Port passed to the server.
    pub port: u16,
    /// Status after `start` returned.
    pub status: DevServerStatus,
}

/// How the readiness wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Marker,
    TimedOut,
    Exited(Option<i32>),
}

struct ProcessHandle {
    generation: u64,
    pid: u32,
    port: u16,
    exited: watch::Receiver<Option<Option<i32>>>,
}

struct Inner {
    config: SupervisorConfig,
    sessions: SessionRepo,
    handles: Mutex<HashMap<i64, ProcessHandle>>,
    locks: KeyedLocks<i64>,
    generation: AtomicU64,
}

impl Inner {
    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<i64, ProcessHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the session's handle only if it still belongs to `generation`.
    fn take_if_current(&self, session_id: i64, generation: u64) -> bool {
        let mut handles = self.handles();
        if handles.get(&session_id).is_some_and(|h| h.generation == generation) {
            handles.remove(&session_id);
            true
        } else {
            false
        }
    }
}

/// Starts, tracks and stops per-session dev servers.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Create a supervisor with an empty handle table.
    #[must_use]
    pub fn new(config: SupervisorConfig, sessions: SessionRepo) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions,
                handles: Mutex::new(HashMap::new()),
                locks: KeyedLocks::new(),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Launch the session's dev server on `port` inside `directory`.
    ///
    /// Returns immediately with the tracked server if one exists. Otherwise
    /// waits until a ready marker is printed, the readiness timeout passes
    /// (the server is then assumed running), or the process exits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `directory` does not exist and
    /// `AppError::Process` if the spawn fails or the process exits before
    /// it is ready. The session's dev server status is updated in every case.
    pub async fn start(&self, session_id: i64, directory: &Path, port: u16) -> Result<DevServer> {
        let span = info_span!("dev_server_start", session_id, port);
        self.start_locked(session_id, directory, port)
            .instrument(span)
            .await
    }

    async fn start_locked(&self, session_id: i64, directory: &Path, port: u16) -> Result<DevServer> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(session_id).await;

        let tracked = inner.handles().get(&session_id).map(|h| (h.pid, h.port));
        if let Some((pid, port)) = tracked {
            return Ok(DevServer {
                pid,
                port,
                status: DevServerStatus::Running,
            });
        }

        if !directory.is_dir() {
            inner
                .sessions
                .update_dev_server(session_id, DevServerStatus::Error, None)
                .await?;
            return Err(AppError::NotFound(format!(
                "working directory {} does not exist",
                directory.display()
            )));
        }

        inner
            .sessions
            .update_dev_server(session_id, DevServerStatus::Starting, None)
            .await?;

        let mut child = match self.spawn(directory, port) {
            Ok(child) => child,
            Err(err) => {
                inner
                    .sessions
                    .update_dev_server(session_id, DevServerStatus::Error, None)
                    .await?;
                return Err(err);
            }
        };

        let Some(pid) = child.id() else {
            inner
                .sessions
                .update_dev_server(session_id, DevServerStatus::Error, None)
                .await?;
            return Err(AppError::Process("dev server exited during spawn".into()));
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(stdout) = child.stdout.take() {
            let matcher = inner.config.matcher.clone();
            tokio::spawn(watch_output(stdout, matcher, Some(ready_tx), session_id, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            let matcher = inner.config.matcher.clone();
            tokio::spawn(watch_output(stderr, matcher, None, session_id, "stderr"));
        }

        let generation = inner.generation.fetch_add(1, Ordering::Relaxed);
        let (exit_tx, exit_rx) = watch::channel(None);
        inner.handles().insert(
            session_id,
            ProcessHandle {
                generation,
                pid,
                port,
                exited: exit_rx.clone(),
            },
        );
        self.spawn_monitor(session_id, generation, child, exit_tx);

        inner
            .sessions
            .update_dev_server(session_id, DevServerStatus::Starting, Some(pid))
            .await?;
        info!(pid, "dev server spawned");

        match wait_ready(ready_rx, exit_rx, inner.config.ready_timeout).await {
            Readiness::Exited(code) => {
                inner.take_if_current(session_id, generation);
                let status = exit_status(code);
                inner
                    .sessions
                    .update_dev_server(session_id, status, None)
                    .await?;
                warn!(?code, "dev server exited before becoming ready");
                Err(AppError::Process(format!(
                    "dev server exited before becoming ready (code {})",
                    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
                )))
            }
            outcome => {
                inner
                    .sessions
                    .update_dev_server(session_id, DevServerStatus::Running, Some(pid))
                    .await?;
                if outcome == Readiness::TimedOut {
                    info!(pid, "no ready marker seen, assuming dev server is up");
                } else {
                    info!(pid, "dev server ready");
                }
                Ok(DevServer {
                    pid,
                    port,
                    status: DevServerStatus::Running,
                })
            }
        }
    }

    fn spawn(&self, directory: &Path, port: u16) -> Result<Child> {
        let config = &self.inner.config;
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .arg(&config.port_flag)
            .arg(port.to_string())
            .current_dir(directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|err| {
            AppError::Process(format!("failed to spawn {}: {err}", config.command))
        })
    }

    /// Reap the child and record its exit unless the handle was already
    /// retired by `stop` or by the readiness wait.
    fn spawn_monitor(
        &self,
        session_id: i64,
        generation: u64,
        mut child: Child,
        exit_tx: watch::Sender<Option<Option<i32>>>,
    ) {
        let inner = Arc::clone(&self.inner);
        let span = info_span!("dev_server_monitor", session_id);
        tokio::spawn(
            async move {
                let code = match child.wait().await {
                    Ok(status) => exit_code(status),
                    Err(err) => {
                        warn!(%err, "failed to wait for dev server");
                        None
                    }
                };
                let _ = exit_tx.send(Some(code));

                let _guard = inner.locks.lock(session_id).await;
                if inner.take_if_current(session_id, generation) {
                    let status = exit_status(code);
                    info!(?code, %status, "dev server exited");
                    if let Err(err) = inner.sessions.update_dev_server(session_id, status, None).await {
                        warn!(%err, "failed to record dev server exit");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Stop the session's dev server.
    ///
    /// All three strategies run every time: signal the tracked process
    /// group, terminate the persisted pid with its descendants, and
    /// terminate whatever listens on the session's port. The status ends
    /// as `stopped` with no pid. Succeeds when nothing was running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session and
    /// `AppError::Db` if the status cannot be written.
    pub async fn stop(&self, session_id: i64) -> Result<()> {
        let span = info_span!("dev_server_stop", session_id);
        async move {
            let inner = &self.inner;
            let _guard = inner.locks.lock(session_id).await;
            let session = inner.sessions.require(session_id).await?;
            let grace = inner.config.grace_period;

            let handle = inner.handles().remove(&session_id);
            if let Some(mut handle) = handle {
                info!(pid = handle.pid, "terminating tracked process group");
                terminate::terminate_group(handle.pid, grace, &mut handle.exited).await;
            }

            if let Some(pid) = session.dev_server_pid {
                info!(pid, "terminating persisted pid");
                terminate::terminate_tree(pid, grace).await;
            }

            if let Some(port) = session.port {
                let holders = terminate::terminate_port_holders(port, grace).await;
                if holders > 0 {
                    info!(port, holders, "terminated port holders");
                }
            }

            inner
                .sessions
                .update_dev_server(session_id, DevServerStatus::Stopped, None)
                .await?;
            info!("dev server stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stop every tracked dev server. Used at shutdown.
    pub async fn drain(&self) {
        let ids = self.running_sessions();
        for session_id in ids {
            if let Err(err) = self.stop(session_id).await {
                warn!(session_id, %err, "failed to stop dev server during drain");
            }
        }
    }

    /// Whether a tracked handle exists for the session.
    #[must_use]
    pub fn is_running(&self, session_id: i64) -> bool {
        self.inner.handles().contains_key(&session_id)
    }

    /// Sessions with a tracked handle, ascending.
    #[must_use]
    pub fn running_sessions(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.handles().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

async fn wait_ready(
    ready: oneshot::Receiver<()>,
    mut exited: watch::Receiver<Option<Option<i32>>>,
    ready_timeout: Duration,
) -> Readiness {
    let marker = async {
        if ready.await.is_err() {
            // Output closed without a marker; only exit or timeout remain.
            std::future::pending::<()>().await;
        }
    };
    let exit = async {
        match exited.wait_for(Option::is_some).await {
            Ok(code) => {
                let code: Option<Option<i32>> = *code;
                code.flatten()
            }
            Err(_) => None,
        }
    };

    tokio::select! {
        biased;
        code = exit => Readiness::Exited(code),
        () = marker => Readiness::Marker,
        () = tokio::time::sleep(ready_timeout) => Readiness::TimedOut,
    }
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

fn exit_status(code: Option<i32>) -> DevServerStatus {
    if code == Some(0) {
        DevServerStatus::Stopped
    } else {
        DevServerStatus::Error
    }
}
