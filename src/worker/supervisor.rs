//! Worker process lifecycle.
//!
//! The supervisor owns the child process handle directly — there is no
//! process-wide singleton. `start()` resolves only once the worker has
//! announced readiness on its stdout; `stop()` tears the process down and
//! rejects anything still pending on the link; an exit monitor turns an
//! unexpected death into a broadcast event so no in-flight command is left
//! hanging.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command as ProcessCommand};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{AppResult, ScanError};
use crate::worker::link::{WorkerClient, WorkerLink};
use crate::worker::router::WorkerEvent;

/// Environment toggles the worker honors for hardware simulation.
const MOCK_ENV_VARS: [&str; 3] = [
    "BLOOM_USE_MOCK_CAMERA",
    "BLOOM_USE_MOCK_DAQ",
    "BLOOM_USE_MOCK_HARDWARE",
];

enum MonitorRequest {
    Stop(oneshot::Sender<()>),
}

struct ActiveWorker {
    link: WorkerLink,
    monitor_tx: mpsc::Sender<MonitorRequest>,
    running: Arc<AtomicBool>,
    stderr_task: JoinHandle<()>,
}

/// Owns one worker process and its protocol link.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    active: Option<ActiveWorker>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Whether the worker process is alive.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| active.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Handle for issuing commands to the running worker.
    pub fn client(&self) -> AppResult<WorkerClient> {
        match &self.active {
            Some(active) if active.running.load(Ordering::SeqCst) => Ok(active.link.client()),
            _ => Err(ScanError::WorkerNotRunning),
        }
    }

    /// Subscribe to worker events (domain events, exit notifications).
    pub fn subscribe(&self) -> AppResult<broadcast::Receiver<WorkerEvent>> {
        self.client().map(|client| client.subscribe())
    }

    /// Spawn the worker and wait for its ready announcement.
    ///
    /// Idempotent while the worker is alive. Fails with
    /// [`ScanError::StartupTimeout`] if no status line containing "ready"
    /// arrives within the configured window; the half-started process is
    /// killed before returning.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.is_running() {
            return Ok(());
        }
        self.active = None;

        info!(
            executable = %self.config.executable.display(),
            args = ?self.config.args,
            mock = self.config.use_mock_hardware,
            "starting hardware worker"
        );

        let mut command = ProcessCommand::new(&self.config.executable);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mock = if self.config.use_mock_hardware {
            "true"
        } else {
            "false"
        };
        for var in MOCK_ENV_VARS {
            command.env(var, mock);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        let stderr_task = tokio::spawn(drain_stderr(stderr));
        let (link, mut events) = WorkerLink::open(stdout, stdin, self.config.command_timeout);

        if let Err(e) = wait_for_ready(&mut events, self.config.startup_timeout).await {
            warn!("worker failed to become ready: {e}");
            let _ = child.start_kill();
            let _ = child.wait().await;
            stderr_task.abort();
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (monitor_tx, monitor_rx) = mpsc::channel(1);
        tokio::spawn(monitor(
            child,
            monitor_rx,
            link.client().event_sender(),
            running.clone(),
        ));

        self.active = Some(ActiveWorker {
            link,
            monitor_tx,
            running,
            stderr_task,
        });
        info!("hardware worker ready");
        Ok(())
    }

    /// Terminate the worker and clear its handle.
    ///
    /// The in-flight command (if any) is rejected when the worker's stdout
    /// closes; everything still queued is rejected when the link is dropped.
    pub async fn stop(&mut self) -> AppResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if active
            .monitor_tx
            .send(MonitorRequest::Stop(ack_tx))
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
        active.stderr_task.abort();
        drop(active.link);
        info!("hardware worker stopped");
        Ok(())
    }

    /// Stop, pause briefly, start.
    pub async fn restart(&mut self) -> AppResult<()> {
        self.stop().await?;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start().await
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> AppResult<T> {
    pipe.ok_or_else(|| {
        ScanError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("worker {name} pipe unavailable"),
        ))
    })
}

/// Wait for a status line containing "ready".
async fn wait_for_ready(
    events: &mut broadcast::Receiver<WorkerEvent>,
    timeout: Duration,
) -> AppResult<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::Status(text))
                    if text.to_ascii_lowercase().contains("ready") =>
                {
                    return Ok(())
                }
                Ok(WorkerEvent::Closed) | Ok(WorkerEvent::Exited { .. }) => {
                    return Err(ScanError::ProcessExit { code: None })
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lagged while waiting for worker readiness");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ScanError::ProcessExit { code: None })
                }
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| ScanError::StartupTimeout { timeout })?
}

/// Own the child until it exits or a stop is requested.
async fn monitor(
    mut child: Child,
    mut requests: mpsc::Receiver<MonitorRequest>,
    events: broadcast::Sender<WorkerEvent>,
    running: Arc<AtomicBool>,
) {
    enum Wakeup {
        Exited(std::io::Result<std::process::ExitStatus>),
        Request(Option<MonitorRequest>),
    }

    let wakeup = tokio::select! {
        status = child.wait() => Wakeup::Exited(status),
        request = requests.recv() => Wakeup::Request(request),
    };

    match wakeup {
        Wakeup::Exited(status) => {
            running.store(false, Ordering::SeqCst);
            let code = status.ok().and_then(|s| s.code());
            warn!(?code, "hardware worker exited unexpectedly");
            let _ = events.send(WorkerEvent::Exited { code });
        }
        Wakeup::Request(request) => {
            let _ = child.start_kill();
            let status = child.wait().await;
            running.store(false, Ordering::SeqCst);
            debug!(?status, "hardware worker terminated");
            if let Some(MonitorRequest::Stop(ack)) = request {
                let _ = ack.send(());
            }
        }
    }
}

/// Forward the worker's stderr into our logs so nothing is lost.
async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(target: "cylscan::worker", "worker stderr: {line}");
    }
}
