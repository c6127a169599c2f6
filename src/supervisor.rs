use parking_lot::Mutex;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::logging::{LogLevel, LogSink};

/// How long to wait for output pipes to drain after a process exits
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A backend service to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Service name used in status listings
    pub name: String,
    /// Script identifier passed to the interpreter
    pub script: String,
}

impl ServiceSpec {
    pub fn new(name: &str, script: &str) -> Self {
        Self {
            name: name.to_string(),
            script: script.to_string(),
        }
    }
}

/// State of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ProcessState {
    /// Process is running
    Running,
    /// Process exited; `code` is None when it was killed by a signal
    Exited { code: Option<i32> },
    /// Process could not be spawned at all
    SpawnFailed,
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

/// Bounded buffer of recent output lines
type LogBuffer = Arc<Mutex<VecDeque<String>>>;

/// Handle to one supervised backend process
pub struct ManagedProcess {
    spec: ServiceSpec,
    pid: Option<u32>,
    state_rx: watch::Receiver<ProcessState>,
    logs: LogBuffer,
    /// Asks the exit watcher to terminate the child
    stop_tx: watch::Sender<bool>,
}

impl ManagedProcess {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn script(&self) -> &str {
        &self.spec.script
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    /// Most recent captured lines, oldest first
    pub fn recent_logs(&self) -> Vec<String> {
        self.logs.lock().iter().cloned().collect()
    }

    /// Wait until the process is no longer running
    pub async fn wait_for_exit(&self) -> ProcessState {
        let mut rx = self.state_rx.clone();
        if let Ok(state) = rx.wait_for(|state| !state.is_running()).await {
            return *state;
        }
        // Watcher task is gone; report whatever it published last
        let last = *rx.borrow();
        last
    }
}

/// Status snapshot of one process
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessStatus {
    pub name: String,
    pub script: String,
    pub pid: Option<u32>,
    #[serde(flatten)]
    pub state: ProcessState,
}

/// Launches the backend scripts and observes them until they exit.
///
/// There is no restart logic: a crashed backend stays down and the routes
/// that depend on it answer with errors until the gateway is restarted.
/// Spawn failures are logged and never propagate to the caller.
pub struct Supervisor {
    processes: Vec<ManagedProcess>,
    grace_period: Duration,
}

impl Supervisor {
    /// Spawn one process per spec with `<interpreter> <script>`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn launch(config: &SupervisorConfig, specs: &[ServiceSpec], sink: Arc<dyn LogSink>) -> Self {
        let processes = specs
            .iter()
            .map(|spec| start_process(config, spec.clone(), Arc::clone(&sink)))
            .collect();

        Self {
            processes,
            grace_period: config.shutdown_grace_period(),
        }
    }

    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    /// Look up a process by service name
    pub fn get(&self, name: &str) -> Option<&ManagedProcess> {
        self.processes.iter().find(|p| p.name() == name)
    }

    pub fn status(&self) -> Vec<ProcessStatus> {
        self.processes
            .iter()
            .map(|p| ProcessStatus {
                name: p.spec.name.clone(),
                script: p.spec.script.clone(),
                pid: p.pid,
                state: p.state(),
            })
            .collect()
    }

    /// Terminate every running process and wait for them to exit
    ///
    /// Each child gets SIGTERM, then SIGKILL once the grace period has passed.
    pub async fn stop_all(&self) {
        for process in &self.processes {
            if process.state().is_running() {
                info!(script = %process.spec.script, pid = ?process.pid, "Stopping backend process");
                let _ = process.stop_tx.send(true);
            }
        }

        // Watchers enforce the grace period themselves; this only bounds the wait
        let deadline = self.grace_period + PIPE_DRAIN_TIMEOUT + Duration::from_secs(1);
        for process in &self.processes {
            if tokio::time::timeout(deadline, process.wait_for_exit()).await.is_err() {
                warn!(script = %process.spec.script, "Backend process did not report exit in time");
            }
        }
    }
}

fn start_process(config: &SupervisorConfig, spec: ServiceSpec, sink: Arc<dyn LogSink>) -> ManagedProcess {
    let logs: LogBuffer = Arc::new(Mutex::new(VecDeque::new()));
    let capacity = config.log_buffer_lines;
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut cmd = Command::new(&config.interpreter);
    cmd.arg(&spec.script);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    if let Some(ref working_dir) = config.working_dir {
        cmd.current_dir(working_dir);
    }

    info!(
        script = %spec.script,
        interpreter = %config.interpreter,
        "Starting backend process"
    );

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = format!("failed to start '{} {}': {}", config.interpreter, spec.script, e);
            record(&*sink, &logs, capacity, &spec.script, LogLevel::Error, &message);
            let (_, state_rx) = watch::channel(ProcessState::SpawnFailed);
            return ManagedProcess {
                spec,
                pid: None,
                state_rx,
                logs,
                stop_tx,
            };
        }
    };

    let pid = child.id();
    info!(script = %spec.script, pid = ?pid, "Backend process spawned");

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, LogLevel::Info, &spec.script, &sink, &logs, capacity));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, LogLevel::Error, &spec.script, &sink, &logs, capacity));
    }

    let (state_tx, state_rx) = watch::channel(ProcessState::Running);
    let script = spec.script.clone();
    let grace_period = config.shutdown_grace_period();
    let watcher_logs = Arc::clone(&logs);

    tokio::spawn(async move {
        let code = watch_exit(&mut child, stop_rx, grace_period, &script).await;

        // Let the readers flush whatever the process wrote before exiting
        for reader in readers {
            if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, reader).await.is_err() {
                debug!(script = %script, "Output pipe still open after exit");
            }
        }

        let message = match code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        };
        record(&*sink, &watcher_logs, capacity, &script, LogLevel::Info, &message);
        let _ = state_tx.send(ProcessState::Exited { code });
    });

    ManagedProcess {
        spec,
        pid,
        state_rx,
        logs,
        stop_tx,
    }
}

/// Wait for the child to exit on its own, or stop it when asked to.
/// Returns the exit code, None if it ended by signal.
async fn watch_exit(
    child: &mut Child,
    mut stop_rx: watch::Receiver<bool>,
    grace_period: Duration,
    script: &str,
) -> Option<i32> {
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped sender counts as a stop request
        _ = async { let _ = stop_rx.wait_for(|stop| *stop).await; } => {
            terminate(child, grace_period, script).await
        }
    };

    match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(script, error = %e, "Error waiting for backend process");
            None
        }
    }
}

/// SIGTERM, then SIGKILL after `grace_period`
async fn terminate(
    child: &mut Child,
    grace_period: Duration,
    script: &str,
) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        debug!(script, pid, "Sending SIGTERM to backend process");

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                script,
                grace_period_secs = grace_period.as_secs(),
                "Grace period exceeded, sending SIGKILL"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

fn spawn_reader<R>(
    stream: R,
    level: LogLevel,
    script: &str,
    sink: &Arc<dyn LogSink>,
    logs: &LogBuffer,
    capacity: usize,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let script = script.to_string();
    let sink = Arc::clone(sink);
    let logs = Arc::clone(logs);

    tokio::spawn(async move {
        // Split on raw bytes so non-UTF-8 output does not end the stream
        let mut segments = BufReader::new(stream).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(segment)) => {
                    let line = String::from_utf8_lossy(&segment);
                    let line = line.trim_end_matches('\r');
                    if !line.trim().is_empty() {
                        record(&*sink, &logs, capacity, &script, level, line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(script = %script, error = %e, "Error reading backend output");
                    break;
                }
            }
        }
    })
}

/// Send a line to the sink and keep it in the process's buffer
fn record(
    sink: &dyn LogSink,
    logs: &LogBuffer,
    capacity: usize,
    script: &str,
    level: LogLevel,
    text: &str,
) {
    sink.log_line(script, level, text);

    if capacity == 0 {
        return;
    }
    let formatted = match level {
        LogLevel::Info => format!("{}: {}", script, text),
        LogLevel::Error => format!("{} error: {}", script, text),
    };
    let mut buffer = logs.lock();
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(formatted);
}
