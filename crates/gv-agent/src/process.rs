use crate::error::AgentError;
use crate::output::{AgentOutput, OutputKind, classify_line};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Handle for a running agent subprocess, generated locally at launch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub const PREFIX: &'static str = "proc_";

    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, Ulid::new()))
    }

    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent executable, resolved through `PATH`.
    pub program: String,
    /// Arguments placed before the generated protocol flags.
    pub extra_args: Vec<String>,
    /// Outputs buffered per process before the reader applies backpressure.
    pub output_buffer: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            extra_args: Vec::new(),
            output_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    pub process_id: ProcessId,
    /// Always empty at launch; the agent reports its id in the stream.
    pub agent_session_id: String,
    pub os_pid: Option<u32>,
}

struct ProcessHandle {
    os_pid: Option<u32>,
    cancel: CancellationToken,
    output: Option<mpsc::Receiver<AgentOutput>>,
    exited: bool,
}

type ProcessTable = Arc<Mutex<HashMap<ProcessId, ProcessHandle>>>;

pub struct AgentProcessManager {
    config: AgentConfig,
    processes: ProcessTable,
}

impl AgentProcessManager {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn start(
        &self,
        working_dir: &Path,
        prompt: &str,
        allowed_tools: &[String],
        system_prompt: Option<&str>,
    ) -> Result<StartedProcess, AgentError> {
        let mut args = protocol_args(prompt);
        if !allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(allowed_tools.join(","));
        }
        if let Some(system_prompt) = system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.to_string());
        }
        self.launch(working_dir, args).await
    }

    pub async fn resume(
        &self,
        working_dir: &Path,
        agent_session_id: &str,
        prompt: &str,
    ) -> Result<StartedProcess, AgentError> {
        let mut args = protocol_args(prompt);
        args.push("--resume".to_string());
        args.push(agent_session_id.to_string());
        self.launch(working_dir, args).await
    }

    /// Requests termination. Unknown or already-finished ids are not an error.
    pub async fn stop(&self, process_id: &ProcessId) -> Result<(), AgentError> {
        let processes = self.processes.lock().await;
        if let Some(handle) = processes.get(process_id) {
            if !handle.cancel.is_cancelled() {
                info!(process_id = %process_id, os_pid = ?handle.os_pid, "stopping agent");
            }
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Takes the ordered output of a process. Only the first call succeeds.
    pub async fn stream_output(
        &self,
        process_id: &ProcessId,
    ) -> Result<ReceiverStream<AgentOutput>, AgentError> {
        let mut processes = self.processes.lock().await;
        let handle = processes
            .get_mut(process_id)
            .ok_or_else(|| AgentError::ProcessNotFound {
                process_id: process_id.to_string(),
            })?;
        let receiver = handle.output.take().ok_or_else(|| AgentError::StreamTaken {
            process_id: process_id.to_string(),
        })?;
        if handle.exited {
            processes.remove(process_id);
        }
        Ok(ReceiverStream::new(receiver))
    }

    pub async fn is_running(&self, process_id: &ProcessId) -> bool {
        self.processes
            .lock()
            .await
            .get(process_id)
            .is_some_and(|handle| !handle.exited)
    }

    /// Sends SIGTERM to an OS process id, for agents launched by another
    /// orchestrator process. Returns whether the signal was delivered.
    pub fn terminate(os_pid: u32) -> bool {
        let delivered = std::process::Command::new("kill")
            .args(["-TERM", &os_pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if delivered {
            info!(os_pid, "sent SIGTERM to agent");
        }
        delivered
    }

    /// Probes an OS process id directly, without consulting the process table.
    pub fn is_alive(os_pid: u32) -> bool {
        let proc_root = Path::new("/proc");
        if proc_root.is_dir() {
            return proc_root.join(os_pid.to_string()).exists();
        }
        std::process::Command::new("kill")
            .args(["-0", &os_pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    async fn launch(
        &self,
        working_dir: &Path,
        args: Vec<String>,
    ) -> Result<StartedProcess, AgentError> {
        // Spawn and registration share one critical section so a concurrent
        // stop never sees a half-registered process.
        let mut processes = self.processes.lock().await;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.extra_args)
            .args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|err| AgentError::SpawnFailed {
            message: format!("{}: {err}", self.config.program),
        })?;
        let os_pid = child.id();
        let stdout = child.stdout.take().ok_or_else(|| AgentError::SpawnFailed {
            message: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| AgentError::SpawnFailed {
            message: "stderr not captured".to_string(),
        })?;

        let process_id = ProcessId::generate();
        let cancel = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(self.config.output_buffer.max(1));
        processes.insert(
            process_id.clone(),
            ProcessHandle {
                os_pid,
                cancel: cancel.clone(),
                output: Some(receiver),
                exited: false,
            },
        );
        drop(processes);

        info!(process_id = %process_id, os_pid = ?os_pid, dir = %working_dir.display(), "agent started");
        tokio::spawn(pump(
            process_id.clone(),
            child,
            stdout,
            stderr,
            sender,
            cancel,
            Arc::clone(&self.processes),
        ));

        Ok(StartedProcess {
            process_id,
            agent_session_id: String::new(),
            os_pid,
        })
    }
}

fn protocol_args(prompt: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        prompt.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ]
}

async fn pump(
    process_id: ProcessId,
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    sender: mpsc::Sender<AgentOutput>,
    cancel: CancellationToken,
    processes: ProcessTable,
) {
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut consumer_gone = false;
    let mut exited: Option<std::io::Result<ExitStatus>> = None;
    let mut drain_deadline: Option<Instant> = None;

    // Both pipes drain to EOF; a fatal message often lands on stderr after
    // stdout has already closed. Once the agent itself has exited, pipes held
    // open by orphaned children get a short grace period.
    while stdout_open || stderr_open {
        let outputs = tokio::select! {
            () = cancel.cancelled() => break,
            status = child.wait(), if exited.is_none() => {
                exited = Some(status);
                drain_deadline = Some(Instant::now() + EXIT_DRAIN_GRACE);
                continue;
            }
            () = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                if drain_deadline.is_some() => break,
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => classify_line(&line),
                Ok(None) => {
                    stdout_open = false;
                    continue;
                }
                Err(err) => {
                    warn!(process_id = %process_id, error = %err, "agent stdout read failed");
                    stdout_open = false;
                    continue;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => vec![AgentOutput::new(OutputKind::Error, line)],
                Ok(None) | Err(_) => {
                    stderr_open = false;
                    continue;
                }
            },
        };
        if consumer_gone {
            continue;
        }
        for output in outputs {
            debug!(process_id = %process_id, kind = ?output.kind, "agent output");
            let delivered = tokio::select! {
                sent = sender.send(output) => sent.is_ok(),
                () = cancel.cancelled() => false,
            };
            if !delivered {
                consumer_gone = !cancel.is_cancelled();
                break;
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    let status = match exited {
        Some(status) => status,
        None => {
            if cancel.is_cancelled() {
                if let Err(err) = child.kill().await {
                    warn!(process_id = %process_id, error = %err, "failed to kill agent");
                }
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => info!(process_id = %process_id, %status, "agent exited"),
        Err(err) => warn!(process_id = %process_id, error = %err, "failed to reap agent"),
    }
    drop(sender);

    let mut processes = processes.lock().await;
    let taken = processes
        .get(&process_id)
        .is_some_and(|handle| handle.output.is_none());
    if taken {
        processes.remove(&process_id);
    } else if let Some(handle) = processes.get_mut(&process_id) {
        handle.exited = true;
    }
}
