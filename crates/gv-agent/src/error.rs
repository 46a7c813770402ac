use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent: {message}")]
    SpawnFailed { message: String },
    #[error("process not found: {process_id}")]
    ProcessNotFound { process_id: String },
    #[error("output stream already taken: {process_id}")]
    StreamTaken { process_id: String },
    #[error("failed to signal agent pid {os_pid}")]
    SignalFailed { os_pid: u32 },
}
