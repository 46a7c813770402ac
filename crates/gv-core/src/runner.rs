use crate::config::GroveConfig;
use crate::error::{GroveError, SessionError, ValidationError};
use crate::gates_exec::GateRunner;
use crate::grove::Grove;
use crate::poll::{WaitOutcome, wait_until};
use crate::progress::{advance, detect_step};
use crate::store::Store;
use crate::types::{
    EventType, NewSession, Phase, Progress, Session, SessionId, SessionStatus, ValidationRun,
};
use crate::validation::validate_session_transition;
use chrono::Utc;
use gv_agent::{AgentError, AgentOutput, AgentProcessManager, OutputKind, StartedProcess};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives agent runs for sessions: launch, stream consumption, validation and
/// the resulting status.
pub struct SessionRunner<S: Store> {
    grove: Arc<Grove<S>>,
    agents: Arc<AgentProcessManager>,
    gates: GateRunner,
    config: GroveConfig,
    shutdown: CancellationToken,
}

impl<S: Store + 'static> SessionRunner<S> {
    pub fn new(grove: Arc<Grove<S>>, agents: Arc<AgentProcessManager>, config: GroveConfig) -> Self {
        Self {
            grove,
            agents,
            gates: config.gate_runner(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn grove(&self) -> &Arc<Grove<S>> {
        &self.grove
    }

    pub fn config(&self) -> &GroveConfig {
        &self.config
    }

    /// Cancels pending waits.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn create_session(
        &self,
        worktree_path: PathBuf,
        issue_number: Option<u64>,
        prompt: Option<String>,
    ) -> Result<Session, GroveError> {
        self.grove.sessions().create(NewSession {
            worktree_path,
            issue_number,
            prompt,
        })
    }

    /// Starts a fresh agent run and drives it to a final status.
    pub async fn run(&self, id: &SessionId, prompt: Option<String>) -> Result<Session, GroveError> {
        let (_, stream) = self.launch_run(id, prompt).await?;
        self.drive(id, stream).await
    }

    /// Continues the agent-side conversation with a follow-up prompt.
    pub async fn resume(&self, id: &SessionId, prompt: &str) -> Result<Session, GroveError> {
        let (_, stream) = self.launch_resume(id, prompt).await?;
        self.drive(id, stream).await
    }

    /// Launches the agent and drives it on its own task. Returns as soon as the
    /// session is running; launch failures are returned directly.
    pub async fn spawn_run(
        self: &Arc<Self>,
        id: SessionId,
        prompt: Option<String>,
    ) -> Result<(Session, JoinHandle<Result<Session, GroveError>>), GroveError> {
        let (session, stream) = self.launch_run(&id, prompt).await?;
        Ok((session, self.spawn_drive(id, stream)))
    }

    /// Background variant of [`SessionRunner::resume`].
    pub async fn spawn_resume(
        self: &Arc<Self>,
        id: SessionId,
        prompt: &str,
    ) -> Result<(Session, JoinHandle<Result<Session, GroveError>>), GroveError> {
        let (session, stream) = self.launch_resume(&id, prompt).await?;
        Ok((session, self.spawn_drive(id, stream)))
    }

    async fn launch_run(
        &self,
        id: &SessionId,
        prompt: Option<String>,
    ) -> Result<(Session, ReceiverStream<AgentOutput>), GroveError> {
        let session = self.grove.sessions().get(id)?;
        self.ensure_idle(&session).await?;
        validate_session_transition(session.status, SessionStatus::Running)?;
        let prompt = prompt
            .or_else(|| session.prompt.clone())
            .ok_or_else(|| SessionError::InvalidInput {
                message: format!("session {id} has no prompt"),
            })?;

        let started = self
            .agents
            .start(
                &session.worktree_path,
                &prompt,
                &self.config.agent.allowed_tools,
                self.config.agent.system_prompt.as_deref(),
            )
            .await;
        self.attach(id, started, Some(prompt)).await
    }

    async fn launch_resume(
        &self,
        id: &SessionId,
        prompt: &str,
    ) -> Result<(Session, ReceiverStream<AgentOutput>), GroveError> {
        let session = self.grove.sessions().get(id)?;
        self.ensure_idle(&session).await?;
        let agent_session_id = session
            .agent_session_id
            .clone()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SessionError::NoAgentSession { id: id.to_string() })?;
        validate_session_transition(session.status, SessionStatus::Running)?;

        let started = self
            .agents
            .resume(&session.worktree_path, &agent_session_id, prompt)
            .await;
        self.attach(id, started, None).await
    }

    fn spawn_drive(
        self: &Arc<Self>,
        id: SessionId,
        stream: ReceiverStream<AgentOutput>,
    ) -> JoinHandle<Result<Session, GroveError>> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let result = runner.drive(&id, stream).await;
            if let Err(err) = &result {
                error!(session_id = %id, error = %err, "background run failed");
            }
            result
        })
    }

    /// Stops the agent and pauses the session. Stopping an idle session is a no-op.
    ///
    /// An agent launched by another orchestrator process is signalled through its
    /// recorded OS pid; if that fails the session keeps its previous state.
    pub async fn stop(&self, id: &SessionId) -> Result<Session, GroveError> {
        let previous = self.grove.sessions().get(id)?;
        let local = match &previous.process_id {
            Some(process_id) => self.agents.is_running(process_id).await,
            None => false,
        };
        let foreign_pid = previous.os_pid.filter(|pid| {
            !local
                && previous.status == SessionStatus::Running
                && AgentProcessManager::is_alive(*pid)
        });

        // Pause before killing so the driver sees an operator stop, not a crash.
        let session = self.grove.sessions().update(id, |session| {
            session.clear_process();
            if session.status == SessionStatus::Running {
                session.status = SessionStatus::Paused;
            }
            Ok(())
        })?;

        if let Some(os_pid) = foreign_pid {
            if !AgentProcessManager::terminate(os_pid) && AgentProcessManager::is_alive(os_pid) {
                warn!(session_id = %id, os_pid, "could not signal agent; restoring session");
                self.grove.sessions().update(id, |session| {
                    session.status = previous.status;
                    session.process_id = previous.process_id.clone();
                    session.os_pid = previous.os_pid;
                    Ok(())
                })?;
                return Err(AgentError::SignalFailed { os_pid }.into());
            }
            info!(session_id = %id, os_pid, "session stopped");
        } else if let Some(process_id) = &previous.process_id {
            self.agents.stop(process_id).await?;
            info!(session_id = %id, process_id = %process_id, "session stopped");
        }
        Ok(session)
    }

    /// Runs the configured gates and settles the session as completed or failed.
    pub async fn validate(&self, id: &SessionId) -> Result<Session, GroveError> {
        let session = self.grove.sessions().get(id)?;
        if self.config.gates.is_empty() {
            return Err(ValidationError::NoGates.into());
        }
        if !matches!(
            session.status,
            SessionStatus::Running | SessionStatus::Completed | SessionStatus::Failed
        ) {
            return Err(SessionError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Completed,
            }
            .into());
        }

        info!(session_id = %id, gates = self.config.gates.len(), "validating session");
        let grove = &self.grove;
        let run = self
            .gates
            .run_with_auto_retry(
                &self.config.gates,
                &session.worktree_path,
                self.config.validation.pipeline_retries,
                |attempt, gate| {
                    warn!(session_id = %id, attempt, gate, "validation failed; retrying pipeline");
                    let recorded = grove.events().record(
                        id,
                        EventType::TestRun,
                        format!("validation attempt {attempt} failed at {gate}; retrying"),
                        metadata(json!({ "attempt": attempt, "gate": gate })),
                    );
                    if let Err(err) = recorded {
                        warn!(session_id = %id, error = %err, "failed to record retry");
                    }
                },
            )
            .await;
        self.record_validation(id, &run)?;

        let status = if run.all_passed {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        self.grove.sessions().set_status(id, status)
    }

    /// Fails `running` sessions whose agent process died while nobody was watching.
    pub fn recover(&self) -> Result<Vec<Session>, GroveError> {
        let mut recovered = Vec::new();
        for session in self.grove.sessions().list_by_status(SessionStatus::Running)? {
            if session.os_pid.is_some_and(AgentProcessManager::is_alive) {
                info!(session_id = %session.id, os_pid = ?session.os_pid, "agent still alive; leaving session running");
                continue;
            }
            match self.fail(&session.id, "agent process lost while the orchestrator was down") {
                Ok(session) => recovered.push(session),
                Err(err) => warn!(session_id = %session.id, error = %err, "failed to recover session"),
            }
        }
        Ok(recovered)
    }

    pub async fn wait_for_session<P>(&self, predicate: P) -> WaitOutcome<Session>
    where
        P: Fn(&Session) -> bool,
    {
        wait_until(self.config.poll_config(), &self.shutdown, || {
            let found = match self.grove.sessions().list() {
                Ok(sessions) => sessions.into_iter().find(|session| predicate(session)),
                Err(err) => {
                    warn!(error = %err, "failed to list sessions while waiting");
                    None
                }
            };
            async move { found }
        })
        .await
    }

    pub async fn wait_for_completion(&self, id: &SessionId) -> WaitOutcome<Session> {
        self.wait_for_session(|session| &session.id == id && session.status.is_terminal())
            .await
    }

    /// Rejects a launch while an agent is live for the session, whether it was
    /// started here or by another orchestrator sharing the store.
    async fn ensure_idle(&self, session: &Session) -> Result<(), GroveError> {
        let local = match &session.process_id {
            Some(process_id) => self.agents.is_running(process_id).await,
            None => false,
        };
        let foreign = session.status == SessionStatus::Running
            && session.os_pid.is_some_and(AgentProcessManager::is_alive);
        if local || foreign {
            return Err(SessionError::AlreadyRunning {
                id: session.id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn attach(
        &self,
        id: &SessionId,
        started: Result<StartedProcess, AgentError>,
        prompt: Option<String>,
    ) -> Result<(Session, ReceiverStream<AgentOutput>), GroveError> {
        let started = match started {
            Ok(started) => started,
            Err(err) => {
                self.fail(id, &format!("agent failed to start: {err}"))?;
                return Err(err.into());
            }
        };

        let process_id = started.process_id.clone();
        let session = self.grove.sessions().update(id, |session| {
            session.status = SessionStatus::Running;
            session.process_id = Some(started.process_id.clone());
            session.os_pid = started.os_pid;
            session.last_heartbeat_at = Some(Utc::now());
            if prompt.is_some() {
                session.prompt = prompt;
            }
            if session.progress.is_none() {
                session.progress = Some(Progress::new());
            }
            Ok(())
        })?;
        self.grove.events().record(
            id,
            EventType::Milestone,
            "agent started",
            metadata(json!({ "process_id": process_id, "os_pid": started.os_pid })),
        )?;
        info!(session_id = %id, process_id = %process_id, "agent attached");

        let stream = match self.agents.stream_output(&process_id).await {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(id, &format!("agent output unavailable: {err}"))?;
                return Err(err.into());
            }
        };
        Ok((session, stream))
    }

    async fn drive(
        &self,
        id: &SessionId,
        mut stream: ReceiverStream<AgentOutput>,
    ) -> Result<Session, GroveError> {
        let mut finished = false;
        while let Some(output) = stream.next().await {
            finished |= output.kind == OutputKind::Done;
            if let Err(err) = self.handle_output(id, &output) {
                warn!(session_id = %id, error = %err, "failed to record agent output");
            }
        }

        let session = self.grove.sessions().get(id)?;
        if session.status == SessionStatus::Paused {
            info!(session_id = %id, "agent stream ended after stop");
            return Ok(session);
        }
        if !finished {
            return self.fail(id, "agent exited without completing");
        }

        self.grove.sessions().update(id, |session| {
            session.clear_process();
            Ok(())
        })?;
        if self.config.validation.validate_on_complete && !self.config.gates.is_empty() {
            return self.validate(id).await;
        }
        self.grove.sessions().set_status(id, SessionStatus::Completed)
    }

    fn handle_output(&self, id: &SessionId, output: &AgentOutput) -> Result<(), GroveError> {
        self.grove.sessions().heartbeat(id)?;
        let events = self.grove.events();
        match output.kind {
            OutputKind::Text | OutputKind::ToolResult => {
                events.record(id, EventType::Output, output.content.as_str(), None)?;
            }
            OutputKind::Error => {
                events.record(id, EventType::Error, output.content.as_str(), None)?;
            }
            OutputKind::ToolUse => self.handle_tool_use(id, output)?,
            OutputKind::Done => {
                let agent_session_id = output.content.clone();
                let usage = output.usage;
                self.grove.sessions().update(id, |session| {
                    if !agent_session_id.is_empty() {
                        session.agent_session_id = Some(agent_session_id.clone());
                    }
                    if usage.is_some() {
                        session.usage = usage;
                    }
                    Ok(())
                })?;
                events.record(
                    id,
                    EventType::Milestone,
                    "agent finished",
                    metadata(json!({ "agent_session_id": output.content, "usage": usage })),
                )?;
            }
        }
        Ok(())
    }

    fn handle_tool_use(&self, id: &SessionId, output: &AgentOutput) -> Result<(), GroveError> {
        let (tool, input) = match &output.tool {
            Some(tool) => (tool.name.clone(), tool.input.clone()),
            None => {
                let name = output.content.split(':').next().unwrap_or_default();
                (name.to_string(), Value::Null)
            }
        };
        let phase = detect_step(&tool, &input);
        let kind = match phase {
            Some(Phase::Implementing) => EventType::FileChange,
            Some(Phase::Testing) => EventType::TestRun,
            Some(Phase::Committing) => EventType::Commit,
            Some(Phase::Analyzing | Phase::CreatingPr) | None => EventType::ToolCall,
        };
        self.grove.events().record(
            id,
            kind,
            output.content.as_str(),
            metadata(json!({ "tool": tool, "input": input })),
        )?;

        let Some(phase) = phase else {
            return Ok(());
        };
        let current = self.grove.sessions().get(id)?.progress.unwrap_or_default();
        let next = advance(&current, phase);
        if next.current == current.current {
            return Ok(());
        }
        let completed: Vec<&str> = next.completed.iter().map(|step| step.as_str()).collect();
        let content = format!("phase: {}", next.current.as_str());
        let event_metadata = metadata(json!({
            "phase": next.current.as_str(),
            "completed": completed,
        }));
        self.grove.sessions().update(id, |session| {
            session.progress = Some(next);
            Ok(())
        })?;
        self.grove
            .events()
            .record(id, EventType::Milestone, content, event_metadata)?;
        Ok(())
    }

    fn record_validation(&self, id: &SessionId, run: &ValidationRun) -> Result<(), GroveError> {
        let events = self.grove.events();
        for result in &run.results {
            let verdict = if result.passed { "passed" } else { "failed" };
            events.record(
                id,
                EventType::TestRun,
                format!(
                    "gate {} {verdict} after {} attempt(s)",
                    result.gate, result.attempts
                ),
                metadata(json!({
                    "gate": result.gate,
                    "passed": result.passed,
                    "attempts": result.attempts,
                    "output": result.output,
                })),
            )?;
        }
        let summary = if run.all_passed {
            "validation passed"
        } else {
            "validation failed"
        };
        events.record(
            id,
            EventType::Milestone,
            summary,
            metadata(json!({ "all_passed": run.all_passed, "duration_ms": run.duration_ms })),
        )?;
        Ok(())
    }

    fn fail(&self, id: &SessionId, reason: &str) -> Result<Session, GroveError> {
        error!(session_id = %id, reason, "session failed");
        let session = self.grove.sessions().update(id, |session| {
            session.error_count += 1;
            session.clear_process();
            session.status = SessionStatus::Failed;
            Ok(())
        })?;
        self.grove
            .events()
            .record(id, EventType::Error, reason, None)?;
        Ok(session)
    }
}

fn metadata(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
