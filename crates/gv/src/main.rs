use clap::{Parser, Subcommand};
use gv_agent::AgentProcessManager;
use gv_core::types::{Session, SessionId, SessionStatus};
use gv_core::{Grove, GroveConfig, GroveError, Reconciler, SessionRunner};
use gv_db::DbStore;
use gv_events::BroadcastHub;
use gv_vcs::GitWorktrees;
use owo_colors::{OwoColorize, Stream};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_DB_PATH: &str = ".grove/grove.db";
const DEFAULT_PORT: u16 = 4830;
const HUB_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "gv", about = "Run coding agents in git worktrees")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and live event stream.
    Serve,
    /// Create sessions for worktrees that have none.
    Sync,
    /// List sessions.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Run the agent for a session until it finishes.
    Run {
        session: String,
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Continue a session's agent conversation.
    Resume { session: String, prompt: String },
    /// Run the validation gates for a session.
    Validate { session: String },
    /// Fail running sessions whose agent is gone.
    Recover,
}

struct Context {
    repo_root: PathBuf,
    worktrees: Arc<GitWorktrees>,
    runner: Arc<SessionRunner<DbStore>>,
}

impl Context {
    fn load() -> Result<Self, GroveError> {
        let start = std::env::var_os("GROVE_REPO")
            .map(PathBuf::from)
            .map_or_else(std::env::current_dir, Ok)
            .map_err(|err| GroveError::Internal {
                message: format!("cannot resolve working directory: {err}"),
            })?;
        let worktrees = GitWorktrees::open(&start)?;
        let repo_root = worktrees.root().to_path_buf();
        let config = GroveConfig::load(&repo_root)?;

        let db_path = std::env::var("GROVE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| repo_root.join(DEFAULT_DB_PATH));
        let store = DbStore::open(&db_path)?.with_event_limit(config.events.max_per_session);
        let grove = Grove::new(store, BroadcastHub::new(HUB_CAPACITY));
        let agents = AgentProcessManager::new(config.agent_config()?);
        info!(repo = %repo_root.display(), db = %db_path.display(), "grove ready");

        Ok(Self {
            repo_root,
            worktrees: Arc::new(worktrees),
            runner: Arc::new(SessionRunner::new(Arc::new(grove), Arc::new(agents), config)),
        })
    }

    fn grove(&self) -> &Grove<DbStore> {
        self.runner.grove()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn execute(command: Command) -> Result<(), GroveError> {
    let context = Context::load()?;
    match command {
        Command::Serve => serve(&context).await,
        Command::Sync => {
            let created = Reconciler::new(context.grove(), context.worktrees.as_ref()).sync();
            if created.is_empty() {
                println!("all worktrees tracked");
            }
            for session in &created {
                print_session(session);
            }
            Ok(())
        }
        Command::List { status } => {
            let sessions = match status {
                Some(status) => context.grove().sessions().list_by_status(parse_status(&status)?)?,
                None => context.grove().sessions().list()?,
            };
            for session in &sessions {
                print_session(session);
            }
            Ok(())
        }
        Command::Run { session, prompt } => {
            let id = parse_session_id(session)?;
            let finished = until_interrupted(&context, &id, context.runner.run(&id, prompt)).await?;
            print_session(&finished);
            exit_status(&finished)
        }
        Command::Resume { session, prompt } => {
            let id = parse_session_id(session)?;
            let finished =
                until_interrupted(&context, &id, context.runner.resume(&id, &prompt)).await?;
            print_session(&finished);
            exit_status(&finished)
        }
        Command::Validate { session } => {
            let id = parse_session_id(session)?;
            let validated = context.runner.validate(&id).await?;
            print_session(&validated);
            exit_status(&validated)
        }
        Command::Recover => {
            let recovered = context.runner.recover()?;
            println!("recovered {} session(s)", recovered.len());
            for session in &recovered {
                print_session(session);
            }
            Ok(())
        }
    }
}

async fn serve(context: &Context) -> Result<(), GroveError> {
    let recovered = context.runner.recover()?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "marked sessions with dead agents as failed");
    }
    Reconciler::new(context.grove(), context.worktrees.as_ref()).sync();

    let port = std::env::var("GROVE_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let state = gv_serve::AppState::new(Arc::clone(&context.runner), context.worktrees.clone());
    info!(repo = %context.repo_root.display(), "serving");

    let runner = Arc::clone(&context.runner);
    let shutdown = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
        runner.shutdown();
    };
    gv_serve::serve(state, addr, shutdown)
        .await
        .map_err(|err| GroveError::Internal {
            message: format!("server error: {err}"),
        })
}

/// Drives `run` to the end; ctrl-c stops the agent and pauses the session instead.
async fn until_interrupted<F>(
    context: &Context,
    id: &SessionId,
    run: F,
) -> Result<Session, GroveError>
where
    F: Future<Output = Result<Session, GroveError>>,
{
    tokio::pin!(run);
    let interrupted = tokio::select! {
        result = &mut run => return result,
        signal = tokio::signal::ctrl_c() => signal,
    };
    match interrupted {
        Ok(()) => {
            info!(session_id = %id, "interrupted; stopping agent");
            context.runner.stop(id).await?;
        }
        Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
    }
    run.await
}

fn parse_session_id(raw: String) -> Result<SessionId, GroveError> {
    SessionId::new(raw).map_err(|err| {
        gv_core::error::SessionError::InvalidInput {
            message: err.to_string(),
        }
        .into()
    })
}

fn parse_status(raw: &str) -> Result<SessionStatus, GroveError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| {
        gv_core::error::SessionError::InvalidInput {
            message: format!("unknown status: {raw}"),
        }
        .into()
    })
}

fn exit_status(session: &Session) -> Result<(), GroveError> {
    if session.status == SessionStatus::Failed {
        return Err(GroveError::Internal {
            message: format!("session {} failed", session.id),
        });
    }
    Ok(())
}

fn print_session(session: &Session) {
    let status = format!("{:<9}", status_label(session.status));
    let status = match session.status {
        SessionStatus::Completed => status
            .if_supports_color(Stream::Stdout, |text| text.green())
            .to_string(),
        SessionStatus::Failed => status
            .if_supports_color(Stream::Stdout, |text| text.red())
            .to_string(),
        SessionStatus::Running => status
            .if_supports_color(Stream::Stdout, |text| text.cyan())
            .to_string(),
        SessionStatus::Paused => status
            .if_supports_color(Stream::Stdout, |text| text.yellow())
            .to_string(),
        SessionStatus::Pending => status
            .if_supports_color(Stream::Stdout, |text| text.dimmed())
            .to_string(),
    };
    let issue = session
        .issue_number
        .map_or_else(|| "-".to_string(), |issue| format!("#{issue}"));
    let phase = session
        .progress
        .as_ref()
        .map_or("-", |progress| progress.current.as_str());
    println!(
        "{}  {status}  {issue:<6}  {phase:<12}  {}",
        session.id,
        session.worktree_path.display()
    );
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::Running => "running",
        SessionStatus::Paused => "paused",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
    }
}
