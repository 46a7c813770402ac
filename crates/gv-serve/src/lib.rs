pub mod middleware;
pub mod routes;
pub mod sse;

use axum::Router;
use axum::http::Request;
use gv_core::{Grove, SessionRunner};
use gv_db::DbStore;
use gv_vcs::WorkspaceRepository;
use middleware::correlation::CorrelationId;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub type Worktrees = dyn WorkspaceRepository + Send + Sync;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<SessionRunner<DbStore>>,
    pub worktrees: Arc<Worktrees>,
}

impl AppState {
    pub fn new(runner: Arc<SessionRunner<DbStore>>, worktrees: Arc<Worktrees>) -> Self {
        Self { runner, worktrees }
    }

    pub fn grove(&self) -> &Grove<DbStore> {
        self.runner.grove()
    }
}

pub fn correlation_id_from_request<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<CorrelationId>()
        .map(|value| value.0.clone())
}

pub fn app(state: AppState) -> Router {
    routes::router(state)
}

/// Serves the API until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
}
