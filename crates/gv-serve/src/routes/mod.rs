pub mod approvals;
pub mod error;
pub mod health;
pub mod reviews;
pub mod sessions;

use crate::middleware::correlation::correlation_middleware;
use crate::{AppState, correlation_id_from_request, sse};
use axum::body::Body;
use axum::http::Request;
use axum::routing::get;
use axum::{Router, middleware};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info_span;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::router(state.clone()))
        .merge(sessions::router(state.clone()))
        .merge(approvals::router(state.clone()))
        .merge(reviews::router(state.clone()))
        .route("/stream", get(sse::stream).with_state(state))
        .route_layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            info_span!(
                "http",
                method = %request.method(),
                uri = %request.uri(),
                correlation_id = %correlation_id_from_request(request).unwrap_or_default(),
            )
        }))
        .route_layer(middleware::from_fn(correlation_middleware));

    Router::new().nest("/api", api).layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::correlation::HEADER_NAME;
    use axum::http::{Method, StatusCode};
    use axum::response::Response;
    use futures::StreamExt;
    use gv_agent::AgentProcessManager;
    use gv_core::types::{NewSession, Session, SessionStatus, ToolApproval};
    use gv_core::{Grove, GroveConfig, SessionRunner};
    use gv_db::DbStore;
    use gv_events::BroadcastHub;
    use gv_vcs::{Workspace, WorkspaceError, WorkspaceRepository};
    use serde_json::{Value, json};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct StaticWorktrees(Vec<Workspace>);

    impl WorkspaceRepository for StaticWorktrees {
        fn list(&self) -> Result<Vec<Workspace>, WorkspaceError> {
            Ok(self.0.clone())
        }

        fn create(
            &self,
            path: &Path,
            _branch: &str,
            _issue: Option<u64>,
        ) -> Result<Workspace, WorkspaceError> {
            Err(WorkspaceError::AlreadyExists {
                path: path.display().to_string(),
            })
        }

        fn remove(&self, path: &Path, _force: bool) -> Result<(), WorkspaceError> {
            Err(WorkspaceError::NotFound {
                path: path.display().to_string(),
            })
        }

        fn prune(&self) -> Result<(), WorkspaceError> {
            Ok(())
        }
    }

    fn state() -> AppState {
        state_with(GroveConfig::default())
    }

    /// State whose agent is a shell script written into `dir`.
    fn agent_state(dir: &Path, script: &str) -> AppState {
        let script_path = dir.join("agent.sh");
        std::fs::write(&script_path, script).unwrap();
        let mut config = GroveConfig::default();
        config.agent.program = "sh".to_string();
        config.agent.extra_args = format!("'{}'", script_path.display());
        config.poll.interval_ms = 20;
        config.poll.timeout_secs = 10;
        state_with(config)
    }

    fn state_with(config: GroveConfig) -> AppState {
        let agents = AgentProcessManager::new(config.agent_config().unwrap());
        let grove = Grove::new(DbStore::in_memory().unwrap(), BroadcastHub::new(1024));
        let runner = SessionRunner::new(Arc::new(grove), Arc::new(agents), config);
        let worktrees = StaticWorktrees(vec![
            Workspace {
                path: PathBuf::from("/repo"),
                branch: Some("main".into()),
                head: None,
                is_primary: true,
            },
            Workspace {
                path: PathBuf::from("/repo/.worktrees/issue-42"),
                branch: Some("issue-42".into()),
                head: None,
                is_primary: false,
            },
        ]);
        AppState::new(Arc::new(runner), Arc::new(worktrees))
    }

    fn session(state: &AppState) -> Session {
        state
            .grove()
            .sessions()
            .create(NewSession {
                worktree_path: PathBuf::from("/repo/.worktrees/manual"),
                issue_number: None,
                prompt: None,
            })
            .unwrap()
    }

    async fn send(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_echoes_correlation_id() {
        let state = state();
        let request = Request::builder()
            .uri("/api/health")
            .header(HEADER_NAME, "req_test")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADER_NAME], "req_test");
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_sync_then_list_by_status() {
        let state = state();
        let response = send(&state, Method::POST, "/api/sync", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await;
        assert_eq!(created.as_array().unwrap().len(), 1);
        assert_eq!(created[0]["issue_number"], 42);

        let pending = json_body(send(&state, Method::GET, "/api/sessions?status=pending", None).await).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);
        let running = json_body(send(&state, Method::GET, "/api/sessions?status=running", None).await).await;
        assert!(running.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_session_ids() {
        let state = state();
        let missing = format!("/api/sessions/{}/stop", gv_core::types::SessionId::generate());
        let response = send(&state, Method::POST, &missing, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["code"], "not_found");
        assert!(body["correlation_id"].as_str().unwrap().starts_with("req_"));

        let response = send(&state, Method::POST, "/api/sessions/nope/stop", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_idle_session_keeps_status() {
        let state = state();
        let session = session(&state);
        let uri = format!("/api/sessions/{}/stop", session.id);
        let response = send(&state, Method::POST, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "pending");
    }

    #[tokio::test]
    async fn test_run_reports_agent_activity_to_observers() {
        let dir = tempfile::tempdir().unwrap();
        let state = agent_state(
            dir.path(),
            r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"on it"}]}}'
echo '{"type":"result","session_id":"agent-9"}'
"#,
        );
        let mut observer = state.grove().hub().subscribe();
        let session = state
            .runner
            .create_session(dir.path().to_path_buf(), None, Some("go".into()))
            .unwrap();

        let uri = format!("/api/sessions/{}/run", session.id);
        let response = send(&state, Method::POST, &uri, Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["status"], "running");

        let finished = state
            .runner
            .wait_for_completion(&session.id)
            .await
            .ready()
            .unwrap();
        assert_eq!(finished.status, SessionStatus::Completed);

        let mut seen = Vec::new();
        while let Some(message) = observer.try_recv() {
            seen.push(message);
        }
        assert!(seen.iter().any(|message| message.kind == "event:created"
            && message.payload["content"] == "on it"));
        assert!(seen.iter().any(|message| message.kind == "session:updated"));
    }

    #[tokio::test]
    async fn test_run_and_resume_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let state = agent_state(dir.path(), "exit 0\n");
        let session = state
            .runner
            .create_session(dir.path().to_path_buf(), None, Some("go".into()))
            .unwrap();

        let missing = format!("/api/sessions/{}/run", gv_core::types::SessionId::generate());
        let response = send(&state, Method::POST, &missing, Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let uri = format!("/api/sessions/{}/resume", session.id);
        let response = send(&state, Method::POST, &uri, Some(json!({ "prompt": " " }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&state, Method::POST, &uri, Some(json!({ "prompt": "more" }))).await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(json_body(response).await["code"], "precondition_failed");
    }

    #[tokio::test]
    async fn test_resolve_approval_once() {
        let state = state();
        let session = session(&state);
        let approval: ToolApproval = state
            .grove()
            .approvals()
            .request(&session.id, "Bash", serde_json::Map::new())
            .unwrap();
        let uri = format!("/api/approvals/{}/resolve", approval.id);
        let input = json!({ "approved": false, "approver": "alice" });

        let response = send(&state, Method::POST, &uri, Some(input.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["approver"], "alice");

        let response = send(&state, Method::POST, &uri, Some(input)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_review_cannot_resolve_to_pending() {
        let state = state();
        let session = session(&state);
        let review = state
            .grove()
            .reviews()
            .request(&session.id, Vec::new())
            .unwrap();
        let uri = format!("/api/reviews/{}/resolve", review.id);

        let response = send(&state, Method::POST, &uri, Some(json!({ "status": "pending" }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &state,
            Method::POST,
            &uri,
            Some(json!({ "status": "approved", "comment": "ship it" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["comment"], "ship it");
    }

    #[tokio::test]
    async fn test_stream_delivers_hub_messages() {
        let state = state();
        let response = send(&state, Method::GET, "/api/stream", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.grove().hub().subscriber_count(), 1);

        let created = session(&state);
        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let message: Value = serde_json::from_str(data).unwrap();
        assert_eq!(message["type"], "session:created");
        assert_eq!(message["payload"]["id"], created.id.as_str());
        assert_eq!(
            message["payload"]["status"],
            serde_json::to_value(SessionStatus::Pending).unwrap()
        );
        assert!(message["at"].is_string());
    }
}
