//! Epsilon HTTP API
//!
//! Axum server that backs the chat frontend. Each endpoint has a thin
//! handler delegating to an inner function that takes plain arguments and
//! returns `(StatusCode, serde_json::Value)`, so the logic is testable
//! without axum dispatch.
//!
//! Endpoints:
//! - GET    /health                — store reachability, table and session counts
//! - GET    /version               — server version info
//! - POST   /ask                   — answer a question within a session
//! - GET    /sessions/:id/history  — the session's exchanges, oldest first
//! - DELETE /sessions/:id          — forget a session

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use epsilon_core::api::PROTOCOL;
use epsilon_core::config::HttpConfig;
use epsilon_core::{AskRequest, AskResponse};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::subsystems::agent::SqlAgent;
use crate::subsystems::ask::ask;
use crate::subsystems::history::HistoryPolicy;
use crate::subsystems::memory::SessionStore;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub pool: SqlitePool,
    pub agent: Arc<SqlAgent>,
    pub sessions: Arc<SessionStore>,
    pub policy: Arc<dyn HistoryPolicy>,
    /// Parent of every per-request token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/ask", post(ask_handler))
        .route("/sessions/:id/history", get(history_handler))
        .route("/sessions/:id", delete(clear_session_handler))
        .with_state(state)
}

/// Serve until `state.shutdown` is cancelled. In-flight questions see the
/// same cancellation and finish with `success: false`.
pub async fn start_http_server(state: HttpState, config: &HttpConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = state.shutdown.clone();

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Epsilon HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": message.into(),
        "status": "error",
    })
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(
    pool: &SqlitePool,
    sessions: &SessionStore,
) -> (StatusCode, serde_json::Value) {
    let sqlite_version = match epsilon_core::db::health_check(pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    let tables = epsilon_core::db::count_tables(pool).await.unwrap_or_default();

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "sqlite": sqlite_version,
            "tables": tables,
            "sessions": sessions.session_count().await,
        }),
    )
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL,
    })
}

/// Loop failures are still 200: the body carries `success: false` and an
/// explanation the frontend shows as the answer.
pub async fn ask_inner(state: &HttpState, req: AskRequest) -> (StatusCode, serde_json::Value) {
    let question = match req.question {
        Some(q) if !q.trim().is_empty() => q,
        _ => return (StatusCode::BAD_REQUEST, error_body("question field is required")),
    };

    let start = Instant::now();
    let cancel = state.shutdown.child_token();
    let outcome = ask(
        &state.agent,
        &state.sessions,
        state.policy.as_ref(),
        req.session_id,
        question.trim(),
        &cancel,
    )
    .await;
    let took_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        session = %outcome.session_id,
        success = outcome.result.success,
        took_ms,
        "Answered /ask"
    );

    let response = AskResponse {
        session_id: outcome.session_id,
        used_history: outcome.used_history,
        result: outcome.result,
    };
    match serde_json::to_value(&response) {
        Ok(mut body) => {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, body)
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())),
    }
}

pub async fn history_inner(sessions: &SessionStore, session_id: &str) -> (StatusCode, serde_json::Value) {
    if !sessions.exists(session_id).await {
        return (
            StatusCode::NOT_FOUND,
            error_body(format!("unknown session '{session_id}'")),
        );
    }

    let exchanges = sessions.snapshot(session_id).await;
    (
        StatusCode::OK,
        serde_json::json!({
            "session_id": session_id,
            "count": exchanges.len(),
            "exchanges": exchanges,
        }),
    )
}

pub async fn clear_session_inner(
    sessions: &SessionStore,
    session_id: &str,
) -> (StatusCode, serde_json::Value) {
    if sessions.clear(session_id).await {
        tracing::info!(session = %session_id, "Session cleared");
        (
            StatusCode::OK,
            serde_json::json!({ "session_id": session_id, "cleared": true }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            error_body(format!("unknown session '{session_id}'")),
        )
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool, &state.sessions).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn ask_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AskRequest>,
) -> impl IntoResponse {
    let (status, body) = ask_inner(&state, req).await;
    (status, Json(body))
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = history_inner(&state.sessions, &id).await;
    (status, Json(body))
}

pub async fn clear_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = clear_session_inner(&state.sessions, &id).await;
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::agent::AgentSettings;
    use crate::subsystems::executor::QueryExecutor;
    use crate::subsystems::history::KeywordHistoryPolicy;
    use crate::subsystems::inspector::SchemaInspector;
    use crate::subsystems::validator::QueryValidator;
    use crate::testing::{seeded_store, EchoModel, ScriptedModel};
    use epsilon_core::models::Exchange;

    async fn make_state(model: ScriptedModel) -> (tempfile::TempDir, HttpState) {
        let (dir, pool) = seeded_store().await;
        let agent = SqlAgent::new(
            Arc::new(model),
            Arc::new(SchemaInspector::new(pool.clone(), 0)),
            QueryValidator::new(Arc::new(EchoModel)),
            QueryExecutor::new(pool.clone(), 200),
            AgentSettings::default(),
        );
        let state = HttpState {
            pool,
            agent: Arc::new(agent),
            sessions: Arc::new(SessionStore::new(50, 100)),
            policy: Arc::new(KeywordHistoryPolicy::default()),
            shutdown: CancellationToken::new(),
        };
        (dir, state)
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["protocol"], "epsilon/1");
    }

    #[tokio::test]
    async fn test_health_inner_reports_tables() {
        let (_dir, state) = make_state(ScriptedModel::default()).await;

        let (status, body) = health_inner(&state.pool, &state.sessions).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["tables"], 3);
        assert!(body["sqlite"].is_string());
    }

    #[tokio::test]
    async fn test_health_inner_closed_pool_is_unavailable() {
        let (_dir, state) = make_state(ScriptedModel::default()).await;
        state.pool.close().await;

        let (status, body) = health_inner(&state.pool, &state.sessions).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_ask_inner_requires_question() {
        let (_dir, state) = make_state(ScriptedModel::default()).await;

        for question in [None, Some("   ".to_string())] {
            let req = AskRequest {
                question,
                session_id: None,
            };
            let (status, body) = ask_inner(&state, req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["status"], "error");
        }
    }

    #[tokio::test]
    async fn test_ask_inner_returns_answer_and_session() {
        let (_dir, state) = make_state(ScriptedModel::answers(&["Three tables."])).await;

        let req = AskRequest {
            question: Some("How many tables are there?".to_string()),
            session_id: Some("s-1".to_string()),
        };
        let (status, body) = ask_inner(&state, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["output"], "Three tables.");
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["used_history"], false);
        assert!(body["tool_trace"].is_array());
        assert!(body["took_ms"].is_number());
    }

    #[tokio::test]
    async fn test_ask_inner_after_shutdown_is_cancelled() {
        let (_dir, state) = make_state(ScriptedModel::answers(&["never"])).await;
        state.shutdown.cancel();

        let req = AskRequest {
            question: Some("Anything".to_string()),
            session_id: None,
        };
        let (status, body) = ask_inner(&state, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Error: cancelled");
    }

    #[tokio::test]
    async fn test_history_and_clear_inner() {
        let sessions = SessionStore::new(50, 100);

        let (status, _) = history_inner(&sessions, "missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        sessions
            .append("s-1", Exchange::new("q", "a", true, vec![], false))
            .await;
        let (status, body) = history_inner(&sessions, "s-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["exchanges"][0]["question"], "q");

        let (status, body) = clear_session_inner(&sessions, "s-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], true);
        let (status, _) = clear_session_inner(&sessions, "s-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
