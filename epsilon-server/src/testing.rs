//! Shared fixtures for unit tests: a seeded analytical store and scripted
//! chat models.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use epsilon_core::config::DatabaseConfig;
use epsilon_core::llm::{ChatModel, ChatRequest, LlmError, ModelTurn, Role, ToolInvocation};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const SEED: &[&str] = &[
    "CREATE TABLE train_and_forecast (
        дата TEXT NOT NULL,
        подразделение TEXT NOT NULL,
        доход REAL,
        операционные_расходы REAL
    )",
    "INSERT INTO train_and_forecast VALUES
        ('2023-12-01', 'Астана', 990.0, 400.0),
        ('2023-12-01', 'Алматы', 870.0, 380.0),
        ('2024-01-01', 'Алматы', 910.5, 390.0),
        ('2024-01-01', 'Шымкент', 420.0, 210.0),
        ('2024-01-01', 'Караганда', 380.25, 190.0),
        ('2024-02-01', 'Астана', 1250.0, 520.0),
        ('2024-02-01', 'Актобе', 300.0, 160.0),
        ('2024-02-01', 'Павлодар', 275.0, 150.0),
        ('2025-04-01', 'Астана', 1400.0, 610.0)",
    "CREATE TABLE main_metrics (
        model TEXT NOT NULL,
        mape REAL,
        rmse REAL
    )",
    "INSERT INTO main_metrics VALUES
        ('arima', 0.081, 41.2),
        ('prophet', 0.064, 35.9),
        ('xgboost', 0.052, 30.4)",
    "CREATE TABLE var1_correlations (
        variable TEXT NOT NULL,
        correlation REAL
    )",
    "INSERT INTO var1_correlations VALUES
        ('доход', 1.0),
        ('операционные_расходы', 0.87)",
];

/// A file-backed store with the three analytical tables, reopened through
/// the production read-only pool.
pub(crate) async fn seeded_store() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("analytics.db");
    let url = format!("sqlite://{}", path.display());

    let writer = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::from_str(&url)
                .expect("sqlite url")
                .create_if_missing(true),
        )
        .await
        .expect("writer pool");
    for statement in SEED {
        sqlx::query(statement)
            .execute(&writer)
            .await
            .expect("seed statement");
    }
    writer.close().await;

    let pool = epsilon_core::db::create_pool(&DatabaseConfig {
        url,
        max_connections: 2,
        acquire_timeout_seconds: 2,
    })
    .await
    .expect("read-only pool");
    (dir, pool)
}

/// Plays back a fixed sequence of turns and records every request it saw.
/// Runs out with `EmptyResponse`.
#[derive(Clone, Default)]
pub(crate) struct ScriptedModel {
    turns: Arc<Mutex<VecDeque<Result<ModelTurn, LlmError>>>>,
    seen: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedModel {
    pub(crate) fn new(turns: Vec<Result<ModelTurn, LlmError>>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into())),
            seen: Arc::default(),
        }
    }

    pub(crate) fn answers(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(ModelTurn::Answer(t.to_string())))
                .collect(),
        )
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn, LlmError> {
        self.seen.lock().unwrap().push(request.clone());
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Answers with the last user message verbatim. Stands in for a reviewer
/// that finds nothing to fix.
pub(crate) struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn, LlmError> {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.clone())
            .map(ModelTurn::Answer)
            .ok_or(LlmError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// One tool call turn with a single invocation.
pub(crate) fn call(id: &str, name: &str, arguments: serde_json::Value) -> Result<ModelTurn, LlmError> {
    Ok(ModelTurn::ToolCalls(vec![ToolInvocation {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }]))
}

pub(crate) fn answer(text: &str) -> Result<ModelTurn, LlmError> {
    Ok(ModelTurn::Answer(text.to_string()))
}
