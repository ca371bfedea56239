//! Orchestration loop — drives the model through the SQL tools
//!
//! One question runs as a finite loop: the model either calls tools or
//! answers. Every dispatched tool call lands in the trace. Three budgets
//! bound a run (model turns, failed executions, wall clock) and the caller's
//! cancellation token stops it at the next await point.
//!
//! Execution always goes through the validator first. When the model skips
//! `validate_query`, or executes something other than what the validator
//! last returned, the loop validates on its behalf and executes the result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use epsilon_core::config::AgentConfig;
use epsilon_core::llm::{ChatMessage, ChatModel, ChatRequest, ModelTurn, ToolInvocation, ToolSpec};
use epsilon_core::models::{ToolCall, ToolName};
use epsilon_core::AgentResult;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::executor::{ExecutionFailure, QueryExecutor};
use super::inspector::{SchemaError, SchemaInspector};
use super::validator::QueryValidator;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub max_attempts: u32,
    /// `None` disables the wall-clock budget.
    pub deadline: Option<Duration>,
    pub default_row_limit: u32,
    pub reference_date: Option<String>,
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            max_attempts: config.max_attempts.max(1),
            deadline: (config.deadline_seconds > 0)
                .then(|| Duration::from_secs(config.deadline_seconds)),
            default_row_limit: config.default_row_limit,
            reference_date: config.reference_date.clone(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// Terminal failures. Recoverable tool failures never surface here; they
/// are handed back to the model as tool output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("gave up after {attempts} failed query attempts; last query `{last_query}` failed: {last_error}")]
    RetryBudgetExhausted {
        attempts: u32,
        last_query: String,
        last_error: String,
    },

    #[error("no answer within {turns} model turns ({last_attempt})")]
    IterationBudgetExhausted { turns: u32, last_attempt: String },

    #[error("no answer within {millis} ms ({last_attempt})")]
    DeadlineExceeded { millis: u128, last_attempt: String },

    #[error("cancelled")]
    Cancelled,
}

impl From<SchemaError> for AgentError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::StoreUnavailable(reason) | SchemaError::Lookup(reason) => {
                AgentError::StoreUnavailable(reason)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Start,
    InspectingSchema,
    Validating,
    Executing,
    Answering,
    Done,
    Failed,
}

/// Per-question bookkeeping. Lives outside the driving future so the trace
/// survives cancellation and deadline expiry.
struct RunState {
    state: LoopState,
    trace: Vec<ToolCall>,
    failed_attempts: u32,
    last_validated: Option<String>,
    last_failure: Option<(String, String)>,
}

impl RunState {
    fn new() -> Self {
        Self {
            state: LoopState::Start,
            trace: Vec::new(),
            failed_attempts: 0,
            last_validated: None,
            last_failure: None,
        }
    }

    fn enter(&mut self, next: LoopState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Loop transition");
            self.state = next;
        }
    }

    fn record(&mut self, tool: ToolName, input: impl Into<String>, output: impl Into<String>) {
        self.trace.push(ToolCall::new(tool, input, output));
    }

    fn last_attempt(&self) -> String {
        match &self.last_failure {
            Some((query, error)) => format!("last query `{query}` failed: {error}"),
            None => "no failed query".to_string(),
        }
    }
}

pub struct SqlAgent {
    model: Arc<dyn ChatModel>,
    inspector: Arc<SchemaInspector>,
    validator: QueryValidator,
    executor: QueryExecutor,
    settings: AgentSettings,
}

impl SqlAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        inspector: Arc<SchemaInspector>,
        validator: QueryValidator,
        executor: QueryExecutor,
        settings: AgentSettings,
    ) -> Self {
        Self {
            model,
            inspector,
            validator,
            executor,
            settings,
        }
    }

    pub fn inspector(&self) -> &SchemaInspector {
        &self.inspector
    }

    /// Answer one question. Never panics and never returns an error: every
    /// failure becomes `success: false` with whatever trace was gathered.
    pub async fn run(
        &self,
        question: &str,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let mut run = RunState::new();
        tracing::info!(
            model = self.model.name(),
            with_context = context.is_some(),
            "Answering question"
        );

        let outcome = {
            let bounded = self.bounded(self.drive(question, context, &mut run));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(AgentError::Cancelled)),
                outcome = bounded => outcome,
            }
        };

        let outcome = outcome.unwrap_or_else(|| {
            Err(AgentError::DeadlineExceeded {
                millis: self.settings.deadline.map(|d| d.as_millis()).unwrap_or_default(),
                last_attempt: run.last_attempt(),
            })
        });

        match outcome {
            Ok(answer) => {
                run.enter(LoopState::Done);
                tracing::info!(tools = run.trace.len(), "Question answered");
                AgentResult::ok(answer, run.trace)
            }
            Err(e) => {
                run.enter(LoopState::Failed);
                tracing::warn!(error = %e, tools = run.trace.len(), "Question failed");
                AgentResult::failed(format!("Error: {e}"), run.trace)
            }
        }
    }

    /// `None` when the wall-clock budget ran out first.
    async fn bounded<F>(&self, fut: F) -> Option<Result<String, AgentError>>
    where
        F: Future<Output = Result<String, AgentError>>,
    {
        match self.settings.deadline {
            Some(limit) => {
                let deadline = tokio::time::Instant::now() + limit;
                tokio::time::timeout_at(deadline, fut).await.ok()
            }
            None => Some(fut.await),
        }
    }

    async fn drive(
        &self,
        question: &str,
        context: Option<&str>,
        run: &mut RunState,
    ) -> Result<String, AgentError> {
        let instructions = self.instructions(context).await;
        let mut request = ChatRequest::new(vec![
            ChatMessage::system(instructions),
            ChatMessage::user(question),
        ])
        .with_tools(tool_specs());

        for turn in 1..=self.settings.max_iterations {
            let reply = self
                .model
                .complete(&request)
                .await
                .map_err(|e| AgentError::ModelUnavailable(e.to_string()))?;

            match reply {
                ModelTurn::Answer(answer) => {
                    run.enter(LoopState::Answering);
                    tracing::debug!(turn, "Model produced final answer");
                    return Ok(answer);
                }
                ModelTurn::ToolCalls(calls) => {
                    tracing::debug!(turn, calls = calls.len(), "Model requested tools");
                    request
                        .messages
                        .push(ChatMessage::assistant_tool_calls(calls.clone()));
                    for call in calls {
                        let output = self.dispatch(&call, run).await?;
                        request.messages.push(ChatMessage::tool_result(call.id, output));
                    }
                }
            }
        }

        Err(AgentError::IterationBudgetExhausted {
            turns: self.settings.max_iterations,
            last_attempt: run.last_attempt(),
        })
    }

    /// Run one tool call and return the text fed back to the model.
    async fn dispatch(&self, call: &ToolInvocation, run: &mut RunState) -> Result<String, AgentError> {
        let Some(tool) = ToolName::parse(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested unknown tool");
            let known: Vec<&str> = ToolName::ALL.iter().map(ToolName::as_str).collect();
            return Ok(format!(
                "Error: unknown tool '{}'. Available tools: {}",
                call.name,
                known.join(", ")
            ));
        };
        tracing::info!(tool = %tool, "Dispatching tool");

        match tool {
            ToolName::ListTables => {
                run.enter(LoopState::InspectingSchema);
                let output = match self.inspector.list_tables().await {
                    Ok(tables) => tables.join(", "),
                    Err(SchemaError::Lookup(e)) => format!("Error: {e}"),
                    Err(e) => return Err(e.into()),
                };
                run.record(tool, "", output.clone());
                Ok(output)
            }
            ToolName::GetSchema => {
                run.enter(LoopState::InspectingSchema);
                let tables = table_arguments(&call.arguments);
                let input = tables.join(", ");
                let output = if tables.is_empty() {
                    "Error: no table names given. Call list_tables first.".to_string()
                } else {
                    match self.inspector.get_schema(&tables).await {
                        Ok(report) => report.render(),
                        Err(SchemaError::Lookup(e)) => format!("Error: {e}"),
                        Err(e) => return Err(e.into()),
                    }
                };
                run.record(tool, input, output.clone());
                Ok(output)
            }
            ToolName::ValidateQuery => {
                let sql = sql_argument(&call.arguments);
                if sql.is_empty() {
                    let output = "Error: no query given.".to_string();
                    run.record(tool, "", output.clone());
                    return Ok(output);
                }
                self.validate(&sql, run).await
            }
            ToolName::ExecuteQuery => {
                let proposed = sql_argument(&call.arguments);
                if proposed.is_empty() {
                    let output = "Error: no query given.".to_string();
                    run.record(tool, "", output.clone());
                    return Ok(output);
                }
                let sql = if run.last_validated.as_deref() == Some(proposed.as_str()) {
                    proposed
                } else {
                    tracing::debug!("Execution requested without validation; validating first");
                    self.validate(&proposed, run).await?
                };
                self.execute(&sql, run).await
            }
        }
    }

    async fn validate(&self, sql: &str, run: &mut RunState) -> Result<String, AgentError> {
        run.enter(LoopState::Validating);
        let checked = self
            .validator
            .check(sql)
            .await
            .map_err(|e| AgentError::ModelUnavailable(e.to_string()))?;
        run.record(ToolName::ValidateQuery, sql, checked.clone());
        run.last_validated = Some(checked.clone());
        Ok(checked)
    }

    async fn execute(&self, sql: &str, run: &mut RunState) -> Result<String, AgentError> {
        run.enter(LoopState::Executing);
        match self.executor.execute(sql).await {
            Ok(rows) => {
                tracing::info!(rows = rows.len(), truncated = rows.truncated, "Query executed");
                let output = rows.render();
                run.record(ToolName::ExecuteQuery, sql, output.clone());
                Ok(output)
            }
            Err(ExecutionFailure::StoreUnavailable(e)) => {
                run.record(ToolName::ExecuteQuery, sql, format!("Error: store unavailable: {e}"));
                Err(AgentError::StoreUnavailable(e))
            }
            Err(failure) => {
                run.failed_attempts += 1;
                tracing::info!(
                    attempt = run.failed_attempts,
                    budget = self.settings.max_attempts,
                    error = %failure,
                    "Query attempt failed"
                );
                let output = format!("Error: {failure}. Please rewrite your query and try again.");
                run.record(ToolName::ExecuteQuery, sql, output.clone());
                run.last_failure = Some((sql.to_string(), failure.to_string()));

                if run.failed_attempts >= self.settings.max_attempts {
                    return Err(AgentError::RetryBudgetExhausted {
                        attempts: run.failed_attempts,
                        last_query: sql.to_string(),
                        last_error: failure.to_string(),
                    });
                }
                Ok(output)
            }
        }
    }

    async fn instructions(&self, context: Option<&str>) -> String {
        let today = self
            .settings
            .reference_date
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());

        let mut prompt = format!(
            "You are a SQL expert with strong attention to detail.\n\
             Given an input question, write a syntactically correct SQLite query, \
             run it, and answer from its results.\n\
             When writing the query:\n\
             - Today is {today}; resolve relative dates against it.\n\
             - Return at most {limit} rows unless the user asks for a different number.\n\
             - Order the results by a relevant column.\n\
             - Select only the columns needed to answer.\n\
             - If a query fails or returns no rows, rewrite it and try again.\n\
             - Never write INSERT, UPDATE, DELETE, DROP or any other statement that \
             modifies the database. Such statements are rejected.\n\
             - Use table and column names exactly as they appear in the schema.\n\
             - Always call validate_query on a query before execute_query.\n\
             - Use list_tables and get_schema to learn the database structure when needed.\n\
             - Give the final answer in a clear, concise form.\n\
             - If an error occurs, explain it and suggest what to do next.\n\
             - Never answer with SQL; answer with the query results.",
            limit = self.settings.default_row_limit,
        );

        if let Some(tables) = self.inspector.cached_tables().await {
            prompt.push_str(&format!("\n\nKnown tables: {}.", tables.join(", ")));
        }
        if let Some(context) = context {
            prompt.push_str("\n\n");
            prompt.push_str(context);
        }
        prompt
    }
}

fn tool_specs() -> Vec<ToolSpec> {
    let sql_parameters = json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "A single SQLite SELECT statement" }
        },
        "required": ["query"]
    });

    vec![
        ToolSpec {
            name: ToolName::ListTables.as_str().to_string(),
            description: "List the tables in the database.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: ToolName::GetSchema.as_str().to_string(),
            description: "Columns, CREATE statement and sample rows for the given tables. \
                          Call list_tables first to get valid names."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tables": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Table names"
                    }
                },
                "required": ["tables"]
            }),
        },
        ToolSpec {
            name: ToolName::ValidateQuery.as_str().to_string(),
            description: "Double check a query for common mistakes. Returns the corrected \
                          query, or the same query if nothing needed fixing."
                .to_string(),
            parameters: sql_parameters.clone(),
        },
        ToolSpec {
            name: ToolName::ExecuteQuery.as_str().to_string(),
            description: "Execute a validated SELECT query and return its rows. Returns an \
                          error when the query fails or finds no rows; rewrite it and retry."
                .to_string(),
            parameters: sql_parameters,
        },
    ]
}

/// `{"query": ...}`, `{"sql": ...}` or a bare string.
fn sql_argument(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => ["query", "sql"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

/// `{"tables": [...]}`, `{"tables": "a, b"}`, or the same shapes bare.
fn table_arguments(arguments: &Value) -> Vec<String> {
    let value = match arguments {
        Value::Object(map) => match map.get("tables").or_else(|| map.get("table_names")) {
            Some(value) => value,
            None => return Vec::new(),
        },
        other => other,
    };

    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
