//! Wiring: build every subsystem from config and hand back the shared
//! state the HTTP API serves from.

use std::sync::Arc;

use epsilon_core::llm::ChatModel;
use epsilon_core::{EpsilonConfig, EpsilonError};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::http::HttpState;
use crate::subsystems::agent::{AgentSettings, SqlAgent};
use crate::subsystems::executor::QueryExecutor;
use crate::subsystems::history::KeywordHistoryPolicy;
use crate::subsystems::inspector::SchemaInspector;
use crate::subsystems::memory::SessionStore;
use crate::subsystems::validator::QueryValidator;

/// Open the store, create the model client and assemble the state.
pub async fn build_state(
    config: &EpsilonConfig,
    shutdown: CancellationToken,
) -> Result<HttpState, EpsilonError> {
    let pool = epsilon_core::db::create_pool(&config.database).await?;
    let tables = epsilon_core::db::count_tables(&pool).await?;
    if tables == 0 {
        return Err(EpsilonError::Other(format!(
            "database {} has no tables; load the analytical tables first",
            config.database.url
        )));
    }
    tracing::info!(tables, url = %config.database.url, "Analytical store opened");

    let model: Arc<dyn ChatModel> = Arc::from(epsilon_core::llm::create_model(&config.llm)?);
    tracing::info!(model = model.name(), "Model client ready");

    Ok(assemble(pool, model, config, shutdown))
}

/// The loop and the validator share one model client.
pub fn assemble(
    pool: SqlitePool,
    model: Arc<dyn ChatModel>,
    config: &EpsilonConfig,
    shutdown: CancellationToken,
) -> HttpState {
    let inspector = Arc::new(SchemaInspector::new(
        pool.clone(),
        config.agent.schema_sample_rows,
    ));
    let agent = SqlAgent::new(
        model.clone(),
        inspector,
        QueryValidator::new(model),
        QueryExecutor::new(pool.clone(), config.agent.max_result_rows),
        AgentSettings::from(&config.agent),
    );

    HttpState {
        pool,
        agent: Arc::new(agent),
        sessions: Arc::new(SessionStore::new(
            config.memory.capacity,
            config.memory.max_sessions,
        )),
        policy: Arc::new(KeywordHistoryPolicy::new(
            config.memory.history_keywords.clone(),
        )),
        shutdown,
    }
}
