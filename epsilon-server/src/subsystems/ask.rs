//! One question, end to end: decide on history, run the loop, remember
//! the exchange.

use epsilon_core::AgentResult;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::agent::SqlAgent;
use super::history::{context_block, HistoryPolicy};
use super::memory::SessionStore;

#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub session_id: String,
    pub used_history: bool,
    pub result: AgentResult,
}

pub async fn ask(
    agent: &SqlAgent,
    sessions: &SessionStore,
    policy: &dyn HistoryPolicy,
    session_id: Option<String>,
    question: &str,
    cancel: &CancellationToken,
) -> AskOutcome {
    let session_id = session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let history = sessions.snapshot(&session_id).await;
    let used_history = policy.should_use_history(question, !history.is_empty());
    let context = if used_history {
        context_block(&history)
    } else {
        None
    };
    tracing::debug!(
        session = %session_id,
        history = history.len(),
        used_history,
        "Prepared question context"
    );

    let result = agent.run(question, context.as_deref(), cancel).await;

    let stored = sessions
        .append(&session_id, result.clone().into_exchange(question, used_history))
        .await;
    tracing::debug!(session = %session_id, stored, "Exchange recorded");

    AskOutcome {
        session_id,
        used_history,
        result,
    }
}
