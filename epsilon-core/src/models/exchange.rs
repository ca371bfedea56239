use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ToolCall;

/// A finished question/answer pair. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub question: String,
    /// The answer on success, the error description otherwise.
    pub answer: String,
    pub success: bool,
    pub tool_trace: Vec<ToolCall>,
    pub used_history: bool,
}

impl Exchange {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        success: bool,
        tool_trace: Vec<ToolCall>,
        used_history: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            question: question.into(),
            answer: answer.into(),
            success,
            tool_trace,
            used_history,
        }
    }
}
