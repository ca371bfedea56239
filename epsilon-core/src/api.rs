use serde::{Deserialize, Serialize};

use crate::models::{Exchange, ToolCall};

pub const PROTOCOL: &str = "epsilon/1";

/// What the query loop hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_trace: Vec<ToolCall>,
}

impl AgentResult {
    pub fn ok(output: impl Into<String>, tool_trace: Vec<ToolCall>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            tool_trace,
        }
    }

    pub fn failed(error: impl Into<String>, tool_trace: Vec<ToolCall>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            tool_trace,
        }
    }

    pub fn output_or_error(&self) -> &str {
        if self.success {
            self.output.as_deref().unwrap_or_default()
        } else {
            self.error.as_deref().unwrap_or("unknown error")
        }
    }

    /// Freeze this result into a history entry.
    pub fn into_exchange(self, question: impl Into<String>, used_history: bool) -> Exchange {
        let answer = self.output_or_error().to_string();
        Exchange::new(question, answer, self.success, self.tool_trace, used_history)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub session_id: String,
    pub used_history: bool,
    #[serde(flatten)]
    pub result: AgentResult,
}
