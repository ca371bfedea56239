use serde::{Deserialize, Serialize};
use std::fmt;

/// The four tools the model may call while answering a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ListTables,
    GetSchema,
    ValidateQuery,
    ExecuteQuery,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::ListTables,
        ToolName::GetSchema,
        ToolName::ValidateQuery,
        ToolName::ExecuteQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ListTables => "list_tables",
            ToolName::GetSchema => "get_schema",
            ToolName::ValidateQuery => "validate_query",
            ToolName::ExecuteQuery => "execute_query",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a tool trace, in invocation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: ToolName,
    pub input: String,
    pub output: String,
}

impl ToolCall {
    pub fn new(tool_name: ToolName, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name,
            input: input.into(),
            output: output.into(),
        }
    }
}
