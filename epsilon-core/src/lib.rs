pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;

pub use api::{AgentResult, AskRequest, AskResponse};
pub use config::EpsilonConfig;
pub use error::EpsilonError;
pub use llm::{
    create_model, ChatClientConfig, ChatMessage, ChatModel, ChatRequest, LlmError, ModelTurn,
    OpenAiChatClient, Role, ToolInvocation, ToolSpec,
};
