use thiserror::Error;

#[derive(Error, Debug)]
pub enum EpsilonError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] crate::llm::LlmError),

    #[error("Other error: {0}")]
    Other(String),
}
