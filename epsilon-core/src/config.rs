use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct EpsilonConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// e.g. `sqlite://company_database.db`
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_acquire_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: usize,
    #[serde(default = "default_llm_retry_delay")]
    pub retry_delay_ms: u64,
    /// Environment variable the API key is read from.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    crate::llm::DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_retries() -> usize {
    3
}

fn default_llm_retry_delay() -> u64 {
    1000
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Budgets and SQL-generation knobs for the query loop.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Model turns allowed per question.
    pub max_iterations: u32,
    /// `execute_query` attempts allowed per question.
    pub max_attempts: u32,
    /// Wall-clock budget per question; 0 disables it.
    pub deadline_seconds: u64,
    pub default_row_limit: u32,
    pub max_result_rows: usize,
    pub schema_sample_rows: u32,
    /// Overrides "today" in the instructions (YYYY-MM-DD).
    pub reference_date: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_attempts: 5,
            deadline_seconds: 120,
            default_row_limit: 15,
            max_result_rows: 200,
            schema_sample_rows: 3,
            reference_date: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Exchanges kept per session.
    pub capacity: usize,
    /// Sessions kept at once; the least recently used is dropped beyond it.
    pub max_sessions: usize,
    pub history_keywords: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            max_sessions: 1000,
            history_keywords: ["those", "these", "previous", "last", "same", "that", "them"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8770,
        }
    }
}

impl EpsilonConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
