//! Shared setup for integration tests: a seeded SQLite file, a config file
//! pointing at it, and OpenAI-shaped response bodies for wiremock.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use epsilon_core::EpsilonConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub const API_KEY_ENV: &str = "EPSILON_IT_API_KEY";

pub const TOP_FIVE: &str = "SELECT подразделение, доход FROM train_and_forecast \
                            WHERE дата LIKE '2024%' ORDER BY доход DESC LIMIT 5";

const SEED: &[&str] = &[
    "CREATE TABLE train_and_forecast (дата TEXT, подразделение TEXT, доход REAL, операционные_расходы REAL)",
    "INSERT INTO train_and_forecast VALUES
        ('2024-01-01', 'Алматы', 910.5, 390.0),
        ('2024-01-01', 'Шымкент', 420.0, 210.0),
        ('2024-01-01', 'Караганда', 380.25, 190.0),
        ('2024-02-01', 'Астана', 1250.0, 520.0),
        ('2024-02-01', 'Актобе', 300.0, 160.0),
        ('2024-02-01', 'Павлодар', 275.0, 150.0)",
    "CREATE TABLE main_metrics (model TEXT, mape REAL, rmse REAL)",
    "INSERT INTO main_metrics VALUES ('arima', 0.081, 41.2), ('prophet', 0.064, 35.9), ('xgboost', 0.052, 30.4)",
    "CREATE TABLE var1_correlations (variable TEXT, correlation REAL)",
    "INSERT INTO var1_correlations VALUES ('доход', 1.0)",
];

/// Create `analytics.db` under `dir`, optionally seeded, and return its URL.
pub async fn create_database(dir: &Path, seeded: bool) -> String {
    let url = format!("sqlite://{}", dir.join("analytics.db").display());
    let writer = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::from_str(&url)
                .unwrap()
                .create_if_missing(true),
        )
        .await
        .expect("writer pool");
    if seeded {
        for statement in SEED {
            sqlx::query(statement).execute(&writer).await.expect("seed");
        }
    } else {
        // Forces the file header to be written.
        sqlx::query("PRAGMA user_version = 1")
            .execute(&writer)
            .await
            .expect("init");
    }
    writer.close().await;
    url
}

/// Write an `epsilon.toml` for `db_url` and a model at `model_url`, then load it.
pub fn load_config(dir: &Path, db_url: &str, model_url: &str, api_key_env: &str) -> EpsilonConfig {
    let path = dir.join("epsilon.toml");
    let mut file = std::fs::File::create(&path).expect("config file");
    write!(
        file,
        r#"
[service]
log_level = "debug"

[database]
url = "{db_url}"
max_connections = 2

[llm]
base_url = "{model_url}"
model = "gpt-4o"
max_retries = 1
retry_delay_ms = 10
api_key_env = "{api_key_env}"

[agent]
reference_date = "2025-04-15"
"#
    )
    .expect("write config");

    EpsilonConfig::load(path.to_str().unwrap()).expect("load config")
}

pub fn answer_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
}

pub fn tool_call_body(id: &str, name: &str, arguments: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments.to_string() }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
}
