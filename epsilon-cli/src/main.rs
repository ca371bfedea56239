//! epsilon-cli — terminal frontend for the Epsilon HTTP API
//!
//! # Subcommands
//! - `ask <question> [--session <id>] [--json]` — answer one question
//! - `chat [--show-sql]`                        — interactive session
//! - `history <session>`                         — print a session's exchanges
//! - `status`                                    — show server health

use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8770";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "epsilon-cli", version, about = "Ask questions about the analytical database")]
struct Cli {
    /// Epsilon HTTP server URL (overrides EPSILON_HTTP_URL env var)
    #[arg(long, env = "EPSILON_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        question: String,

        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Interactive session; follow-up questions can refer to earlier answers
    Chat {
        /// Print the SQL that was executed for each answer
        #[arg(long)]
        show_sql: bool,
    },

    /// Show the exchanges recorded for a session
    History { session: String },

    /// Show Epsilon server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TraceEntry {
    pub tool_name: String,
    pub input: String,
    pub output: String,
}

/// Body of `POST /ask`
#[derive(Debug, Deserialize)]
pub struct AskResponse {
    pub session_id: String,
    pub used_history: bool,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub tool_trace: Vec<TraceEntry>,
    pub took_ms: Option<u64>,
}

impl AskResponse {
    pub fn text(&self) -> &str {
        if self.success {
            self.output.as_deref().unwrap_or("")
        } else {
            self.error.as_deref().unwrap_or("unknown error")
        }
    }

    /// Statements that actually ran, in order.
    pub fn executed_sql(&self) -> Vec<&str> {
        self.tool_trace
            .iter()
            .filter(|t| t.tool_name == "execute_query" && !t.output.starts_with("Error:"))
            .map(|t| t.input.as_str())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryExchange {
    pub question: String,
    pub answer: String,
    pub success: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub count: usize,
    pub exchanges: Vec<HistoryExchange>,
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn post_ask(
    client: &reqwest::blocking::Client,
    server: &str,
    question: &str,
    session: Option<&str>,
) -> anyhow::Result<serde_json::Value> {
    let url = format!("{}/ask", server);
    let body = serde_json::json!({
        "question": question,
        "session_id": session,
    });

    let resp = client
        .post(&url)
        .json(&body)
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        anyhow::bail!("server returned {}: {}", status, text);
    }
    Ok(resp.json()?)
}

fn do_ask(server: &str, question: &str, session: Option<&str>, json: bool) -> anyhow::Result<()> {
    let client = client(180)?;
    let raw = post_ask(&client, server, question, session)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&raw)?);
        return Ok(());
    }

    let resp: AskResponse = serde_json::from_value(raw)?;
    println!("{}", resp.text());
    eprintln!("(session {})", resp.session_id);
    if !resp.success {
        std::process::exit(2);
    }
    Ok(())
}

fn do_chat(server: &str, show_sql: bool) -> anyhow::Result<()> {
    let client = client(180)?;
    let mut session: Option<String> = None;
    let stdin = io::stdin();

    println!("Ask a question about the data. Empty line or 'exit' to quit.");
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() || question == "exit" || question == "quit" {
            break;
        }

        let raw = match post_ask(&client, server, question, session.as_deref()) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("epsilon-cli: {}", e);
                continue;
            }
        };
        let resp: AskResponse = serde_json::from_value(raw)?;
        session = Some(resp.session_id.clone());

        println!("{}", resp.text());
        if show_sql {
            for sql in resp.executed_sql() {
                println!("  SQL: {}", sql);
            }
        }
        let mut notes = Vec::new();
        if resp.used_history {
            notes.push("used earlier answers".to_string());
        }
        if let Some(ms) = resp.took_ms {
            notes.push(format!("{} ms", ms));
        }
        if !notes.is_empty() {
            println!("  ({})", notes.join(", "));
        }
    }

    if let Some(id) = session {
        eprintln!("Session {} kept on the server.", id);
    }
    Ok(())
}

fn do_history(server: &str, session: &str) -> anyhow::Result<()> {
    let url = format!("{}/sessions/{}/history", server, session);
    let resp = client(10)?
        .get(&url)
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        anyhow::bail!("unknown session {}", session);
    }
    if !resp.status().is_success() {
        anyhow::bail!("server returned {}", resp.status());
    }

    let history: HistoryResponse = resp.json()?;
    println!("Session {} ({} exchanges)", history.session_id, history.count);
    for (i, exchange) in history.exchanges.iter().enumerate() {
        let marker = if exchange.success { "" } else { " [failed]" };
        println!(
            "\n#{} {}{}",
            i + 1,
            exchange.created_at.as_deref().unwrap_or(""),
            marker
        );
        println!("Q: {}", exchange.question);
        println!("A: {}", exchange.answer);
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Epsilon server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("SQLite:         {}", body["sqlite"].as_str().unwrap_or("?"));
            println!("Tables:         {}", body["tables"].as_i64().unwrap_or(0));
        }
        Ok(r) => {
            eprintln!("epsilon-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("epsilon-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Ask {
            question,
            session,
            json,
        } => do_ask(&server, &question, session.as_deref(), json),
        Commands::Chat { show_sql } => do_chat(&server, show_sql),
        Commands::History { session } => do_history(&server, &session),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("epsilon-cli: {}", e);
        std::process::exit(1);
    }
}
