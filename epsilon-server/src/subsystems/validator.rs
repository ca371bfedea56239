//! Query validator — checklist review of a candidate statement
//!
//! The review itself is a model call. Around it sit two deterministic steps:
//! a lexical pre-scan that points the model at the checklist items the
//! statement could plausibly hit, and post-processing that pulls the SQL out
//! of the reply and returns the input untouched when the model only
//! reformatted it.

use std::sync::{Arc, LazyLock};

use epsilon_core::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, ModelTurn};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistItem {
    NotInWithNulls,
    UnionInsteadOfUnionAll,
    BetweenForExclusiveRange,
    PredicateTypeMismatch,
    IdentifierQuoting,
    FunctionArity,
    Casting,
    JoinColumns,
}

impl ChecklistItem {
    pub const ALL: [ChecklistItem; 8] = [
        ChecklistItem::NotInWithNulls,
        ChecklistItem::UnionInsteadOfUnionAll,
        ChecklistItem::BetweenForExclusiveRange,
        ChecklistItem::PredicateTypeMismatch,
        ChecklistItem::IdentifierQuoting,
        ChecklistItem::FunctionArity,
        ChecklistItem::Casting,
        ChecklistItem::JoinColumns,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            ChecklistItem::NotInWithNulls => "Using NOT IN with NULL values",
            ChecklistItem::UnionInsteadOfUnionAll => {
                "Using UNION when UNION ALL should have been used"
            }
            ChecklistItem::BetweenForExclusiveRange => "Using BETWEEN for exclusive ranges",
            ChecklistItem::PredicateTypeMismatch => "Data type mismatch in predicates",
            ChecklistItem::IdentifierQuoting => "Properly quoting identifiers",
            ChecklistItem::FunctionArity => {
                "Using the correct number of arguments for functions"
            }
            ChecklistItem::Casting => "Casting to the correct data type",
            ChecklistItem::JoinColumns => "Using the proper columns for joins",
        }
    }
}

static NOT_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnot\s+in\s*\(").expect("not in pattern"));
static UNION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bunion\b(\s+all\b)?").expect("union pattern"));
static BETWEEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbetween\b").expect("between pattern"));
static QUOTED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(=|<>|!=|<|>)\s*'-?\d+(\.\d+)?'").expect("quoted number pattern")
});
static SPACED_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(select|by|where|and|or)\s+\p{L}+\s+\p{L}+\s*(=|<|>|,|\bfrom\b)")
        .expect("spaced identifier pattern")
});
static CAST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcast\s*\(").expect("cast pattern"));
static JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bjoin\b").expect("join pattern"));

/// A line that opens a statement: `SELECT`, or `WITH` followed by a CTE name
/// and `AS` / a column list. "With no changes..." is prose, not SQL.
static STATEMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(select\b|with\s*$|with\s+(recursive\s+)?["`\[]?[\p{L}\w]+["`\]]?\s*(\(|as\b))"#,
    )
    .expect("statement start pattern")
});

/// Checklist items the statement lexically touches. These are hints for
/// the reviewer, not findings.
pub fn prescan(sql: &str) -> Vec<ChecklistItem> {
    let mut hits = Vec::new();
    if NOT_IN.is_match(sql) {
        hits.push(ChecklistItem::NotInWithNulls);
    }
    if UNION
        .captures_iter(sql)
        .any(|c| c.get(1).is_none())
    {
        hits.push(ChecklistItem::UnionInsteadOfUnionAll);
    }
    if BETWEEN.is_match(sql) {
        hits.push(ChecklistItem::BetweenForExclusiveRange);
    }
    if QUOTED_NUMBER.is_match(sql) {
        hits.push(ChecklistItem::PredicateTypeMismatch);
    }
    if SPACED_IDENTIFIER.is_match(sql) {
        hits.push(ChecklistItem::IdentifierQuoting);
    }
    if CAST.is_match(sql) {
        hits.push(ChecklistItem::Casting);
    }
    if JOIN.is_match(sql) {
        hits.push(ChecklistItem::JoinColumns);
    }
    hits
}

fn review_instructions(hints: &[ChecklistItem]) -> String {
    let checklist: Vec<String> = ChecklistItem::ALL
        .iter()
        .map(|item| format!("- {}", item.description()))
        .collect();

    let mut prompt = format!(
        "You are a SQL expert with a strong attention to detail.\n\
         Double check the SQLite query for common mistakes, including:\n\
         {}\n\n\
         If there are any mistakes, rewrite the query. If there are no mistakes, \
         just reproduce the original query.\n\
         Output only the final SQL query, without explanation.",
        checklist.join("\n")
    );

    if !hints.is_empty() {
        let focus: Vec<&str> = hints.iter().map(|h| h.description()).collect();
        prompt.push_str(&format!(
            "\n\nThis query contains constructs related to: {}.",
            focus.join("; ")
        ));
    }
    prompt
}

#[derive(Clone)]
pub struct QueryValidator {
    model: Arc<dyn ChatModel>,
}

impl QueryValidator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Review `sql` and return the corrected statement, or `sql` itself when
    /// nothing needed fixing.
    pub async fn check(&self, sql: &str) -> Result<String, LlmError> {
        let hints = prescan(sql);
        let request = ChatRequest::new(vec![
            ChatMessage::system(review_instructions(&hints)),
            ChatMessage::user(sql),
        ]);

        let reply = match self.model.complete(&request).await? {
            ModelTurn::Answer(text) => text,
            // The review request carries no tools; treat stray calls as "no change".
            ModelTurn::ToolCalls(_) => {
                tracing::warn!("Validator model requested a tool call; keeping original query");
                return Ok(sql.to_string());
            }
        };

        let candidate = match extract_sql(&reply) {
            Some(candidate) => candidate,
            None => {
                tracing::debug!(reply = %reply, "Validator reply held no SQL; keeping original query");
                return Ok(sql.to_string());
            }
        };
        if same_statement(&candidate, sql) {
            tracing::debug!(hints = hints.len(), "Validator kept query unchanged");
            return Ok(sql.to_string());
        }

        tracing::info!(original = %sql, corrected = %candidate, "Validator rewrote query");
        Ok(candidate)
    }
}

/// Pull the statement out of a reply that may wrap it in a code fence or
/// lead with prose. `None` when no line of the reply opens a statement.
pub fn extract_sql(reply: &str) -> Option<String> {
    let mut text = reply.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let tag = after[..body_start].trim();
        let body = if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            &after[body_start..]
        } else {
            after
        };
        let end = body.find("```").unwrap_or(body.len());
        text = body[..end].trim();
    }

    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| STATEMENT_START.is_match(l))?;
    let sql = lines[first..].join("\n").trim().to_string();
    (!sql.is_empty()).then_some(sql)
}

/// Equal up to whitespace, keyword case and a trailing semicolon. Quoted
/// text is compared exactly.
pub fn same_statement(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in sql.trim().trim_end_matches(';').trim_end().chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                if c == '\'' || c == '"' || c == '`' {
                    quote = Some(c);
                    out.push(c);
                } else {
                    out.extend(c.to_uppercase());
                }
            }
        }
    }
    out
}
