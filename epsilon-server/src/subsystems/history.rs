//! Deciding when a question refers back to earlier answers, and rendering
//! those answers as context for the query loop.

use epsilon_core::models::Exchange;

/// Decides whether earlier exchanges should be offered as context.
pub trait HistoryPolicy: Send + Sync {
    fn should_use_history(&self, question: &str, has_history: bool) -> bool;
}

/// Fires when the question contains one of a fixed set of referring words.
/// Matching is a lowercase substring test, so "them" also fires on "themselves".
#[derive(Debug, Clone)]
pub struct KeywordHistoryPolicy {
    keywords: Vec<String>,
}

impl KeywordHistoryPolicy {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl Default for KeywordHistoryPolicy {
    fn default() -> Self {
        Self::new(epsilon_core::config::MemoryConfig::default().history_keywords)
    }
}

impl HistoryPolicy for KeywordHistoryPolicy {
    fn should_use_history(&self, question: &str, has_history: bool) -> bool {
        if !has_history {
            return false;
        }
        let question = question.to_lowercase();
        self.keywords.iter().any(|k| question.contains(k.as_str()))
    }
}

/// Context block for the loop's instructions, oldest exchange first.
/// Returns `None` when there is nothing to show.
pub fn context_block(history: &[Exchange]) -> Option<String> {
    if history.is_empty() {
        return None;
    }

    let mut block = String::from("Previous Q&A for context:\n");
    for exchange in history {
        block.push_str(&format!("Q: {}\nA: {}\n", exchange.question, exchange.answer));
    }
    block.push_str("Use this context only if relevant to the current query.");
    Some(block)
}
