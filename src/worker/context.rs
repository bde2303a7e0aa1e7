//! Conversational context accumulated within one run.

use serde::{Deserialize, Serialize};

/// Separator placed between consecutive texts in a rendered context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// A prompt and the response it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
}

/// Ordered prompt/response history for the current run.
///
/// Never shared between runs: every run builds its own.
#[derive(Debug, Clone, Default)]
pub struct ContextHistory {
    exchanges: Vec<Exchange>,
}

impl ContextHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, prompt: impl Into<String>, response: impl Into<String>) {
        self.exchanges.push(Exchange {
            prompt: prompt.into(),
            response: response.into(),
        });
    }

    /// Input for the next prompt: every prior prompt and response, in order,
    /// followed by the new prompt text.
    pub fn render(&self, next_prompt: &str) -> String {
        let capacity = self
            .exchanges
            .iter()
            .map(|e| e.prompt.len() + e.response.len() + 2 * CONTEXT_SEPARATOR.len())
            .sum::<usize>()
            + next_prompt.len();

        let mut out = String::with_capacity(capacity);
        for exchange in &self.exchanges {
            out.push_str(&exchange.prompt);
            out.push_str(CONTEXT_SEPARATOR);
            out.push_str(&exchange.response);
            out.push_str(CONTEXT_SEPARATOR);
        }
        out.push_str(next_prompt);
        out
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_renders_just_the_prompt() {
        assert_eq!(ContextHistory::new().render("Begin."), "Begin.");
    }

    #[test]
    fn render_concatenates_in_order() {
        let mut ctx = ContextHistory::new();
        ctx.push("P0", "R0");
        ctx.push("P1", "R1");

        assert_eq!(ctx.render("P2"), "P0\n\nR0\n\nP1\n\nR1\n\nP2");
        assert_eq!(ctx.len(), 2);
        assert!(!ctx.is_empty());
    }
}
