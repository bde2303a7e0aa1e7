//! Provider identifiers and the model → provider classifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// API vendors a model can be hosted on.
///
/// This is a closed set: every rate-limit bucket is keyed by one of these
/// variants, and models that match no known prefix land in [`Provider::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    DeepSeek,
    OpenRouter,
    Unknown,
}

impl Provider {
    /// Every provider, in a stable order.
    pub const ALL: [Provider; 6] = [
        Provider::Anthropic,
        Provider::OpenAi,
        Provider::Google,
        Provider::DeepSeek,
        Provider::OpenRouter,
        Provider::Unknown,
    ];

    /// Position in [`Provider::ALL`].
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::DeepSeek => "deepseek",
            Self::OpenRouter => "openrouter",
            Self::Unknown => "unknown",
        }
    }

    /// Pick the provider bucket for a model identifier.
    ///
    /// Namespaced ids (`vendor/model`) are how OpenRouter addresses models,
    /// so anything containing a slash is routed there.
    pub fn classify(model: &str) -> Provider {
        let model = model.trim().to_ascii_lowercase();

        if model.contains('/') {
            Self::OpenRouter
        } else if model.starts_with("claude") {
            Self::Anthropic
        } else if model.starts_with("gpt")
            || model.starts_with("chatgpt")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            Self::OpenAi
        } else if model.starts_with("gemini") || model.starts_with("gemma") {
            Self::Google
        } else if model.starts_with("deepseek") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}
