//! Model selection and parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProviderKind;
use crate::error::StrandError;

/// Default model for agents that do not name one.
pub const DEFAULT_MODEL: &str = "google:gemini-2.0-flash";

/// Which provider and model an agent talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSelector {
    pub provider: ProviderKind,
    pub model_id: String,
}

impl ModelSelector {
    pub fn new(provider: ProviderKind, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    /// Parse "provider:model_id", or a bare model id whose provider can be
    /// inferred from its prefix.
    ///
    /// Examples: "openai:gpt-4o", "gemini:gemini-2.0-flash", "gpt-4o-mini",
    /// "models/gemini-1.5-pro".
    pub fn parse(s: &str) -> Result<Self, StrandError> {
        let s = s.trim();
        if let Some((provider, model_id)) = s.split_once(':') {
            let provider = ProviderKind::from_str(provider).map_err(|_| {
                StrandError::InvalidConfiguration(format!(
                    "Invalid model selector '{s}': unknown provider '{provider}'"
                ))
            })?;
            if model_id.is_empty() {
                return Err(StrandError::InvalidConfiguration(format!(
                    "Invalid model selector '{s}': empty model id"
                )));
            }
            return Ok(Self::new(provider, model_id));
        }

        infer_provider(s)
            .map(|provider| Self::new(provider, s))
            .ok_or_else(|| {
                StrandError::InvalidConfiguration(format!(
                    "Invalid model selector '{s}': expected 'provider:model_id'"
                ))
            })
    }
}

fn infer_provider(model_id: &str) -> Option<ProviderKind> {
    let bare = model_id.strip_prefix("models/").unwrap_or(model_id);
    if bare.starts_with("gemini-") {
        Some(ProviderKind::Google)
    } else if ["gpt-", "o1", "o3", "o4"]
        .iter()
        .any(|prefix| model_id.starts_with(prefix))
    {
        Some(ProviderKind::OpenAi)
    } else {
        None
    }
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(ProviderKind::Google, "gemini-2.0-flash")
    }
}

impl FromStr for ModelSelector {
    type Err = StrandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}
