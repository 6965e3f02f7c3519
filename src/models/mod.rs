//! Model selection.

pub mod selector;

pub use selector::ModelSelector;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Canonical provider identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    #[strum(to_string = "openai")]
    OpenAi,
    #[strum(to_string = "google", serialize = "gemini")]
    Google,
}
