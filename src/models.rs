//! Model registry: the closed set of models the chat app can be pointed at.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PilotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelIdentifier {
    #[default]
    Pro,
    Flash,
}

#[derive(Debug)]
pub struct ModelDescriptor {
    pub id: ModelIdentifier,
    pub display_name: &'static str,
    pub description: &'static str,
    /// value the chat app keeps in its stored preference blob
    pub storage_key: &'static str,
    /// substring used when the option label does not carry the full display name
    pub match_token: &'static str,
    pub is_default: bool,
    pub aliases: &'static [&'static str],
}

static MODELS: [ModelDescriptor; 2] = [
    ModelDescriptor {
        id: ModelIdentifier::Pro,
        display_name: "Gemini 2.5 Pro",
        description: "Most capable model, slower, best for reasoning-heavy prompts",
        storage_key: "models/gemini-2.5-pro",
        match_token: "Pro",
        is_default: true,
        aliases: &[
            "pro",
            "gemini-pro",
            "gemini-2.5-pro",
            "2.5-pro",
            "models/gemini-2.5-pro",
        ],
    },
    ModelDescriptor {
        id: ModelIdentifier::Flash,
        display_name: "Gemini 2.5 Flash",
        description: "Fast model, lower latency, good for short prompts",
        storage_key: "models/gemini-2.5-flash",
        match_token: "Flash",
        is_default: false,
        aliases: &[
            "flash",
            "gemini-flash",
            "gemini-2.5-flash",
            "2.5-flash",
            "models/gemini-2.5-flash",
        ],
    },
];

pub fn describe(id: ModelIdentifier) -> &'static ModelDescriptor {
    match id {
        ModelIdentifier::Pro => &MODELS[0],
        ModelIdentifier::Flash => &MODELS[1],
    }
}

pub fn all() -> &'static [ModelDescriptor] {
    &MODELS
}

pub fn default_model() -> ModelIdentifier {
    MODELS
        .iter()
        .find(|m| m.is_default)
        .map_or(ModelIdentifier::Pro, |m| m.id)
}

/// Case-insensitive alias lookup. Never fails; callers decide what absence means.
pub fn parse_alias(text: &str) -> Option<ModelIdentifier> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    MODELS
        .iter()
        .find(|m| m.aliases.iter().any(|a| *a == needle))
        .map(|m| m.id)
}

pub fn parse_alias_or_fail(text: &str) -> Result<ModelIdentifier, PilotError> {
    parse_alias(text).ok_or_else(|| PilotError::Validation {
        given: text.to_string(),
        valid_aliases: all_aliases(),
    })
}

pub fn all_aliases() -> Vec<String> {
    MODELS
        .iter()
        .flat_map(|m| m.aliases.iter().map(|a| (*a).to_string()))
        .collect()
}

impl ModelIdentifier {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Flash => "flash",
        }
    }

    pub fn descriptor(self) -> &'static ModelDescriptor {
        describe(self)
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelIdentifier {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_alias_or_fail(s)
    }
}
