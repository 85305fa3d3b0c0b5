//! Error types for prompt-pilot.
//!
//! Only `Validation`, `ElementNotFound`, `Timeout` and `AuthenticationRequired`
//! are meant to cross the public boundary of a query. `StorageChannel` is
//! absorbed by the model selection fallback and `Browser` wraps driver-level
//! failures (navigation, CDP transport).

use std::time::Duration;

use thiserror::Error;

use crate::selectors::ElementRole;

#[derive(Error, Debug)]
pub enum PilotError {
    /// Unknown model alias. Raised before any browser interaction.
    #[error("invalid model '{given}': expected one of {}", .valid_aliases.join(", "))]
    Validation {
        given: String,
        valid_aliases: Vec<String>,
    },

    /// A critical element was not found after the whole cascade was tried.
    #[error("could not find the {role} element (tried: {})", .tried.join(" | "))]
    ElementNotFound {
        role: ElementRole,
        tried: Vec<String>,
    },

    /// The busy marker was still on the page when the response ceiling elapsed.
    #[error("response generation did not finish within {waited:?}")]
    Timeout { waited: Duration },

    /// The page-storage preference write failed or could not be verified.
    #[error("storage channel failed: {0}")]
    StorageChannel(String),

    /// The chat app redirected to a login flow.
    #[error("authentication required: redirected to {url}")]
    AuthenticationRequired { url: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("browser error: {0}")]
    Browser(#[from] anyhow::Error),
}

impl PilotError {
    /// Short name of the query stage the error belongs to, used in CLI output.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::ElementNotFound { .. } => "element lookup",
            Self::Timeout { .. } => "response wait",
            Self::StorageChannel(_) => "model selection",
            Self::AuthenticationRequired { .. } => "authentication",
            Self::Config(_) => "configuration",
            Self::Browser(_) => "browser",
        }
    }

    /// Hard failures after navigation reset the page unless keep-alive is set.
    pub fn resets_session(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound { .. } | Self::Timeout { .. } | Self::Browser(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PilotError>;
