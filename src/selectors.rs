//! Selector cascades, one per element role. Order is priority: specific and
//! semantic selectors first, generic fallbacks last.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementRole {
    Input,
    SendButton,
    CloseButton,
    ModelDropdown,
    ModelOption,
}

impl ElementRole {
    pub fn cascade(self) -> &'static [&'static str] {
        match self {
            Self::Input => INPUT_SELECTORS,
            Self::SendButton => SEND_BUTTON_SELECTORS,
            Self::CloseButton => CLOSE_BUTTON_SELECTORS,
            Self::ModelDropdown => MODEL_DROPDOWN_SELECTORS,
            Self::ModelOption => MODEL_OPTION_SELECTORS,
        }
    }

    /// Click targets must also be visible to count as a match.
    pub fn is_click_target(self) -> bool {
        !matches!(self, Self::Input)
    }

    /// Missing elements of a critical role abort the query.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Input)
    }
}

impl fmt::Display for ElementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "prompt input",
            Self::SendButton => "send button",
            Self::CloseButton => "close overlay",
            Self::ModelDropdown => "model selector",
            Self::ModelOption => "model option",
        })
    }
}

const INPUT_SELECTORS: &[&str] = &[
    "textarea[aria-label='Type something or tab to choose an example prompt']",
    "textarea[aria-label*='prompt' i]",
    "ms-prompt-input-wrapper textarea",
    "ms-autosize-textarea textarea",
    "textarea[placeholder*='Type' i]",
    "div[contenteditable='true']",
    "textarea",
];

const SEND_BUTTON_SELECTORS: &[&str] = &[
    "button[aria-label='Run']",
    "run-button button",
    "button.run-button",
    "button[aria-label*='Send' i]",
    "button[type='submit']",
];

const CLOSE_BUTTON_SELECTORS: &[&str] = &[
    "button[aria-label='Close']",
    "button[aria-label*='close' i]",
    "button[aria-label*='dismiss' i]",
    "mat-dialog-container button[mat-dialog-close]",
    ".cdk-overlay-container button.close-button",
];

const MODEL_DROPDOWN_SELECTORS: &[&str] = &[
    "ms-model-selector mat-select",
    "ms-model-selector button",
    "mat-select[aria-label*='model' i]",
    "[data-test-id='model-selector']",
    "button[aria-label*='model' i]",
];

const MODEL_OPTION_SELECTORS: &[&str] = &[
    "mat-option",
    ".mat-mdc-option",
    "ms-model-option",
    "[role='option']",
];

/// Response containers, most specific first. The first entry holds the answer
/// split across several chunks that must be joined in document order.
pub const RESPONSE_SELECTORS: &[ResponseSelector] = &[
    ResponseSelector {
        selector: "ms-chat-turn[data-turn-role='Model'] ms-text-chunk",
        primary_chunk: true,
    },
    ResponseSelector {
        selector: ".model-response-text",
        primary_chunk: false,
    },
    ResponseSelector {
        selector: "ms-chat-turn .turn-content",
        primary_chunk: false,
    },
    ResponseSelector {
        selector: "[data-turn-role='Model']",
        primary_chunk: false,
    },
    ResponseSelector {
        selector: ".response-container",
        primary_chunk: false,
    },
];

#[derive(Debug, Clone, Copy)]
pub struct ResponseSelector {
    pub selector: &'static str,
    pub primary_chunk: bool,
}

/// Text the page shows while a response is being generated.
pub const BUSY_MARKER: &str = "Running...";
