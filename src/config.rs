//! Runtime configuration.
//!
//! Values start from defaults, are overridden by `PROMPT_PILOT_*` environment
//! variables (a `.env` file is loaded by the binary), and finally by CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{PilotError, Result};
use crate::session::FileSessionStore;

pub const DEFAULT_START_URL: &str = "https://aistudio.google.com/prompts/new_chat";

/// Every wait the query engine performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// busy-marker poll period
    pub poll_interval: Duration,
    /// pause after the busy marker disappears
    pub settle_delay: Duration,
    /// ceiling for response generation
    pub response_timeout: Duration,
    /// per-selector wait inside a cascade
    pub element_timeout: Duration,
    /// per-selector wait when looking for optional overlays
    pub overlay_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(3),
            response_timeout: Duration::from_secs(120),
            element_timeout: Duration::from_secs(3),
            overlay_timeout: Duration::from_secs(2),
            navigation_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub start_url: String,
    pub session_file: PathBuf,
    pub headless: bool,
    /// DevTools endpoint of an already running Chrome to attach to
    pub chrome_debug_url: Option<String>,
    pub profile_dir: Option<PathBuf>,
    pub screenshot_dir: PathBuf,
    /// leave the page where it is after a failed query
    pub keep_alive: bool,
    /// visible browser, screenshots on failure, operator pause on login
    pub debug: bool,
    pub timings: Timings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_url: DEFAULT_START_URL.to_string(),
            session_file: FileSessionStore::default_path(),
            headless: true,
            chrome_debug_url: None,
            profile_dir: None,
            screenshot_dir: std::env::temp_dir().join("prompt-pilot"),
            keep_alive: false,
            debug: false,
            timings: Timings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();
        config
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("PROMPT_PILOT_URL") {
            self.start_url = url;
        }
        if let Ok(path) = std::env::var("PROMPT_PILOT_SESSION_FILE") {
            self.session_file = PathBuf::from(path);
        }
        if let Some(secs) = env_u64("PROMPT_PILOT_RESPONSE_TIMEOUT_SECS") {
            self.timings.response_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("PROMPT_PILOT_ELEMENT_TIMEOUT_MS") {
            self.timings.element_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("PROMPT_PILOT_NAV_TIMEOUT_SECS") {
            self.timings.navigation_timeout = Duration::from_secs(secs);
        }
        if let Some(headless) = env_bool("PROMPT_PILOT_HEADLESS") {
            self.headless = headless;
        }
        if let Ok(url) = std::env::var("PROMPT_PILOT_CHROME_DEBUG_URL") {
            if !url.trim().is_empty() {
                self.chrome_debug_url = Some(url);
            }
        }
        if let Ok(dir) = std::env::var("PROMPT_PILOT_PROFILE_DIR") {
            self.profile_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("PROMPT_PILOT_SCREENSHOT_DIR") {
            self.screenshot_dir = PathBuf::from(dir);
        }
        if let Some(keep_alive) = env_bool("PROMPT_PILOT_KEEP_ALIVE") {
            self.keep_alive = keep_alive;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.start_url.starts_with("https://") || self.start_url.starts_with("http://")) {
            return Err(PilotError::Config(format!(
                "start URL must be http(s): {}",
                self.start_url
            )));
        }
        let t = &self.timings;
        for (name, value) in [
            ("poll interval", t.poll_interval),
            ("response timeout", t.response_timeout),
            ("element timeout", t.element_timeout),
            ("navigation timeout", t.navigation_timeout),
        ] {
            if value.is_zero() {
                return Err(PilotError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {name}={raw}: not a number");
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("ignoring {name}={raw}: not a boolean");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timings.poll_interval, Duration::from_secs(2));
        assert_eq!(config.timings.settle_delay, Duration::from_secs(3));
        assert_eq!(config.timings.response_timeout, Duration::from_secs(120));
        assert!(config.headless);
    }

    #[test]
    fn test_rejects_non_http_url() {
        let config = Config {
            start_url: "file:///tmp/chat.html".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(PilotError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = Config::default();
        config.timings.response_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("response timeout"));
    }
}
