//! The browser capability surface the query engine is written against.
//!
//! [`crate::browser::BrowserClient`] implements it over CDP; tests use
//! [`crate::testing::ScriptedPage`].

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::session::CookieRecord;

/// What a selector lookup found for the first matching element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ElementState {
    pub enabled: bool,
    pub visible: bool,
}

impl ElementState {
    pub const USABLE: Self = Self {
        enabled: true,
        visible: true,
    };
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load event, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait up to `timeout` for `selector` to match; `None` if it never does.
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementState>>;

    /// Trimmed text of every element matching `selector`, in document order.
    async fn query_texts(&self, selector: &str) -> Result<Vec<String>>;

    async fn click(&self, selector: &str, index: usize) -> Result<()>;

    /// Focus the element, select its current content and replace it with `text`.
    async fn fill(&self, selector: &str, index: usize, text: &str) -> Result<()>;

    /// Key name with optional modifiers, e.g. `Enter` or `Control+A`.
    async fn press_key(&self, key: &str) -> Result<()>;

    async fn body_text(&self) -> Result<String>;

    async fn local_storage_get(&self, key: &str) -> Result<Option<String>>;

    async fn local_storage_set(&self, key: &str, value: &str) -> Result<()>;

    async fn reload(&self, timeout: Duration) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<CookieRecord>>;

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<()>;
}
