//! Scripted in-memory page used by unit and integration tests.
//!
//! The page answers selector lookups and text queries from fixed tables,
//! replays a queue of body texts for completion polling, keeps a fake
//! `localStorage`, and records every interaction so tests can assert on the
//! exact sequence of driver calls.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::driver::{ElementState, PageDriver};
use crate::session::CookieRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Navigate(String),
    Click(String, usize),
    Fill(String, usize, String),
    PressKey(String),
    StorageGet(String),
    StorageSet(String, String),
    Reload,
    Screenshot(String),
    SetCookies(usize),
}

#[derive(Default)]
struct PageState {
    url: String,
    redirect_to: Option<String>,
    elements: HashMap<String, ElementState>,
    texts: HashMap<String, Vec<String>>,
    bodies: VecDeque<String>,
    storage: HashMap<String, String>,
    storage_failures: usize,
    storage_writes_ignored: bool,
    cookies: Vec<CookieRecord>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct ScriptedPage {
    state: Mutex<PageState>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `selector` match a usable element.
    #[must_use]
    pub fn with_element(self, selector: &str) -> Self {
        self.with_element_state(selector, ElementState::USABLE)
    }

    #[must_use]
    pub fn with_element_state(self, selector: &str, state: ElementState) -> Self {
        self.state().elements.insert(selector.to_string(), state);
        self
    }

    /// Texts returned for `selector`; also makes it match a usable element.
    #[must_use]
    pub fn with_texts(self, selector: &str, texts: &[&str]) -> Self {
        {
            let mut state = self.state();
            state
                .texts
                .insert(selector.to_string(), texts.iter().map(|t| (*t).to_string()).collect());
            state
                .elements
                .entry(selector.to_string())
                .or_insert(ElementState::USABLE);
        }
        self
    }

    /// Body texts served in order; the last one repeats forever.
    #[must_use]
    pub fn with_bodies(self, bodies: &[&str]) -> Self {
        self.state().bodies = bodies.iter().map(|b| (*b).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_body(self, body: &str) -> Self {
        self.with_bodies(&[body])
    }

    #[must_use]
    pub fn with_storage(self, key: &str, value: &str) -> Self {
        self.state().storage.insert(key.to_string(), value.to_string());
        self
    }

    /// The next `count` storage operations fail as if the script threw.
    #[must_use]
    pub fn with_storage_failures(self, count: usize) -> Self {
        self.state().storage_failures = count;
        self
    }

    /// Storage writes succeed but leave the stored value untouched.
    #[must_use]
    pub fn with_ignored_storage_writes(self) -> Self {
        self.state().storage_writes_ignored = true;
        self
    }

    /// Every navigation lands on `url` instead of the requested one.
    #[must_use]
    pub fn with_redirect(self, url: &str) -> Self {
        self.state().redirect_to = Some(url.to_string());
        self
    }

    #[must_use]
    pub fn with_cookies(self, cookies: Vec<CookieRecord>) -> Self {
        self.state().cookies = cookies;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn storage_value(&self, key: &str) -> Option<String> {
        self.state().storage.get(key).cloned()
    }

    pub fn clicked(&self, selector: &str) -> bool {
        self.state()
            .calls
            .iter()
            .any(|c| matches!(c, Call::Click(s, _) if s == selector))
    }

    fn take_storage_failure(state: &mut PageState) -> Result<()> {
        if state.storage_failures > 0 {
            state.storage_failures -= 1;
            return Err(anyhow!("JavaScript exception: localStorage is not available"));
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Navigate(url.to_string()));
        state.url = state.redirect_to.clone().unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<Option<ElementState>> {
        Ok(self.state().elements.get(selector).copied())
    }

    async fn query_texts(&self, selector: &str) -> Result<Vec<String>> {
        Ok(self.state().texts.get(selector).cloned().unwrap_or_default())
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let mut state = self.state();
        if !state.elements.contains_key(selector) {
            return Err(anyhow!("no element matches {selector}"));
        }
        state.calls.push(Call::Click(selector.to_string(), index));
        Ok(())
    }

    async fn fill(&self, selector: &str, index: usize, text: &str) -> Result<()> {
        let mut state = self.state();
        if !state.elements.contains_key(selector) {
            return Err(anyhow!("no element matches {selector}"));
        }
        state
            .calls
            .push(Call::Fill(selector.to_string(), index, text.to_string()));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.state().calls.push(Call::PressKey(key.to_string()));
        Ok(())
    }

    async fn body_text(&self) -> Result<String> {
        let mut state = self.state();
        if state.bodies.len() > 1 {
            return Ok(state.bodies.pop_front().unwrap_or_default());
        }
        Ok(state.bodies.front().cloned().unwrap_or_default())
    }

    async fn local_storage_get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.calls.push(Call::StorageGet(key.to_string()));
        Self::take_storage_failure(&mut state)?;
        Ok(state.storage.get(key).cloned())
    }

    async fn local_storage_set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .push(Call::StorageSet(key.to_string(), value.to_string()));
        Self::take_storage_failure(&mut state)?;
        if !state.storage_writes_ignored {
            state.storage.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn reload(&self, _timeout: Duration) -> Result<()> {
        self.state().calls.push(Call::Reload);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state().url.clone())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.state()
            .calls
            .push(Call::Screenshot(path.display().to_string()));
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        Ok(self.state().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::SetCookies(cookies.len()));
        state.cookies = cookies.to_vec();
        Ok(())
    }
}
