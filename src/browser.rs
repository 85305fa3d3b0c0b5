//! Chrome over the DevTools protocol, the production [`PageDriver`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::handler::Handler;
use chromiumoxide::js::EvaluationResult;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::driver::{ElementState, PageDriver};
use crate::session::CookieRecord;

const LOOKUP_INTERVAL: Duration = Duration::from_millis(100);
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BrowserClient {
    browser: Browser,
    page: Page,
    _handler_task: tokio::task::JoinHandle<()>,
    /// attached to a Chrome we did not start; closing leaves it running
    attached: bool,
}

impl BrowserClient {
    /// Attach to the configured DevTools endpoint if one answers, else launch Chrome.
    pub async fn launch(config: &Config) -> Result<Self> {
        if let Some(debug_url) = &config.chrome_debug_url {
            if let Some(ws_url) = try_find_existing_chrome(debug_url).await {
                info!(url = %ws_url, "attaching to running Chrome");
                match Browser::connect(&ws_url).await {
                    Ok((browser, handler)) => return Self::start(browser, handler, true).await,
                    Err(e) => warn!("could not attach to {ws_url}: {e}"),
                }
            } else {
                warn!(url = %debug_url, "no Chrome answering, launching one");
            }
        }

        let (browser, handler) = launch_chrome_with_profile(config).await?;
        Self::start(browser, handler, false).await
    }

    async fn start(browser: Browser, handler: Handler, attached: bool) -> Result<Self> {
        let handler_task = tokio::spawn(async move {
            handler_loop(handler).await;
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open a page")?;
        page.execute(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(stealth_script())
                .build()
                .map_err(|e| anyhow!("stealth script params: {e}"))?,
        )
        .await
        .context("failed to install stealth script")?;

        Ok(Self {
            browser,
            page,
            _handler_task: handler_task,
            attached,
        })
    }

    /// Close our page, and the whole browser when we launched it.
    pub async fn close(mut self) -> Result<()> {
        if self.attached {
            self.page.close().await.context("failed to close page")?;
            return Ok(());
        }
        self.browser.close().await.context("failed to close browser")?;
        if let Err(e) = self.browser.wait().await {
            debug!("browser process wait failed: {e}");
        }
        Ok(())
    }

    /// Evaluate `js`; a JS `null` or `undefined` result is `None`.
    async fn eval_opt<T: DeserializeOwned>(&self, js: String) -> Result<Option<T>> {
        let result = tokio::time::timeout(EVAL_TIMEOUT, self.page.evaluate_expression(js))
            .await
            .map_err(|_| anyhow!("script evaluation timed out"))?
            .context("script evaluation failed")?;
        decode_nullable(&result)
    }

    async fn eval<T: DeserializeOwned>(&self, js: String) -> Result<T> {
        self.eval_opt(js)
            .await?
            .ok_or_else(|| anyhow!("script returned null"))
    }

    async fn key_event(&self, kind: DispatchKeyEventType, key: &str, modifiers: i64) -> Result<()> {
        let key_down = matches!(kind, DispatchKeyEventType::KeyDown);
        let mut params = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key)
            .modifiers(modifiers);
        if let Some((code, vk, text)) = key_definition(key) {
            params = params
                .code(code)
                .windows_virtual_key_code(vk)
                .native_virtual_key_code(vk);
            if key_down {
                if let Some(text) = text {
                    params = params.text(text);
                }
            }
        }
        self.page
            .execute(params.build().map_err(|e| anyhow!("key event params: {e}"))?)
            .await
            .with_context(|| format!("failed to dispatch {key}"))?;
        Ok(())
    }
}

// into_value() rejects a null RemoteObject, so map it to None first
fn decode_nullable<T: DeserializeOwned>(result: &EvaluationResult) -> Result<Option<T>> {
    match result.value() {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .context("unexpected script result"),
    }
}

// JS string literal for `s`
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

// (code, virtual key code, text on key down) for keys that need more than a name
fn key_definition(key: &str) -> Option<(&'static str, i64, Option<&'static str>)> {
    match key {
        "Enter" => Some(("Enter", 13, Some("\r"))),
        "Tab" => Some(("Tab", 9, None)),
        "Escape" => Some(("Escape", 27, None)),
        "Backspace" => Some(("Backspace", 8, None)),
        "a" | "A" => Some(("KeyA", 65, None)),
        _ => None,
    }
}

// "Control+A" -> (2, "A"), CDP modifier bit flags
fn parse_key_combo(combo: &str) -> (i64, &str) {
    let mut parts: Vec<&str> = combo.split('+').collect();
    let key = parts.pop().unwrap_or(combo);
    let mut flags = 0;
    for m in parts {
        match m.to_lowercase().as_str() {
            "control" | "ctrl" => flags |= 2,
            "alt" | "option" => flags |= 1,
            "shift" => flags |= 8,
            "meta" | "cmd" | "command" => flags |= 4,
            _ => {}
        }
    }
    (flags, key)
}

#[async_trait]
impl PageDriver for BrowserClient {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        debug!(url, "navigating");
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation to {url} timed out after {timeout:?}"))?
            .with_context(|| format!("navigation to {url} failed"))?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementState>> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return null;
                const r = el.getBoundingClientRect();
                const s = window.getComputedStyle(el);
                return {{
                    enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
                    visible: r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'
                }};
            }})()"#,
            sel = js_str(selector)
        );

        let start = tokio::time::Instant::now();
        loop {
            match self.eval_opt::<ElementState>(js.clone()).await {
                Ok(Some(state)) => return Ok(Some(state)),
                Ok(None) => {}
                Err(e) => debug!(selector, "selector lookup error: {e:#}"),
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            tokio::time::sleep(LOOKUP_INTERVAL).await;
        }
    }

    async fn query_texts(&self, selector: &str) -> Result<Vec<String>> {
        let js = format!(
            "Array.from(document.querySelectorAll({})).map(e => (e.innerText || e.textContent || '').trim())",
            js_str(selector)
        );
        self.eval(js).await
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("no element matches {selector}"))?;
        let element = elements
            .get(index)
            .ok_or_else(|| anyhow!("{selector} has no match at index {index}"))?;
        element
            .click()
            .await
            .with_context(|| format!("failed to click {selector}"))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, index: usize, text: &str) -> Result<()> {
        self.click(selector, index).await?;

        // select whatever is already there so the insert replaces it
        self.key_event(DispatchKeyEventType::KeyDown, "a", 2).await?;
        self.key_event(DispatchKeyEventType::KeyUp, "a", 2).await?;
        self.key_event(DispatchKeyEventType::KeyDown, "Backspace", 0).await?;
        self.key_event(DispatchKeyEventType::KeyUp, "Backspace", 0).await?;

        self.page
            .execute(InsertTextParams::new(text))
            .await
            .context("failed to type prompt")?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (modifiers, key_name) = parse_key_combo(key);
        self.key_event(DispatchKeyEventType::KeyDown, key_name, modifiers).await?;
        self.key_event(DispatchKeyEventType::KeyUp, key_name, modifiers).await
    }

    async fn body_text(&self) -> Result<String> {
        self.eval("document.body ? document.body.innerText : ''".to_string())
            .await
    }

    async fn local_storage_get(&self, key: &str) -> Result<Option<String>> {
        self.eval_opt(format!("window.localStorage.getItem({})", js_str(key)))
            .await
    }

    async fn local_storage_set(&self, key: &str, value: &str) -> Result<()> {
        let js = format!(
            "(() => {{ window.localStorage.setItem({}, {}); return true; }})()",
            js_str(key),
            js_str(value)
        );
        self.eval::<bool>(js).await.map(|_| ())
    }

    async fn reload(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.reload())
            .await
            .map_err(|_| anyhow!("reload timed out after {timeout:?}"))?
            .context("reload failed")?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .save_screenshot(params, path)
            .await
            .with_context(|| format!("failed to save screenshot to {}", path.display()))?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        let cookies = self.page.get_cookies().await.context("failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| CookieRecord {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: (!c.session).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| s.as_ref().to_string()),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for c in cookies {
            let mut builder = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .domain(c.domain.clone())
                .path(c.path.clone())
                .http_only(c.http_only)
                .secure(c.secure);
            if let Some(expires) = c.expires.filter(|e| *e > 0.0) {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            if let Some(same_site) = c
                .same_site
                .as_deref()
                .and_then(|s| s.parse::<CookieSameSite>().ok())
            {
                builder = builder.same_site(same_site);
            }
            params.push(builder.build().map_err(|e| anyhow!("cookie {}: {e}", c.name))?);
        }
        self.page
            .set_cookies(params)
            .await
            .context("failed to set cookies")?;
        Ok(())
    }
}

async fn handler_loop(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if event.is_err() {
            break;
        }
    }
}

fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("prompt-pilot")
        .join("chrome-profile")
}

/// Resolve a DevTools HTTP endpoint to its websocket URL, if something answers there.
async fn try_find_existing_chrome(debug_url: &str) -> Option<String> {
    if debug_url.starts_with("ws://") || debug_url.starts_with("wss://") {
        return Some(debug_url.to_string());
    }

    let version_url = format!("{}/json/version", debug_url.trim_end_matches('/'));
    let response = reqwest::get(&version_url).await.ok()?;
    let body: serde_json::Value = response.json().await.ok()?;
    body.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// chrome needs a non-default user data dir for remote debugging
async fn launch_chrome_with_profile(config: &Config) -> Result<(Browser, Handler)> {
    let user_data_dir = config.profile_dir.clone().unwrap_or_else(default_profile_dir);
    debug!(dir = %user_data_dir.display(), "chrome profile");

    let mut builder = BrowserConfig::builder()
        .disable_default_args()
        .user_data_dir(&user_data_dir)
        .viewport(None)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-renderer-backgrounding")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--lang=en-US,en");
    if !config.headless || config.debug {
        builder = builder.with_head();
    }
    let browser_config = builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

    info!(headless = config.headless && !config.debug, "launching Chrome");
    Browser::launch(browser_config)
        .await
        .context("failed to launch chrome")
}

fn stealth_script() -> &'static str {
    r#"
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
        Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const p = [
                    { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
                    { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' }
                ];
                p.length = 2;
                return p;
            }
        });
        if (!window.chrome) window.chrome = {};
        if (!window.chrome.runtime) window.chrome.runtime = {};
        Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
    "#
}

#[cfg(test)]
mod tests {
    use super::*;
    use chromiumoxide::cdp::js_protocol::runtime::RemoteObject;

    #[test]
    fn test_parse_key_combo() {
        assert_eq!(parse_key_combo("Enter"), (0, "Enter"));
        assert_eq!(parse_key_combo("Control+A"), (2, "A"));
        assert_eq!(parse_key_combo("ctrl+shift+Tab"), (10, "Tab"));
    }

    #[test]
    fn test_js_str_escapes_quotes() {
        assert_eq!(
            js_str("textarea[aria-label='x \"y\"']"),
            r#""textarea[aria-label='x \"y\"']""#
        );
    }

    fn evaluation(remote_object: &str) -> EvaluationResult {
        EvaluationResult::new(serde_json::from_str::<RemoteObject>(remote_object).unwrap())
    }

    #[test]
    fn test_null_result_decodes_to_none() {
        let null = evaluation(r#"{"type":"object","subtype":"null","value":null}"#);
        assert_eq!(decode_nullable::<String>(&null).unwrap(), None);
        assert_eq!(decode_nullable::<ElementState>(&null).unwrap(), None);

        let undefined = evaluation(r#"{"type":"undefined"}"#);
        assert_eq!(decode_nullable::<String>(&undefined).unwrap(), None);
    }

    #[test]
    fn test_present_values_decode() {
        let blob = evaluation(r#"{"type":"string","value":"{\"promptModel\":\"x\"}"}"#);
        assert_eq!(
            decode_nullable::<String>(&blob).unwrap().as_deref(),
            Some(r#"{"promptModel":"x"}"#)
        );

        let state = evaluation(
            r#"{"type":"object","value":{"enabled":true,"visible":false}}"#,
        );
        assert_eq!(
            decode_nullable::<ElementState>(&state).unwrap(),
            Some(ElementState {
                enabled: true,
                visible: false
            })
        );

        let wrong = evaluation(r#"{"type":"number","value":3}"#);
        assert!(decode_nullable::<String>(&wrong).is_err());
    }

    #[tokio::test]
    async fn test_ws_debug_url_is_used_as_is() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(try_find_existing_chrome(url).await.as_deref(), Some(url));
    }
}
