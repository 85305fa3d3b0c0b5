//! Query orchestration: one prompt in, one response out.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::driver::PageDriver;
use crate::error::{PilotError, Result};
use crate::extraction;
use crate::locator;
use crate::model_selection::{self, SelectionOutcome};
use crate::models::{self, ModelIdentifier};
use crate::session::{SelectionMethod, SessionStore};
use crate::submission::SubmissionEngine;

/// Whether `url` belongs to a sign-in flow rather than the chat app.
pub fn is_login_url(url: &str) -> bool {
    url.contains("accounts.google.com")
        || url.contains("ServiceLogin")
        || url.to_lowercase().contains("signin")
}

pub struct Pilot<D: PageDriver> {
    driver: D,
    store: Arc<dyn SessionStore>,
    config: Config,
}

impl<D: PageDriver> Pilot<D> {
    pub fn new(driver: D, store: Arc<dyn SessionStore>, config: Config) -> Self {
        Self {
            driver,
            store,
            config,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Send `prompt` to the chat app and return the formatted response.
    ///
    /// An unknown `model_alias` fails before the browser is touched. Without
    /// an alias the stored preference is used, then the registry default.
    pub async fn run_query(
        &self,
        prompt: &str,
        model_alias: Option<&str>,
        debug: bool,
    ) -> Result<String> {
        let requested = model_alias.map(models::parse_alias_or_fail).transpose()?;
        let (model, method) = match requested {
            Some(model) => (model, SelectionMethod::Cli),
            None => (
                self.store
                    .preferred_model()
                    .unwrap_or_else(models::default_model),
                SelectionMethod::Automated,
            ),
        };
        let debug = debug || self.config.debug;

        info!(%model, "starting query");
        match self.drive(prompt, model, method, debug).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(stage = e.stage(), "query failed: {e}");
                self.recover(&e, debug).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        prompt: &str,
        model: ModelIdentifier,
        method: SelectionMethod,
        debug: bool,
    ) -> Result<String> {
        let timings = &self.config.timings;

        self.restore_cookies().await;
        self.driver
            .navigate(&self.config.start_url, timings.navigation_timeout)
            .await?;
        self.ensure_authenticated(debug).await?;
        locator::dismiss_overlay(&self.driver, timings.overlay_timeout).await;

        let selection =
            model_selection::select_model(&self.driver, &*self.store, model, method, timings)
                .await;
        if selection == SelectionOutcome::Unchanged {
            debug!("continuing with the model the app already has selected");
        }

        SubmissionEngine::new(&self.driver, timings)
            .run(prompt)
            .await?;

        let candidate = extraction::extract(&self.driver).await;
        info!(strategy = ?candidate.strategy, chars = candidate.len, "response ready");

        self.persist_cookies().await;
        Ok(candidate.text)
    }

    async fn restore_cookies(&self) {
        let Some(record) = self.store.load() else {
            debug!("no stored session");
            return;
        };
        if record.cookies.is_empty() {
            return;
        }
        match self.driver.set_cookies(&record.cookies).await {
            Ok(()) => debug!(count = record.cookies.len(), "session cookies restored"),
            Err(e) => warn!("could not restore session cookies: {e:#}"),
        }
    }

    async fn persist_cookies(&self) {
        match self.driver.cookies().await {
            Ok(cookies) => self.store.save(cookies, None),
            Err(e) => warn!("could not read cookies to save the session: {e:#}"),
        }
    }

    /// Fail on a login redirect, or in interactive mode wait for the operator
    /// to sign in and check once more.
    pub async fn ensure_authenticated(&self, interactive: bool) -> Result<()> {
        let url = self.driver.current_url().await?;
        if !is_login_url(&url) {
            return Ok(());
        }
        if !interactive {
            return Err(PilotError::AuthenticationRequired { url });
        }

        wait_for_operator("Sign in in the browser window, then press Enter to continue").await;
        let url = self.driver.current_url().await?;
        if is_login_url(&url) {
            return Err(PilotError::AuthenticationRequired { url });
        }
        info!("signed in, resuming");
        Ok(())
    }

    /// Open the chat app, let the operator sign in and store the cookies.
    pub async fn login(&self) -> Result<usize> {
        self.restore_cookies().await;
        self.driver
            .navigate(&self.config.start_url, self.config.timings.navigation_timeout)
            .await?;
        let url = self.driver.current_url().await?;
        if is_login_url(&url) {
            self.ensure_authenticated(true).await?;
        } else {
            wait_for_operator("Already signed in? Press Enter to save the session").await;
        }

        let cookies = self.driver.cookies().await?;
        let count = cookies.len();
        self.store.save(cookies, None);
        info!(count, "session saved");
        Ok(count)
    }

    async fn recover(&self, err: &PilotError, debug: bool) {
        if debug {
            if let Some(path) = self.capture(err.stage()).await {
                info!(path = %path.display(), "failure screenshot saved");
            }
        }
        if !err.resets_session() {
            return;
        }
        if self.config.keep_alive {
            debug!("keep-alive set, leaving the page as is");
            return;
        }
        if let Err(e) = self
            .driver
            .navigate(&self.config.start_url, self.config.timings.navigation_timeout)
            .await
        {
            warn!("could not reset the page: {e:#}");
        }
    }

    async fn capture(&self, stage: &str) -> Option<PathBuf> {
        let dir = &self.config.screenshot_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), "cannot create screenshot directory: {e}");
            return None;
        }
        let path = dir.join(format!(
            "{}-{}.png",
            stage.replace(' ', "-"),
            uuid::Uuid::new_v4()
        ));
        match self.driver.screenshot(&path).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("screenshot failed: {e:#}");
                None
            }
        }
    }
}

async fn wait_for_operator(message: &str) {
    eprintln!("{message}");
    let mut line = String::new();
    if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        warn!("could not read from stdin: {e}");
    }
}
