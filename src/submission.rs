//! Prompt submission and completion detection.
//!
//! Completion is a textual heuristic: the page shows [`BUSY_MARKER`] while it
//! generates. The engine polls for it and, once it is gone, waits a fixed
//! settle delay so late rendering lands before extraction.

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::driver::PageDriver;
use crate::error::{PilotError, Result};
use crate::locator::{self, ElementHandle};
use crate::selectors::{ElementRole, BUSY_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    InputLocated,
    Submitted,
    Generating,
    Complete,
    TimedOut,
}

pub struct SubmissionEngine<'a, D: PageDriver + ?Sized> {
    driver: &'a D,
    timings: &'a Timings,
    state: QueryState,
}

impl<'a, D: PageDriver + ?Sized> SubmissionEngine<'a, D> {
    pub fn new(driver: &'a D, timings: &'a Timings) -> Self {
        Self {
            driver,
            timings,
            state: QueryState::Idle,
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    fn advance(&mut self, next: QueryState) {
        debug!(from = ?self.state, to = ?next, "query state");
        self.state = next;
    }

    /// Drive one prompt from `Idle` to `Complete`.
    pub async fn run(&mut self, prompt: &str) -> Result<QueryState> {
        let input = self.locate_input().await?;
        self.submit(&input, prompt).await?;
        self.await_completion().await?;
        Ok(self.state)
    }

    pub async fn locate_input(&mut self) -> Result<ElementHandle> {
        let handle =
            locator::require(self.driver, ElementRole::Input, self.timings.element_timeout).await?;
        self.advance(QueryState::InputLocated);
        Ok(handle)
    }

    pub async fn submit(&mut self, input: &ElementHandle, prompt: &str) -> Result<()> {
        self.driver
            .fill(input.selector, input.index, prompt)
            .await?;
        self.driver.press_key("Enter").await?;

        // the keyboard commit alone is not always enough, so also click send
        if let Some(send) =
            locator::locate(self.driver, ElementRole::SendButton, self.timings.element_timeout)
                .await
        {
            if let Err(e) = self.driver.click(send.selector, send.index).await {
                debug!("send button click ignored: {e:#}");
            }
        }

        info!(chars = prompt.chars().count(), "prompt submitted");
        self.advance(QueryState::Submitted);
        Ok(())
    }

    /// Poll until the busy marker is gone, then settle.
    ///
    /// With the marker continuously present the timeout surfaces on the first
    /// tick at or after ceiling + poll interval, so a generation is never cut
    /// short of that.
    pub async fn await_completion(&mut self) -> Result<()> {
        let started = Instant::now();
        let limit = self.timings.response_timeout + self.timings.poll_interval;
        self.advance(QueryState::Generating);

        loop {
            let busy = match self.driver.body_text().await {
                Ok(text) => text.contains(BUSY_MARKER),
                Err(e) => {
                    warn!("could not read page text while polling: {e:#}");
                    true
                }
            };

            if !busy {
                debug!(elapsed = ?started.elapsed(), "busy marker gone, settling");
                sleep(self.timings.settle_delay).await;
                self.advance(QueryState::Complete);
                return Ok(());
            }

            if started.elapsed() >= limit {
                self.advance(QueryState::TimedOut);
                return Err(PilotError::Timeout {
                    waited: started.elapsed(),
                });
            }

            sleep(self.timings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, ScriptedPage};
    use std::time::Duration;

    fn input_selector() -> &'static str {
        ElementRole::Input.cascade()[0]
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_submits_and_completes_after_settle() {
        let send = ElementRole::SendButton.cascade()[0];
        let page = ScriptedPage::new()
            .with_element(input_selector())
            .with_element(send)
            .with_bodies(&["Running...", "Running...", "done"]);
        let timings = Timings::default();
        let mut engine = SubmissionEngine::new(&page, &timings);

        let started = Instant::now();
        let state = engine.run("ping").await.unwrap();

        assert_eq!(state, QueryState::Complete);
        // two busy ticks, then the settle delay
        assert_eq!(started.elapsed(), Duration::from_secs(2 * 2 + 3));
        let calls = page.calls();
        assert_eq!(
            calls,
            vec![
                Call::Fill(input_selector().to_string(), 0, "ping".to_string()),
                Call::PressKey("Enter".to_string()),
                Call::Click(send.to_string(), 0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_send_button_is_ignored() {
        let page = ScriptedPage::new()
            .with_element(input_selector())
            .with_body("answer");
        let timings = Timings::default();
        let mut engine = SubmissionEngine::new(&page, &timings);

        assert_eq!(engine.run("hi").await.unwrap(), QueryState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_input_fails_before_submitting() {
        let page = ScriptedPage::new().with_body("answer");
        let timings = Timings::default();
        let mut engine = SubmissionEngine::new(&page, &timings);

        let err = engine.run("hi").await.unwrap_err();
        assert!(matches!(err, PilotError::ElementNotFound { .. }));
        assert_eq!(engine.state(), QueryState::Idle);
        assert!(page.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_at_ceiling_plus_poll_interval() {
        let page = ScriptedPage::new().with_body("Running...");
        let timings = Timings {
            response_timeout: Duration::from_secs(10),
            ..Timings::default()
        };
        let mut engine = SubmissionEngine::new(&page, &timings);

        let started = Instant::now();
        let err = engine.await_completion().await.unwrap_err();

        assert_eq!(started.elapsed(), Duration::from_secs(10 + 2));
        assert_eq!(engine.state(), QueryState::TimedOut);
        match err {
            PilotError::Timeout { waited } => assert_eq!(waited, Duration::from_secs(12)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_before_ceiling_plus_interval() {
        let page = ScriptedPage::new().with_body("Running...");
        let timings = Timings {
            response_timeout: Duration::from_secs(5),
            ..Timings::default()
        };
        let mut engine = SubmissionEngine::new(&page, &timings);

        let started = Instant::now();
        let err = engine.await_completion().await.unwrap_err();

        // ticks at 0, 2, 4, 6 stay under 7 s; the 8 s tick gives up
        assert_eq!(started.elapsed(), Duration::from_secs(8));
        assert!(matches!(err, PilotError::Timeout { .. }));
    }
}
