//! Element locator: one pass over a role's selector cascade, first usable hit wins.

use std::time::Duration;

use tracing::debug;

use crate::driver::PageDriver;
use crate::error::{PilotError, Result};
use crate::selectors::ElementRole;

/// A located element: the selector that matched and the match index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub role: ElementRole,
    pub selector: &'static str,
    pub index: usize,
}

/// Try each selector of `role`'s cascade with a per-attempt `timeout`.
///
/// An element counts when it is present and enabled, and for click targets
/// also visible. Driver errors on a single selector count as a miss.
pub async fn locate<D>(driver: &D, role: ElementRole, timeout: Duration) -> Option<ElementHandle>
where
    D: PageDriver + ?Sized,
{
    for &selector in role.cascade() {
        match driver.wait_for_selector(selector, timeout).await {
            Ok(Some(state)) if state.enabled && (state.visible || !role.is_click_target()) => {
                debug!(%role, selector, "element found");
                return Some(ElementHandle {
                    role,
                    selector,
                    index: 0,
                });
            }
            Ok(Some(state)) => {
                debug!(%role, selector, ?state, "element present but not usable");
            }
            Ok(None) => debug!(%role, selector, "no match"),
            Err(e) => debug!(%role, selector, "lookup failed: {e:#}"),
        }
    }
    debug!(%role, "cascade exhausted");
    None
}

/// Like [`locate`], but a miss is an [`PilotError::ElementNotFound`].
pub async fn require<D>(driver: &D, role: ElementRole, timeout: Duration) -> Result<ElementHandle>
where
    D: PageDriver + ?Sized,
{
    locate(driver, role, timeout)
        .await
        .ok_or_else(|| PilotError::ElementNotFound {
            role,
            tried: role.cascade().iter().map(|s| (*s).to_string()).collect(),
        })
}

/// Close a blocking dialog or overlay if one is showing. Never fails.
pub async fn dismiss_overlay<D>(driver: &D, timeout: Duration) -> bool
where
    D: PageDriver + ?Sized,
{
    let Some(close) = locate(driver, ElementRole::CloseButton, timeout).await else {
        return false;
    };
    match driver.click(close.selector, close.index).await {
        Ok(()) => {
            debug!(selector = close.selector, "overlay dismissed");
            true
        }
        Err(e) => {
            debug!(selector = close.selector, "overlay click failed: {e:#}");
            false
        }
    }
}
