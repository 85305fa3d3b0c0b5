//! Making the chat app use a specific model.
//!
//! Two mechanisms, tried in order:
//!
//! - **storage channel**: rewrite the `promptModel` field of the preference
//!   blob the app keeps in `localStorage`, read it back and verify;
//! - **dropdown**: open the model selector and click the matching option.
//!
//! Neither mechanism failing aborts a query. The app then keeps whatever model
//! it had selected.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::driver::PageDriver;
use crate::error::{PilotError, Result};
use crate::locator;
use crate::models::ModelIdentifier;
use crate::selectors::ElementRole;
use crate::session::{SelectionMethod, SessionStore};

/// `localStorage` key of the app's preference blob.
pub const PREFERENCE_KEY: &str = "aiStudioUserPreference";
/// The only field of the blob this crate interprets.
pub const MODEL_FIELD: &str = "promptModel";

#[derive(Debug, Clone, PartialEq)]
pub struct StorageWriteOutcome {
    /// blob as read back after the write
    pub preference: Map<String, Value>,
    /// whether the stored model differed before the write
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Storage,
    Dropdown,
    Unchanged,
}

// absent or unparsable blobs start over from an empty object
fn parse_preference(raw: Option<&str>) -> Map<String, Value> {
    match raw.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        Some(Ok(_) | Err(_)) => {
            debug!("preference blob is not a JSON object, starting from {{}}");
            Map::new()
        }
        None => Map::new(),
    }
}

fn channel_error(step: &str, e: &anyhow::Error) -> PilotError {
    PilotError::StorageChannel(format!("{step}: {e:#}"))
}

/// Read-modify-write of the preference blob, leaving every other field as is.
pub async fn apply_via_storage<D>(driver: &D, model: ModelIdentifier) -> Result<StorageWriteOutcome>
where
    D: PageDriver + ?Sized,
{
    let target = model.descriptor().storage_key;

    let raw = driver
        .local_storage_get(PREFERENCE_KEY)
        .await
        .map_err(|e| channel_error("read", &e))?;
    let mut preference = parse_preference(raw.as_deref());
    let changed = preference.get(MODEL_FIELD).and_then(Value::as_str) != Some(target);

    preference.insert(MODEL_FIELD.to_string(), Value::String(target.to_string()));
    let serialized = serde_json::to_string(&preference)
        .map_err(|e| PilotError::StorageChannel(format!("serialize: {e}")))?;
    driver
        .local_storage_set(PREFERENCE_KEY, &serialized)
        .await
        .map_err(|e| channel_error("write", &e))?;

    let stored = driver
        .local_storage_get(PREFERENCE_KEY)
        .await
        .map_err(|e| channel_error("verify", &e))?;
    let preference = parse_preference(stored.as_deref());
    match preference.get(MODEL_FIELD).and_then(Value::as_str) {
        Some(found) if found == target => Ok(StorageWriteOutcome {
            preference,
            changed,
        }),
        found => Err(PilotError::StorageChannel(format!(
            "verification mismatch: expected {target}, found {}",
            found.unwrap_or("nothing")
        ))),
    }
}

/// Whether the page has to reload to pick up a rewritten preference.
///
/// This is a DOM heuristic, not a guarantee: reload when the model selector is
/// missing or does not show the target model.
pub async fn needs_reload<D>(driver: &D, model: ModelIdentifier, timings: &Timings) -> bool
where
    D: PageDriver + ?Sized,
{
    let Some(selector) =
        locator::locate(driver, ElementRole::ModelDropdown, timings.overlay_timeout).await
    else {
        return true;
    };
    let texts = driver.query_texts(selector.selector).await.unwrap_or_default();
    texts
        .get(selector.index)
        .map_or(true, |label| !label.contains(model.descriptor().match_token))
}

/// Index of the option naming `model`: exact display name, then an option
/// containing it, then the short token.
pub fn match_option(options: &[String], model: ModelIdentifier) -> Option<usize> {
    let descriptor = model.descriptor();
    let display = descriptor.display_name.to_lowercase();
    let lowered: Vec<String> = options.iter().map(|o| o.trim().to_lowercase()).collect();
    lowered
        .iter()
        .position(|o| *o == display)
        .or_else(|| lowered.iter().position(|o| o.contains(&display)))
        .or_else(|| {
            options
                .iter()
                .position(|o| o.contains(descriptor.match_token))
        })
}

/// Open the model selector and click the option for `model`. Best effort.
pub async fn apply_via_dropdown<D>(driver: &D, model: ModelIdentifier, timings: &Timings) -> bool
where
    D: PageDriver + ?Sized,
{
    let Some(dropdown) =
        locator::locate(driver, ElementRole::ModelDropdown, timings.element_timeout).await
    else {
        debug!("no model selector on the page");
        return false;
    };
    if let Err(e) = driver.click(dropdown.selector, dropdown.index).await {
        debug!("could not open model selector: {e:#}");
        return false;
    }

    let Some(options) =
        locator::locate(driver, ElementRole::ModelOption, timings.element_timeout).await
    else {
        debug!("model selector opened but no options appeared");
        return false;
    };
    let labels = driver.query_texts(options.selector).await.unwrap_or_default();
    let Some(index) = match_option(&labels, model) else {
        debug!(?labels, %model, "no option matches the model");
        return false;
    };

    match driver.click(options.selector, index).await {
        Ok(()) => {
            debug!(label = %labels[index], "model option clicked");
            true
        }
        Err(e) => {
            debug!("could not click model option: {e:#}");
            false
        }
    }
}

/// Apply `model`, storage channel first, and record the result in `store`.
pub async fn select_model<D>(
    driver: &D,
    store: &dyn SessionStore,
    model: ModelIdentifier,
    method: SelectionMethod,
    timings: &Timings,
) -> SelectionOutcome
where
    D: PageDriver + ?Sized,
{
    match apply_via_storage(driver, model).await {
        Ok(outcome) => {
            info!(%model, changed = outcome.changed, "model preference written");
            if outcome.changed && needs_reload(driver, model, timings).await {
                info!("reloading so the app picks up the new model");
                if let Err(e) = driver.reload(timings.navigation_timeout).await {
                    warn!("reload after model change failed: {e:#}");
                }
                locator::dismiss_overlay(driver, timings.overlay_timeout).await;
            }
            store.save_preferred_model(model, method, false);
            return SelectionOutcome::Storage;
        }
        Err(e) => debug!("{e}, falling back to the model selector"),
    }

    if apply_via_dropdown(driver, model, timings).await {
        info!(%model, "model selected through the dropdown");
        store.save_preferred_model(model, method, true);
        return SelectionOutcome::Dropdown;
    }

    warn!(%model, "could not select the model, the app keeps its current one");
    SelectionOutcome::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use crate::testing::{Call, ScriptedPage};

    fn blob(page: &ScriptedPage) -> Map<String, Value> {
        parse_preference(page.storage_value(PREFERENCE_KEY).as_deref())
    }

    #[tokio::test]
    async fn test_storage_write_preserves_other_fields() {
        let page = ScriptedPage::new().with_storage(
            PREFERENCE_KEY,
            r#"{"theme":"dark","promptModel":"models/gemini-2.5-pro","autosave":true}"#,
        );

        let outcome = apply_via_storage(&page, ModelIdentifier::Flash).await.unwrap();
        assert!(outcome.changed);
        let stored = blob(&page);
        assert_eq!(stored["promptModel"], "models/gemini-2.5-flash");
        assert_eq!(stored["theme"], "dark");
        assert_eq!(stored["autosave"], true);
        // key order survives the rewrite
        let keys: Vec<&String> = stored.keys().collect();
        assert_eq!(keys, ["theme", "promptModel", "autosave"]);
    }

    #[tokio::test]
    async fn test_storage_write_is_idempotent() {
        let page = ScriptedPage::new();

        let first = apply_via_storage(&page, ModelIdentifier::Pro).await.unwrap();
        let after_first = blob(&page);
        let second = apply_via_storage(&page, ModelIdentifier::Pro).await.unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(blob(&page), after_first);
        assert_eq!(second.preference[MODEL_FIELD], "models/gemini-2.5-pro");
    }

    #[tokio::test]
    async fn test_garbage_blob_starts_from_empty_object() {
        let page = ScriptedPage::new().with_storage(PREFERENCE_KEY, "[1,2");
        let outcome = apply_via_storage(&page, ModelIdentifier::Pro).await.unwrap();
        assert_eq!(outcome.preference.len(), 1);
    }

    #[tokio::test]
    async fn test_script_failure_is_a_storage_channel_error() {
        let page = ScriptedPage::new().with_storage_failures(1);
        let err = apply_via_storage(&page, ModelIdentifier::Pro).await.unwrap_err();
        assert!(matches!(err, PilotError::StorageChannel(_)));
    }

    #[tokio::test]
    async fn test_unverified_write_is_a_storage_channel_error() {
        let page = ScriptedPage::new()
            .with_storage(PREFERENCE_KEY, r#"{"promptModel":"models/gemini-2.5-pro"}"#)
            .with_ignored_storage_writes();

        let err = apply_via_storage(&page, ModelIdentifier::Flash).await.unwrap_err();

        match err {
            PilotError::StorageChannel(message) => {
                assert!(message.contains("models/gemini-2.5-flash"));
                assert!(message.contains("models/gemini-2.5-pro"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_match_option_prefers_display_name() {
        let options = vec![
            "Gemini 2.5 Flash-Lite".to_string(),
            "Gemini 2.5 Flash".to_string(),
            "Gemini 2.5 Pro".to_string(),
        ];
        assert_eq!(match_option(&options, ModelIdentifier::Pro), Some(2));
        assert_eq!(match_option(&options, ModelIdentifier::Flash), Some(1));

        let short = vec!["Pro (preview)".to_string(), "Flash".to_string()];
        assert_eq!(match_option(&short, ModelIdentifier::Pro), Some(0));
        assert_eq!(match_option(&short, ModelIdentifier::Flash), Some(1));
        assert_eq!(match_option(&["Ultra".to_string()], ModelIdentifier::Pro), None);
    }

    #[tokio::test]
    async fn test_select_model_reloads_when_selector_shows_other_model() {
        let dropdown = ElementRole::ModelDropdown.cascade()[0];
        let page = ScriptedPage::new().with_texts(dropdown, &["Gemini 2.5 Pro"]);
        let store = MemorySessionStore::new();
        let timings = Timings::default();

        let outcome = select_model(
            &page,
            &store,
            ModelIdentifier::Flash,
            SelectionMethod::Cli,
            &timings,
        )
        .await;

        assert_eq!(outcome, SelectionOutcome::Storage);
        assert!(page.calls().contains(&Call::Reload));
        let history = store.load().unwrap().model_selection_history.unwrap();
        assert_eq!(history.selection_method, SelectionMethod::Cli);
        assert!(!history.fallback_used);
    }

    #[tokio::test]
    async fn test_overlay_dismissed_again_after_reload() {
        let dropdown = ElementRole::ModelDropdown.cascade()[0];
        let close = ElementRole::CloseButton.cascade()[0];
        let page = ScriptedPage::new()
            .with_texts(dropdown, &["Gemini 2.5 Pro"])
            .with_element(close);
        let store = MemorySessionStore::new();

        select_model(
            &page,
            &store,
            ModelIdentifier::Flash,
            SelectionMethod::Cli,
            &Timings::default(),
        )
        .await;

        let calls = page.calls();
        let reload = calls.iter().position(|c| *c == Call::Reload).unwrap();
        let dismissed = calls
            .iter()
            .position(|c| *c == Call::Click(close.to_string(), 0))
            .unwrap();
        assert!(dismissed > reload);
    }

    #[tokio::test]
    async fn test_select_model_skips_reload_when_selector_agrees() {
        let dropdown = ElementRole::ModelDropdown.cascade()[0];
        let page = ScriptedPage::new().with_texts(dropdown, &["Gemini 2.5 Flash"]);
        let store = MemorySessionStore::new();

        select_model(
            &page,
            &store,
            ModelIdentifier::Flash,
            SelectionMethod::Automated,
            &Timings::default(),
        )
        .await;

        assert!(!page.calls().contains(&Call::Reload));
        assert_eq!(store.preferred_model(), Some(ModelIdentifier::Flash));
    }

    #[tokio::test]
    async fn test_dropdown_fallback_marks_fallback_used() {
        let dropdown = ElementRole::ModelDropdown.cascade()[0];
        let option = ElementRole::ModelOption.cascade()[0];
        let page = ScriptedPage::new()
            .with_storage_failures(1)
            .with_element(dropdown)
            .with_texts(option, &["Gemini 2.5 Pro", "Gemini 2.5 Flash"]);
        let store = MemorySessionStore::new();

        let outcome = select_model(
            &page,
            &store,
            ModelIdentifier::Flash,
            SelectionMethod::Cli,
            &Timings::default(),
        )
        .await;

        assert_eq!(outcome, SelectionOutcome::Dropdown);
        assert!(page.calls().contains(&Call::Click(option.to_string(), 1)));
        let history = store.load().unwrap().model_selection_history.unwrap();
        assert!(history.fallback_used);
    }

    #[tokio::test]
    async fn test_both_mechanisms_failing_is_not_an_error() {
        let page = ScriptedPage::new().with_storage_failures(3);
        let store = MemorySessionStore::new();

        let outcome = select_model(
            &page,
            &store,
            ModelIdentifier::Pro,
            SelectionMethod::Automated,
            &Timings::default(),
        )
        .await;

        assert_eq!(outcome, SelectionOutcome::Unchanged);
        assert!(store.load().is_none());
    }
}
