//! Session persistence: auth cookies and the last used model preference.
//!
//! The backing record is a small JSON document. Version 1 files were a bare
//! array of cookies; they are migrated to the current schema the first time
//! they are read. Persistence is best-effort: write failures are logged and
//! never abort a query.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::models::{self, ModelIdentifier};

pub const CURRENT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// seconds since epoch, `None` or negative for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    Manual,
    Automated,
    Cli,
    Legacy,
    Migrated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionHistory {
    pub last_selection: DateTime<Utc>,
    pub selection_method: SelectionMethod,
    #[serde(default)]
    pub fallback_used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub cookies: Vec<CookieRecord>,
    #[serde(default, deserialize_with = "lenient_model")]
    pub preferred_model: Option<ModelIdentifier>,
    #[serde(default)]
    pub model_selection_history: Option<SelectionHistory>,
    #[serde(default = "Utc::now")]
    pub last_used: DateTime<Utc>,
}

fn legacy_version() -> u32 {
    1
}

// an unknown tag or a non-string value is treated as "no preference"
fn lenient_model<'de, D>(deserializer: D) -> std::result::Result<Option<ModelIdentifier>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(models::parse_alias))
}

impl SessionRecord {
    pub fn new(cookies: Vec<CookieRecord>) -> Self {
        Self {
            version: CURRENT_VERSION,
            cookies,
            preferred_model: None,
            model_selection_history: None,
            last_used: Utc::now(),
        }
    }

    /// Wrap a version 1 cookie array into the current schema.
    pub fn from_legacy(cookies: Vec<CookieRecord>) -> Self {
        let now = Utc::now();
        Self {
            version: CURRENT_VERSION,
            cookies,
            preferred_model: None,
            model_selection_history: Some(SelectionHistory {
                last_selection: now,
                selection_method: SelectionMethod::Migrated,
                fallback_used: false,
            }),
            last_used: now,
        }
    }

    fn bump_version(&mut self) {
        self.version = self.version.max(CURRENT_VERSION);
    }
}

/// Narrow key-value interface the query core talks to.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<SessionRecord>;

    /// Merge cookies (and the preferred model when given) into the record.
    fn save(&self, cookies: Vec<CookieRecord>, preferred_model: Option<ModelIdentifier>);

    fn save_preferred_model(
        &self,
        model: ModelIdentifier,
        method: SelectionMethod,
        fallback_used: bool,
    );

    fn clear(&self);

    fn preferred_model(&self) -> Option<ModelIdentifier> {
        self.load().and_then(|r| r.preferred_model)
    }
}

fn merge_cookies(
    existing: Option<SessionRecord>,
    cookies: Vec<CookieRecord>,
    preferred_model: Option<ModelIdentifier>,
) -> SessionRecord {
    let mut record = existing.unwrap_or_else(|| SessionRecord::new(Vec::new()));
    record.cookies = cookies;
    if preferred_model.is_some() {
        record.preferred_model = preferred_model;
    }
    record.bump_version();
    record.last_used = Utc::now();
    record
}

fn merge_preference(
    existing: Option<SessionRecord>,
    model: ModelIdentifier,
    method: SelectionMethod,
    fallback_used: bool,
) -> SessionRecord {
    let now = Utc::now();
    let mut record = existing.unwrap_or_else(|| SessionRecord::new(Vec::new()));
    record.preferred_model = Some(model);
    record.model_selection_history = Some(SelectionHistory {
        last_selection: now,
        selection_method: method,
        fallback_used,
    });
    record.bump_version();
    record.last_used = now;
    record
}

// ---------------------------------------------------------------------------
// file-backed store
// ---------------------------------------------------------------------------

pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prompt-pilot")
            .join("session.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<SessionRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("session file is not valid JSON")?;

        if value.is_array() {
            let cookies: Vec<CookieRecord> =
                serde_json::from_value(value).context("legacy cookie array is malformed")?;
            debug!(count = cookies.len(), "migrating legacy session file");
            let record = SessionRecord::from_legacy(cookies);
            // the migrated record is still usable when the rewrite fails
            if let Err(e) = self.write(&record) {
                warn!(path = %self.path.display(), "could not rewrite migrated session file: {e:#}");
            }
            return Ok(Some(record));
        }

        let record: SessionRecord =
            serde_json::from_value(value).context("session record is malformed")?;
        if record.version > CURRENT_VERSION {
            debug!(version = record.version, "session file written by a newer version");
        }
        Ok(Some(record))
    }

    fn write(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        // write next to the target then rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<SessionRecord> {
        match self.read() {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring unreadable session file: {e:#}");
                None
            }
        }
    }

    fn save(&self, cookies: Vec<CookieRecord>, preferred_model: Option<ModelIdentifier>) {
        let record = merge_cookies(self.load(), cookies, preferred_model);
        if let Err(e) = self.write(&record) {
            warn!("failed to save session: {e:#}");
        }
    }

    fn save_preferred_model(
        &self,
        model: ModelIdentifier,
        method: SelectionMethod,
        fallback_used: bool,
    ) {
        let record = merge_preference(self.load(), model, method, fallback_used);
        if let Err(e) = self.write(&record) {
            warn!("failed to save model preference: {e:#}");
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "session cleared"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to clear session: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// in-memory store
// ---------------------------------------------------------------------------

/// Store that never touches disk. Used by `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SessionRecord>> {
        // a poisoned lock only means a panicking test; the data is still usable
        self.record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<SessionRecord> {
        self.slot().clone()
    }

    fn save(&self, cookies: Vec<CookieRecord>, preferred_model: Option<ModelIdentifier>) {
        let mut slot = self.slot();
        let record = merge_cookies(slot.take(), cookies, preferred_model);
        *slot = Some(record);
    }

    fn save_preferred_model(
        &self,
        model: ModelIdentifier,
        method: SelectionMethod,
        fallback_used: bool,
    ) {
        let mut slot = self.slot();
        let record = merge_preference(slot.take(), model, method, fallback_used);
        *slot = Some(record);
    }

    fn clear(&self) {
        *self.slot() = None;
    }
}
