//! prompt-pilot - drive a hosted AI chat app through Chrome and fetch the answer
//!
//! A query runs strictly in order: restore cookies, navigate, check for a
//! login redirect, dismiss overlays, select the model, submit the prompt, poll
//! until generation ends, extract the response.
//!
//! - `models`: the closed model registry and alias parsing
//! - `session`: cookie and model preference persistence, with schema migration
//! - `selectors` / `locator`: selector cascades and element lookup
//! - `submission`: prompt entry and completion polling
//! - `extraction`: response extraction strategies and markdown cleanup
//! - `model_selection`: storage channel and dropdown fallback
//! - `pilot`: the `run_query` entry point
//! - `driver` / `browser`: the page capability trait and its CDP implementation
//!
//! ```no_run
//! use std::sync::Arc;
//! use prompt_pilot::{BrowserClient, Config, FileSessionStore, Pilot};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let store = Arc::new(FileSessionStore::new(config.session_file.clone()));
//!     let browser = BrowserClient::launch(&config).await?;
//!     let pilot = Pilot::new(browser, store, config);
//!     println!("{}", pilot.run_query("ping", Some("flash"), false).await?);
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod extraction;
pub mod locator;
pub mod model_selection;
pub mod models;
pub mod pilot;
pub mod selectors;
pub mod session;
pub mod submission;
pub mod testing;

pub use browser::BrowserClient;
pub use config::{Config, Timings};
pub use driver::{ElementState, PageDriver};
pub use error::{PilotError, Result};
pub use models::ModelIdentifier;
pub use pilot::Pilot;
pub use session::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore};
