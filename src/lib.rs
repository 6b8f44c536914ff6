//! # dextop
//!
//! A small always-on-top desktop overlay showing the latest glucose reading
//! from a remote monitoring service.
//!
//! ## Features
//!
//! - **Background polling**: one tokio task fetches a reading per interval
//! - **Pure state machine**: overlay state changes only through events
//! - **Self-healing settings**: invalid YAML fields are reset and rewritten
//! - **Failure log**: one line per failed fetch, one file per month
//! - **Hot reload**: external edits of the settings file are applied live
//!
//! ## Architecture
//!
//! - [`Poller`](poller::Poller) posts outcomes into the event queue
//! - [`EventRouter`](router::EventRouter) consumes the queue, feeds the
//!   [`PresentationState`](presentation::PresentationState) and executes
//!   the effects it returns
//! - [`SettingsManager`](config::SettingsManager) owns the settings file
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dextop::{application::Application, config::SettingsManager, display::Screen};
//! use dextop::reading_sources::FeedAuthenticator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = SettingsManager::load("settings.yml", Screen::default())?;
//!     Application::builder()
//!         .with_settings(settings)
//!         .with_authenticator(Arc::new(FeedAuthenticator::new("feed.json")))
//!         .with_login(Some("jane".into()))
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod display;
pub mod event;
pub mod failure_log;
pub mod poller;
pub mod presentation;
pub mod reading_sources;
pub mod router;
pub mod settings_watcher;
pub mod setup;
pub mod source;
pub mod task_manager;
