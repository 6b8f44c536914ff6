//! Watches the settings file and asks the router to reload it after
//! external edits.
//!
//! Uses `notify`'s recommended backend (inotify on Linux). The parent
//! directory is watched rather than the file itself, since editors usually
//! replace the file instead of writing it in place. Bursts of filesystem
//! events are collapsed into a single `SettingsFileChanged`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    event::{EventSender, UiEvent},
    task_manager::TaskManager,
};

pub const SERVICE_NAME: &str = "SettingsWatcher";

/// Quiet period before a change is reported.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Registers the watcher service with `tasks`.
pub fn spawn(tasks: &mut TaskManager, path: PathBuf, events: EventSender) {
    tasks.spawn_task(SERVICE_NAME, move |cancel_token| {
        run_settings_watcher(path, events, cancel_token)
    });
}

struct ForwardingHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for ForwardingHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            debug!("Settings watcher is gone, dropping filesystem event: {e}");
        }
    }
}

/// Whether a filesystem event is a write to (or creation of) the settings file.
pub fn affects_settings(event: &Event, settings_path: &Path) -> bool {
    let relevant_kind = event.kind.is_modify() || event.kind.is_create();
    relevant_kind
        && event
            .paths
            .iter()
            .any(|path| path == settings_path || path.file_name() == settings_path.file_name())
}

async fn run_settings_watcher(
    settings_path: PathBuf,
    events: EventSender,
    cancel_token: CancellationToken,
) -> Result<()> {
    let (fs_tx, fs_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(ForwardingHandler { sender: fs_tx })
        .context("Failed to create filesystem watcher")?;

    let watch_path = match settings_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher
        .watch(&watch_path, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", watch_path.display()))?;
    info!("Watching {} for settings changes", settings_path.display());

    forward_changes(fs_rx, &settings_path, &events, &cancel_token).await;

    if let Err(e) = watcher.unwatch(&watch_path) {
        debug!("Failed to unwatch {}: {e}", watch_path.display());
    }
    info!("Settings watcher stopped");
    Ok(())
}

/// Turns raw filesystem events into `SettingsFileChanged`, once the settings
/// file has seen no relevant event for [`DEBOUNCE`].
async fn forward_changes(
    mut fs_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    settings_path: &Path,
    events: &EventSender,
    cancel_token: &CancellationToken,
) {
    let mut debounce = tokio::time::interval(DEBOUNCE);
    debounce.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = false;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            received = fs_rx.recv() => match received {
                Some(Ok(event)) => {
                    if affects_settings(&event, settings_path) {
                        debug!("Settings file touched: {:?}", event.kind);
                        pending = true;
                        debounce.reset();
                    }
                }
                Some(Err(e)) => warn!("Filesystem watcher error: {e}"),
                None => {
                    warn!("Filesystem event channel closed");
                    break;
                }
            },

            _ = debounce.tick(), if pending => {
                pending = false;
                if !settings_path.exists() {
                    warn!("Settings file {} no longer exists", settings_path.display());
                    continue;
                }
                if let Err(e) = events.publish(UiEvent::SettingsFileChanged) {
                    error!("Failed to report settings change: {e}");
                    break;
                }
            }
        }
    }
}
