//! Event queue feeding the router.
//!
//! Every producer (poller task, tray, settings panel, file watcher) posts
//! immutable [`UiEvent`] values; the router is the single consumer, so
//! presentation state is only ever touched from one place.

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;

use crate::{
    config::SettingsPatch,
    poller::{OutcomeSink, PollOutcome},
    presentation::PresentationEvent,
};

/// Everything the router can be asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Poll outcomes and user intents for the overlay state machine.
    Presentation(PresentationEvent),
    /// The settings panel was submitted.
    SettingsSubmitted(SettingsPatch),
    /// The settings file was modified outside the application.
    SettingsFileChanged,
}

impl From<PresentationEvent> for UiEvent {
    fn from(event: PresentationEvent) -> Self {
        UiEvent::Presentation(event)
    }
}

/// Creates a connected sender / receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, EventReceiver { receiver })
}

/// Cloneable producer handle.
///
/// # Example
///
/// ```no_run
/// use dextop::event::{self, UiEvent};
/// use dextop::presentation::PresentationEvent;
///
/// let (sender, _receiver) = event::channel();
/// sender.publish(PresentationEvent::DragEnableRequested.into())?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<UiEvent>,
}

impl EventSender {
    /// Posts an event. Fails once the router has gone away.
    pub fn publish(&self, event: UiEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|e| anyhow!("Event router is gone, dropped {:?}", e.0))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl OutcomeSink for EventSender {
    fn deliver(&self, outcome: PollOutcome) {
        if let Err(e) = self.publish(UiEvent::Presentation(outcome.into())) {
            log::debug!("{e}");
        }
    }
}

/// Single consumer end, owned by the router.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<UiEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<UiEvent> {
        self.receiver.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<UiEvent> {
        self.receiver.try_recv().ok()
    }

    /// Stops accepting new events and discards everything still queued.
    /// Returns how many events were dropped.
    pub fn close_and_drain(&mut self) -> usize {
        self.receiver.close();
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
