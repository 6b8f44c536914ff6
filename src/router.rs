//! Event router: the single consumer of [`UiEvent`]s.
//!
//! Owns the presentation state machine together with everything its effects
//! touch (poller, settings file, failure log, renderer, background services)
//! and executes the effects of each transition in order.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};

use crate::{
    config::{SettingsManager, SettingsPatch},
    event::{self, EventReceiver, EventSender, UiEvent},
    failure_log::FailureLog,
    poller::{Phase, Poller},
    presentation::{Effect, Lifecycle, PresentationEvent, PresentationState, RenderCommand},
    settings_watcher,
    setup::Session,
    source::{FetchError, SourceHandle},
    task_manager::TaskManager,
};

/// Output side of the overlay: window, tray, or anything that draws.
pub trait Renderer: Send {
    fn render(&mut self, command: &RenderCommand);
}

/// Renderer for headless runs. Writes every command to the log.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&mut self, command: &RenderCommand) {
        match command {
            RenderCommand::Repaint(display) => info!(
                "{} {} trend={} colour={:?}",
                display.glucose_text,
                display.units.label(),
                display.trend_code(),
                display.colour
            ),
            RenderCommand::Reposition(position) => {
                debug!("Overlay moved to ({}, {})", position.x, position.y)
            }
            RenderCommand::Resize(profile) => debug!(
                "Overlay resized to {}x{} ({})",
                profile.window.0,
                profile.window.1,
                profile.size.as_str()
            ),
            RenderCommand::SetClickThrough(enabled) => debug!("Click-through: {enabled}"),
            RenderCommand::ShowSettingsPanel => info!("Settings panel requested"),
            RenderCommand::HideOverlay => debug!("Overlay hidden"),
            RenderCommand::Terminate => info!("Overlay terminated"),
        }
    }
}

pub struct EventRouter {
    state: PresentationState,
    poller: Poller,
    source: Option<SourceHandle>,
    session: Option<Session>,
    settings: SettingsManager,
    failure_log: FailureLog,
    renderer: Box<dyn Renderer>,
    tasks: TaskManager,
    sender: EventSender,
    receiver: EventReceiver,
}

impl EventRouter {
    pub fn new(
        settings: SettingsManager,
        failure_log: FailureLog,
        source: SourceHandle,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        let (sender, receiver) = event::channel();
        let state = PresentationState::new(settings.configuration(), settings.screen());
        Self {
            state,
            poller: Poller::new(),
            source: Some(source),
            session: None,
            settings,
            failure_log,
            renderer,
            tasks: TaskManager::new(),
            sender,
            receiver,
        }
    }

    /// Account used to obtain a new source when the region changes.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Handle for producers (tray, settings panel, signal handlers).
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn state(&self) -> &PresentationState {
        &self.state
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn poller_phase(&self) -> Phase {
        self.poller.phase()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lifecycle() == Lifecycle::Closed
    }

    /// Starts reloading the settings file when it is edited externally.
    pub fn watch_settings(&mut self) {
        settings_watcher::spawn(
            &mut self.tasks,
            self.settings.path().to_path_buf(),
            self.sender.clone(),
        );
    }

    /// Draws the first frame and starts polling.
    pub async fn start(&mut self) -> Result<()> {
        if self.state.lifecycle() != Lifecycle::Uninitialized {
            bail!("Event router already started");
        }

        let effects = self.state.initialize();
        self.execute(effects).await;

        let interval = self.state.configuration().poll_interval();
        self.poller
            .start(self.source.take(), interval, Arc::new(self.sender.clone()))
            .context("Failed to start polling")?;
        Ok(())
    }

    pub async fn next_event(&mut self) -> Option<UiEvent> {
        self.receiver.recv().await
    }

    /// Processes one event to completion.
    pub async fn handle(&mut self, event: UiEvent) {
        match event {
            UiEvent::Presentation(event) => self.dispatch(event).await,
            UiEvent::SettingsSubmitted(patch) => self.settings_submitted(patch).await,
            UiEvent::SettingsFileChanged => self.settings_file_changed().await,
        }

        if self.is_closed() {
            let dropped = self.receiver.close_and_drain();
            if dropped > 0 {
                debug!("Discarded {dropped} event(s) queued after close");
            }
        }
    }

    /// Runs until the overlay is closed or Ctrl+C is received.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        info!("Event router running");

        while !self.is_closed() {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Received Ctrl+C, closing overlay"),
                        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
                    }
                    self.handle(PresentationEvent::CloseRequested.into()).await;
                }

                event = self.receiver.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        warn!("Event queue closed unexpectedly");
                        self.handle(PresentationEvent::CloseRequested.into()).await;
                    }
                },
            }
        }

        info!("Event router stopped");
        Ok(())
    }

    async fn dispatch(&mut self, event: PresentationEvent) {
        let effects = self.state.apply(event);
        self.execute(effects).await;
    }

    async fn settings_submitted(&mut self, patch: SettingsPatch) {
        match self.settings.save(patch) {
            Ok(config) => {
                self.dispatch(PresentationEvent::SettingsChanged(config))
                    .await
            }
            Err(e) => warn!("Settings not applied: {e:#}"),
        }
    }

    async fn settings_file_changed(&mut self) {
        let before = self.settings.configuration();
        match self.settings.reload() {
            Ok(config) if config == before => debug!("Settings file unchanged"),
            Ok(config) => {
                info!("Applying externally edited settings");
                self.dispatch(PresentationEvent::SettingsChanged(config))
                    .await
            }
            Err(e) => error!("Failed to reload settings: {e:#}"),
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Render(command) => self.renderer.render(&command),
                Effect::PersistPosition(position) => self.persist(SettingsPatch {
                    position: Some(position),
                    ..Default::default()
                }),
                Effect::PersistSize(size) => self.persist(SettingsPatch {
                    size: Some(size),
                    ..Default::default()
                }),
                Effect::ReconfigurePoller(interval) => {
                    if let Err(e) = self.poller.reconfigure(interval) {
                        warn!("Poll interval not changed: {e}");
                    }
                }
                Effect::Reconnect { europe } => self.reconnect(europe).await,
                Effect::StopPoller => self.stop_background().await,
                Effect::RecordFailure(error) => self.record_failure(&error),
            }
        }
    }

    fn persist(&mut self, patch: SettingsPatch) {
        if let Err(e) = self.settings.save(patch) {
            error!("Failed to persist overlay settings: {e:#}");
        }
    }

    async fn reconnect(&mut self, europe: bool) {
        let Some(session) = &self.session else {
            debug!("No session, keeping current source after region change");
            return;
        };

        match session.reconnect(europe).await {
            Ok(source) => {
                info!(
                    "Reading source switched to the {} region",
                    if europe { "EU" } else { "US" }
                );
                self.poller.set_source(source);
            }
            Err(e) => {
                warn!("{}: {e}, keeping previous source", e.category());
                self.record_failure(&e);
            }
        }
    }

    async fn stop_background(&mut self) {
        self.poller.stop().await;
        if let Err(e) = self.tasks.shutdown_all().await {
            warn!("{e:#}");
        }
    }

    fn record_failure(&self, error: &FetchError) {
        if let Err(e) = self.failure_log.record(error) {
            error!("Failed to write failure log: {e:#}");
        }
    }
}
