//! Overlay state machine.
//!
//! [`PresentationState`] consumes poll outcomes and user intents and returns
//! the side effects to perform, in order. It never performs I/O itself; the
//! router executes the effects.

use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    config::Configuration,
    display::{DisplayState, Position, Screen, Size, SizeProfile},
    poller::PollOutcome,
    source::{FetchError, Reading},
};

/// Input events of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    ReadingUpdated(Reading),
    FetchFailed(FetchError),
    DragEnableRequested,
    DragDisableRequested,
    DragMoved { dx: i32, dy: i32 },
    DragReleased,
    ResizeRequested(Size),
    ResetPositionRequested,
    SettingsPanelRequested,
    SettingsPanelClosed,
    SettingsChanged(Configuration),
    CloseRequested,
}

impl From<PollOutcome> for PresentationEvent {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Updated(reading) => PresentationEvent::ReadingUpdated(reading),
            PollOutcome::Failed(error) => PresentationEvent::FetchFailed(error),
        }
    }
}

/// Instructions for the rendering / tray layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    Repaint(DisplayState),
    Reposition(Position),
    Resize(SizeProfile),
    /// `true` lets mouse input pass through the overlay.
    SetClickThrough(bool),
    ShowSettingsPanel,
    HideOverlay,
    Terminate,
}

/// Side effects produced by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Render(RenderCommand),
    PersistPosition(Position),
    PersistSize(Size),
    ReconfigurePoller(Duration),
    /// The service region changed; a new source handle is needed.
    Reconnect { europe: bool },
    StopPoller,
    RecordFailure(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Closed,
}

pub struct PresentationState {
    lifecycle: Lifecycle,
    config: Configuration,
    screen: Screen,
    reading: Option<Reading>,
    profile: SizeProfile,
    position: Position,
    draggable: bool,
    /// Position changed by dragging but not persisted yet.
    unsaved_move: bool,
    settings_panel_open: bool,
    display: DisplayState,
}

impl PresentationState {
    pub fn new(config: Configuration, screen: Screen) -> Self {
        let profile = config.size.profile();
        let position = config
            .position
            .unwrap_or_else(|| screen.default_position(config.size));
        let display = DisplayState::derive(
            None,
            config.bottom_threshold,
            config.upper_threshold,
            config.units,
            profile,
            position,
            false,
        );

        Self {
            lifecycle: Lifecycle::Uninitialized,
            config,
            screen,
            reading: None,
            profile,
            position,
            draggable: false,
            unsaved_move: false,
            settings_panel_open: false,
            display,
        }
    }

    /// Moves to `Ready` and returns the effects that draw the first frame.
    pub fn initialize(&mut self) -> Vec<Effect> {
        if self.lifecycle != Lifecycle::Uninitialized {
            warn!("Overlay already initialized ({:?})", self.lifecycle);
            return Vec::new();
        }
        self.lifecycle = Lifecycle::Ready;
        info!(
            "Overlay ready at ({}, {}) with size {}",
            self.position.x,
            self.position.y,
            self.profile.size.as_str()
        );

        vec![
            Effect::Render(RenderCommand::Resize(self.profile)),
            Effect::Render(RenderCommand::Reposition(self.position)),
            Effect::Render(RenderCommand::SetClickThrough(true)),
            self.repaint(),
        ]
    }

    /// Applies one event and returns the effects to execute, in order.
    pub fn apply(&mut self, event: PresentationEvent) -> Vec<Effect> {
        match self.lifecycle {
            Lifecycle::Closed => {
                debug!("Overlay closed, dropping {event:?}");
                return Vec::new();
            }
            Lifecycle::Uninitialized => {
                if let PresentationEvent::SettingsChanged(config) = event {
                    self.swap_config(config);
                } else {
                    warn!("Overlay not initialized, ignoring {event:?}");
                }
                return Vec::new();
            }
            Lifecycle::Ready => {}
        }

        match event {
            PresentationEvent::ReadingUpdated(reading) => {
                self.reading = Some(reading);
                vec![self.repaint()]
            }
            PresentationEvent::FetchFailed(error) => {
                self.reading = None;
                vec![self.repaint(), Effect::RecordFailure(error)]
            }
            PresentationEvent::DragEnableRequested => self.set_draggable(true),
            PresentationEvent::DragDisableRequested => self.set_draggable(false),
            PresentationEvent::DragMoved { dx, dy } => {
                if !self.draggable {
                    return Vec::new();
                }
                self.position = self.position.offset(dx, dy);
                self.unsaved_move = true;
                vec![Effect::Render(RenderCommand::Reposition(self.position))]
            }
            PresentationEvent::DragReleased => {
                if !self.draggable {
                    return Vec::new();
                }
                self.take_unsaved_move().into_iter().collect()
            }
            PresentationEvent::ResizeRequested(size) => self.resize(size),
            PresentationEvent::ResetPositionRequested => {
                self.position = self.screen.default_position(self.profile.size);
                self.unsaved_move = false;
                vec![
                    Effect::Render(RenderCommand::Reposition(self.position)),
                    Effect::PersistPosition(self.position),
                ]
            }
            PresentationEvent::SettingsPanelRequested => {
                self.settings_panel_open = true;
                vec![Effect::Render(RenderCommand::ShowSettingsPanel)]
            }
            PresentationEvent::SettingsPanelClosed => {
                self.settings_panel_open = false;
                Vec::new()
            }
            PresentationEvent::SettingsChanged(config) => self.settings_changed(config),
            PresentationEvent::CloseRequested => {
                self.lifecycle = Lifecycle::Closed;
                info!("Overlay closing");
                vec![
                    Effect::StopPoller,
                    Effect::Render(RenderCommand::HideOverlay),
                    Effect::Render(RenderCommand::Terminate),
                ]
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn is_draggable(&self) -> bool {
        self.draggable
    }

    pub fn is_settings_panel_open(&self) -> bool {
        self.settings_panel_open
    }

    fn set_draggable(&mut self, draggable: bool) -> Vec<Effect> {
        if self.draggable == draggable {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if !draggable {
            effects.extend(self.take_unsaved_move());
        }
        self.draggable = draggable;
        effects.push(Effect::Render(RenderCommand::SetClickThrough(!draggable)));
        effects.push(self.repaint());
        effects
    }

    fn take_unsaved_move(&mut self) -> Option<Effect> {
        if !self.unsaved_move {
            return None;
        }
        self.unsaved_move = false;
        Some(Effect::PersistPosition(self.position))
    }

    fn resize(&mut self, size: Size) -> Vec<Effect> {
        if self.profile.size == size {
            return Vec::new();
        }
        self.profile = size.profile();
        self.config.size = size;
        vec![
            Effect::Render(RenderCommand::Resize(self.profile)),
            Effect::PersistSize(size),
            self.repaint(),
        ]
    }

    fn settings_changed(&mut self, config: Configuration) -> Vec<Effect> {
        let previous = self.swap_config(config);
        self.settings_panel_open = false;

        let mut effects = Vec::new();
        if previous.size != self.config.size {
            self.profile = self.config.size.profile();
            effects.push(Effect::Render(RenderCommand::Resize(self.profile)));
        }
        // An unsaved drag wins over the persisted position.
        let persisted = self.config.position.filter(|p| *p != self.position);
        if let Some(position) = persisted.filter(|_| !self.unsaved_move) {
            self.position = position;
            effects.push(Effect::Render(RenderCommand::Reposition(position)));
        }
        effects.push(self.repaint());

        if previous.interval_minutes != self.config.interval_minutes {
            effects.push(Effect::ReconfigurePoller(self.config.poll_interval()));
        }
        if previous.europe != self.config.europe {
            effects.push(Effect::Reconnect {
                europe: self.config.europe,
            });
        }
        effects
    }

    fn swap_config(&mut self, config: Configuration) -> Configuration {
        std::mem::replace(&mut self.config, config)
    }

    fn repaint(&mut self) -> Effect {
        self.display = DisplayState::derive(
            self.reading.as_ref(),
            self.config.bottom_threshold,
            self.config.upper_threshold,
            self.config.units,
            self.profile,
            self.position,
            self.draggable,
        );
        Effect::Render(RenderCommand::Repaint(self.display.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        display::{ColourClass, NO_READING, Units},
        source::Trend,
    };
    use pretty_assertions::assert_eq;

    fn screen() -> Screen {
        Screen {
            width: 1920,
            height: 1080,
            taskbar_offset: 40,
        }
    }

    fn config() -> Configuration {
        Configuration {
            position: Some(Position::new(100, 100)),
            ..Configuration::default()
        }
    }

    fn ready() -> PresentationState {
        let mut state = PresentationState::new(config(), screen());
        state.initialize();
        state
    }

    fn repaints(effects: &[Effect]) -> Vec<&DisplayState> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Render(RenderCommand::Repaint(display)) => Some(display),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn initialize_draws_placeholder_frame() {
        let mut state = PresentationState::new(config(), screen());
        assert_eq!(state.lifecycle(), Lifecycle::Uninitialized);

        let effects = state.initialize();

        assert_eq!(state.lifecycle(), Lifecycle::Ready);
        assert_eq!(
            effects[..3],
            [
                Effect::Render(RenderCommand::Resize(Size::Normal.profile())),
                Effect::Render(RenderCommand::Reposition(Position::new(100, 100))),
                Effect::Render(RenderCommand::SetClickThrough(true)),
            ]
        );
        assert_eq!(repaints(&effects)[0].glucose_text, NO_READING);
        assert!(state.initialize().is_empty());
    }

    #[test]
    fn missing_position_uses_screen_default() {
        let state = PresentationState::new(Configuration::default(), screen());
        assert_eq!(state.display().position, Position::new(1770, 940));
    }

    #[test]
    fn events_before_initialize_are_ignored() {
        let mut state = PresentationState::new(config(), screen());
        let effects = state.apply(PresentationEvent::ReadingUpdated(Reading::new(
            300,
            Trend::Flat,
        )));
        assert!(effects.is_empty());
        assert_eq!(state.display().glucose_text, NO_READING);
    }

    #[test]
    fn reading_update_repaints_with_colour() {
        let mut state = ready();

        let effects = state.apply(PresentationEvent::ReadingUpdated(Reading::new(
            250,
            Trend::SingleUp,
        )));

        let display = repaints(&effects)[0];
        assert_eq!(display.glucose_text, "250");
        assert_eq!(display.trend_code(), 2);
        assert_eq!(display.colour, ColourClass::High);
    }

    #[test]
    fn low_reading_is_low() {
        let mut state = ready();
        state.apply(PresentationEvent::ReadingUpdated(Reading::new(
            65,
            Trend::DoubleDown,
        )));
        assert_eq!(state.display().colour, ColourClass::Low);
    }

    #[test]
    fn failure_clears_reading_and_records() {
        let mut state = ready();
        state.apply(PresentationEvent::ReadingUpdated(Reading::new(
            250,
            Trend::Flat,
        )));

        let error = FetchError::Connection("down".into());
        let effects = state.apply(PresentationEvent::FetchFailed(error.clone()));

        let display = repaints(&effects)[0];
        assert_eq!(display.glucose_text, NO_READING);
        assert_eq!(display.trend_code(), 0);
        assert_eq!(display.colour, ColourClass::Normal);
        assert_eq!(effects.last(), Some(&Effect::RecordFailure(error)));
    }

    #[test]
    fn drag_toggles_click_through() {
        let mut state = ready();

        let effects = state.apply(PresentationEvent::DragEnableRequested);
        assert_eq!(
            effects[0],
            Effect::Render(RenderCommand::SetClickThrough(false))
        );
        assert!(state.is_draggable());
        assert!(state.apply(PresentationEvent::DragEnableRequested).is_empty());

        let effects = state.apply(PresentationEvent::DragDisableRequested);
        assert_eq!(
            effects[0],
            Effect::Render(RenderCommand::SetClickThrough(true))
        );
        assert!(!state.is_draggable());
    }

    #[test]
    fn drag_moves_in_memory_and_persists_on_release() {
        let mut state = ready();
        state.apply(PresentationEvent::DragEnableRequested);

        let first = state.apply(PresentationEvent::DragMoved { dx: 10, dy: -5 });
        let second = state.apply(PresentationEvent::DragMoved { dx: 5, dy: 5 });
        assert_eq!(
            first,
            vec![Effect::Render(RenderCommand::Reposition(Position::new(
                110, 95
            )))]
        );
        assert_eq!(
            second,
            vec![Effect::Render(RenderCommand::Reposition(Position::new(
                115, 100
            )))]
        );

        let released = state.apply(PresentationEvent::DragReleased);
        assert_eq!(
            released,
            vec![Effect::PersistPosition(Position::new(115, 100))]
        );
        assert!(state.apply(PresentationEvent::DragReleased).is_empty());
    }

    #[test]
    fn drag_ignored_when_not_draggable() {
        let mut state = ready();
        assert!(
            state
                .apply(PresentationEvent::DragMoved { dx: 10, dy: 10 })
                .is_empty()
        );
        assert!(state.apply(PresentationEvent::DragReleased).is_empty());
        assert_eq!(state.display().position, Position::new(100, 100));
    }

    #[test]
    fn disabling_drag_persists_unsaved_move() {
        let mut state = ready();
        state.apply(PresentationEvent::DragEnableRequested);
        state.apply(PresentationEvent::DragMoved { dx: 1, dy: 1 });

        let effects = state.apply(PresentationEvent::DragDisableRequested);
        assert_eq!(effects[0], Effect::PersistPosition(Position::new(101, 101)));
    }

    #[test]
    fn resize_keeps_thresholds_and_persists_size() {
        let mut state = ready();
        state.apply(PresentationEvent::ReadingUpdated(Reading::new(
            210,
            Trend::Flat,
        )));

        let effects = state.apply(PresentationEvent::ResizeRequested(Size::Large));

        assert_eq!(
            effects[..2],
            [
                Effect::Render(RenderCommand::Resize(Size::Large.profile())),
                Effect::PersistSize(Size::Large),
            ]
        );
        let display = repaints(&effects)[0];
        assert_eq!(display.profile, Size::Large.profile());
        assert_eq!(display.colour, ColourClass::High);
        assert_eq!(state.configuration().upper_threshold, 200.0);
        assert!(
            state
                .apply(PresentationEvent::ResizeRequested(Size::Large))
                .is_empty()
        );
    }

    #[test]
    fn reset_position_uses_current_size() {
        let mut state = ready();
        state.apply(PresentationEvent::ResizeRequested(Size::Large));

        let effects = state.apply(PresentationEvent::ResetPositionRequested);
        assert_eq!(
            effects,
            vec![
                Effect::Render(RenderCommand::Reposition(Position::new(1700, 900))),
                Effect::PersistPosition(Position::new(1700, 900)),
            ]
        );
    }

    #[test]
    fn lowered_upper_threshold_flips_to_high_immediately() {
        let mut state = ready();
        state.apply(PresentationEvent::ReadingUpdated(Reading::new(
            150,
            Trend::Flat,
        )));
        assert_eq!(state.display().colour, ColourClass::Normal);

        let effects = state.apply(PresentationEvent::SettingsChanged(Configuration {
            upper_threshold: 140.0,
            ..config()
        }));

        assert_eq!(repaints(&effects)[0].colour, ColourClass::High);
        assert_eq!(state.display().colour, ColourClass::High);
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::ReconfigurePoller(_)))
        );
    }

    #[test]
    fn settings_change_reconfigures_and_reconnects() {
        let mut state = ready();
        state.apply(PresentationEvent::SettingsPanelRequested);
        assert!(state.is_settings_panel_open());

        let effects = state.apply(PresentationEvent::SettingsChanged(Configuration {
            interval_minutes: 5,
            europe: true,
            units: Units::MmolL,
            size: Size::Large,
            ..config()
        }));

        assert!(!state.is_settings_panel_open());
        assert_eq!(
            effects[0],
            Effect::Render(RenderCommand::Resize(Size::Large.profile()))
        );
        assert!(effects.contains(&Effect::ReconfigurePoller(Duration::from_secs(300))));
        assert!(effects.contains(&Effect::Reconnect { europe: true }));
        assert_eq!(repaints(&effects)[0].units, Units::MmolL);
    }

    #[test]
    fn settings_change_applies_external_position() {
        let mut state = ready();
        let effects = state.apply(PresentationEvent::SettingsChanged(Configuration {
            position: Some(Position::new(7, 8)),
            ..config()
        }));
        assert_eq!(
            effects[0],
            Effect::Render(RenderCommand::Reposition(Position::new(7, 8)))
        );
    }

    #[test]
    fn close_is_terminal() {
        let mut state = ready();

        let effects = state.apply(PresentationEvent::CloseRequested);
        assert_eq!(
            effects,
            vec![
                Effect::StopPoller,
                Effect::Render(RenderCommand::HideOverlay),
                Effect::Render(RenderCommand::Terminate),
            ]
        );
        assert_eq!(state.lifecycle(), Lifecycle::Closed);

        assert!(
            state
                .apply(PresentationEvent::ReadingUpdated(Reading::new(
                    100,
                    Trend::Flat
                )))
                .is_empty()
        );
        assert!(state.apply(PresentationEvent::CloseRequested).is_empty());
    }

    #[test]
    fn poll_outcomes_convert_to_events() {
        let reading = Reading::new(90, Trend::Flat);
        assert_eq!(
            PresentationEvent::from(PollOutcome::Updated(reading)),
            PresentationEvent::ReadingUpdated(reading)
        );
        let error = FetchError::Unknown("x".into());
        assert_eq!(
            PresentationEvent::from(PollOutcome::Failed(error.clone())),
            PresentationEvent::FetchFailed(error)
        );
    }
}
