//! Rendering-facing view of the overlay: size profiles, units, colour classes
//! and the derived [`DisplayState`].

use serde::{Deserialize, Serialize};

use crate::source::{Reading, Trend};

/// Text shown when no reading is available.
pub const NO_READING: &str = "---";

/// mg/dL = MMOL_FACTOR * mmol/L
pub const MMOL_FACTOR: f64 = 18.018;

/// Overlay size selected from the tray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Size {
    #[default]
    Normal,
    Large,
}

impl Size {
    /// Canonical name used in the settings file.
    pub const fn as_str(self) -> &'static str {
        match self {
            Size::Normal => "NORMAL",
            Size::Large => "LARGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NORMAL" => Some(Size::Normal),
            "LARGE" => Some(Size::Large),
            _ => None,
        }
    }

    pub const fn profile(self) -> SizeProfile {
        match self {
            Size::Normal => SizeProfile {
                size: Size::Normal,
                font_glucose: 30,
                font_units: 10,
                icon: 40,
                window: (150, 100),
            },
            Size::Large => SizeProfile {
                size: Size::Large,
                font_glucose: 40,
                font_units: 15,
                icon: 70,
                window: (220, 140),
            },
        }
    }
}

/// Font, icon and window metrics for one [`Size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeProfile {
    pub size: Size,
    pub font_glucose: u16,
    pub font_units: u16,
    pub icon: u16,
    /// Window width and height in pixels.
    pub window: (i32, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    MgDl,
    MmolL,
}

impl Units {
    pub const fn from_mmol_flag(mmol: bool) -> Self {
        if mmol { Units::MmolL } else { Units::MgDl }
    }

    pub const fn is_mmol(self) -> bool {
        matches!(self, Units::MmolL)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Units::MgDl => "mg/dL",
            Units::MmolL => "mmol/L",
        }
    }

    /// Formats a raw mg/dL value in these units.
    pub fn format(self, value: u16) -> String {
        match self {
            Units::MgDl => value.to_string(),
            Units::MmolL => format!("{:.1}", f64::from(value) / MMOL_FACTOR),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColourClass {
    #[default]
    Normal,
    Low,
    High,
}

impl ColourClass {
    /// Classifies a raw mg/dL value. High wins when both thresholds match.
    pub fn classify(value: u16, bottom_threshold: f64, upper_threshold: f64) -> Self {
        let value = f64::from(value);
        if value >= upper_threshold {
            ColourClass::High
        } else if value <= bottom_threshold {
            ColourClass::Low
        } else {
            ColourClass::Normal
        }
    }
}

/// Top-left corner of the overlay in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }
}

/// Geometry of the primary monitor, used to place the overlay in the
/// bottom-right corner above the taskbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: i32,
    pub height: i32,
    pub taskbar_offset: i32,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            taskbar_offset: 40,
        }
    }
}

impl Screen {
    pub const fn default_position(&self, size: Size) -> Position {
        let (width, height) = size.profile().window;
        Position {
            x: self.width - width,
            y: self.height - height - self.taskbar_offset,
        }
    }
}

/// Everything the renderer needs to draw one frame of the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub glucose_text: String,
    pub trend: Trend,
    pub colour: ColourClass,
    pub units: Units,
    pub profile: SizeProfile,
    pub position: Position,
    pub draggable: bool,
}

impl DisplayState {
    /// Derives the view from the latest reading (if any) and the active
    /// thresholds. Deterministic: same inputs, same output.
    pub fn derive(
        reading: Option<&Reading>,
        bottom_threshold: f64,
        upper_threshold: f64,
        units: Units,
        profile: SizeProfile,
        position: Position,
        draggable: bool,
    ) -> Self {
        let (glucose_text, trend, colour) = match reading {
            Some(reading) => (
                units.format(reading.value),
                reading.trend,
                ColourClass::classify(reading.value, bottom_threshold, upper_threshold),
            ),
            None => (NO_READING.to_string(), Trend::None, ColourClass::Normal),
        };

        Self {
            glucose_text,
            trend,
            colour,
            units,
            profile,
            position,
            draggable,
        }
    }

    pub fn trend_code(&self) -> u8 {
        self.trend.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn profiles_match_product_metrics() {
        let normal = Size::Normal.profile();
        assert_eq!(normal.window, (150, 100));
        assert_eq!(normal.font_glucose, 30);
        assert_eq!(normal.font_units, 10);
        assert_eq!(normal.icon, 40);

        let large = Size::Large.profile();
        assert_eq!(large.window, (220, 140));
        assert_eq!(large.font_glucose, 40);
        assert_eq!(large.font_units, 15);
        assert_eq!(large.icon, 70);
    }

    #[test]
    fn size_parse_is_exact() {
        assert_eq!(Size::parse("NORMAL"), Some(Size::Normal));
        assert_eq!(Size::parse("LARGE"), Some(Size::Large));
        assert_eq!(Size::parse("large"), None);
        assert_eq!(Size::parse("HUGE"), None);
    }

    #[test]
    fn mmol_formatting_uses_one_decimal() {
        assert_eq!(Units::MmolL.format(180), "10.0");
        assert_eq!(Units::MmolL.format(100), "5.6");
        assert_eq!(Units::MmolL.format(90), "5.0");
        assert_eq!(Units::MgDl.format(100), "100");
    }

    #[test]
    fn default_position_sits_above_taskbar() {
        let screen = Screen {
            width: 1920,
            height: 1080,
            taskbar_offset: 40,
        };
        assert_eq!(screen.default_position(Size::Normal), Position::new(1770, 940));
        assert_eq!(screen.default_position(Size::Large), Position::new(1700, 900));
    }

    #[test]
    fn missing_reading_shows_placeholder() {
        let state = DisplayState::derive(
            None,
            70.0,
            200.0,
            Units::MgDl,
            Size::Normal.profile(),
            Position::default(),
            false,
        );
        assert_eq!(state.glucose_text, NO_READING);
        assert_eq!(state.trend_code(), 0);
        assert_eq!(state.colour, ColourClass::Normal);
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(ColourClass::classify(70, 70.0, 200.0), ColourClass::Low);
        assert_eq!(ColourClass::classify(200, 70.0, 200.0), ColourClass::High);
        assert_eq!(ColourClass::classify(71, 70.0, 200.0), ColourClass::Normal);
    }

    #[test]
    fn degenerate_thresholds_prefer_high() {
        assert_eq!(ColourClass::classify(120, 120.0, 120.0), ColourClass::High);
    }

    proptest! {
        #[test]
        fn classification_matches_threshold_rules(
            value in 0u16..=600,
            bottom in 0.0f64..400.0,
            gap in 0.0f64..300.0,
        ) {
            let upper = bottom + gap;
            let colour = ColourClass::classify(value, bottom, upper);
            let v = f64::from(value);
            if v >= upper {
                prop_assert_eq!(colour, ColourClass::High);
            } else if v <= bottom {
                prop_assert_eq!(colour, ColourClass::Low);
            } else {
                prop_assert_eq!(colour, ColourClass::Normal);
            }
        }

        #[test]
        fn derived_text_never_placeholder_with_reading(value in 0u16..=600, mmol in any::<bool>()) {
            let reading = Reading::new(value, Trend::Flat);
            let state = DisplayState::derive(
                Some(&reading),
                70.0,
                200.0,
                Units::from_mmol_flag(mmol),
                Size::Normal.profile(),
                Position::default(),
                false,
            );
            prop_assert_ne!(state.glucose_text.as_str(), NO_READING);
            prop_assert_eq!(state.trend_code(), 4);
        }
    }
}
