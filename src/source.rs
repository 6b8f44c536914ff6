//! Reading source boundary: the glucose sample type and the closed error set
//! every source maps its failures into.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of the glucose trend as reported by the remote service.
///
/// Wire codes are `0..=7`; anything else is rejected by [`Trend::try_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Trend {
    #[default]
    None,
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
}

impl Trend {
    /// Numeric code used by the renderer to pick an arrow glyph.
    pub const fn code(self) -> u8 {
        match self {
            Trend::None => 0,
            Trend::DoubleUp => 1,
            Trend::SingleUp => 2,
            Trend::FortyFiveUp => 3,
            Trend::Flat => 4,
            Trend::FortyFiveDown => 5,
            Trend::SingleDown => 6,
            Trend::DoubleDown => 7,
        }
    }
}

impl TryFrom<u8> for Trend {
    type Error = FetchError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Trend::None,
            1 => Trend::DoubleUp,
            2 => Trend::SingleUp,
            3 => Trend::FortyFiveUp,
            4 => Trend::Flat,
            5 => Trend::FortyFiveDown,
            6 => Trend::SingleDown,
            7 => Trend::DoubleDown,
            other => {
                return Err(FetchError::Argument(format!(
                    "trend code {other} is outside 0..=7"
                )));
            }
        })
    }
}

impl From<Trend> for u8 {
    fn from(trend: Trend) -> Self {
        trend.code()
    }
}

/// One glucose sample in mg/dL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub value: u16,
    pub trend: Trend,
}

impl Reading {
    pub const fn new(value: u16, trend: Trend) -> Self {
        Self { value, trend }
    }
}

/// Coarse classification used to decide how loudly a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad credentials or an expired session.
    Account,
    /// Malformed request, usually a configuration defect.
    Argument,
    /// Connection problems and timeouts. Always recoverable.
    Transport,
    Unknown,
}

/// Every way a fetch (or connect) can fail.
///
/// Sources convert their native errors into one of these variants once, at
/// the boundary; nothing downstream inspects error types dynamically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Session(String),
    #[error("{0}")]
    Argument(String),
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Request(String),
    #[error("{0}")]
    Unknown(String),
}

impl FetchError {
    /// Human-readable category written to the failure log.
    pub const fn category(&self) -> &'static str {
        match self {
            FetchError::Authentication(_) => "Authentication Error",
            FetchError::Session(_) => "Session Error",
            FetchError::Argument(_) => "Settings Error",
            FetchError::Connection(_) => "Connection Error",
            FetchError::Request(_) => "Request Error",
            FetchError::Unknown(_) => "Unknown Error",
        }
    }

    pub const fn class(&self) -> ErrorClass {
        match self {
            FetchError::Authentication(_) | FetchError::Session(_) => ErrorClass::Account,
            FetchError::Argument(_) => ErrorClass::Argument,
            FetchError::Connection(_) | FetchError::Request(_) => ErrorClass::Transport,
            FetchError::Unknown(_) => ErrorClass::Unknown,
        }
    }
}

/// A connected source of glucose readings.
///
/// Implementations own whatever session state they need; the poller only
/// ever calls [`fetch`](ReadingSource::fetch), one call at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self) -> Result<Reading, FetchError>;

    /// Short name used in log lines.
    fn describe(&self) -> String {
        "reading source".to_string()
    }
}

/// Shared handle to a connected source. Swapped atomically by the poller.
pub type SourceHandle = Arc<dyn ReadingSource>;

impl fmt::Debug for dyn ReadingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
