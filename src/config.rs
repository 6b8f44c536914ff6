//! Settings persistence for the dextop overlay.
//!
//! Loads the YAML settings file, repairs anything missing or invalid back to
//! its default (writing the repaired file straight back), and is the only
//! place that writes the file afterwards.

use crate::display::{Position, Screen, Size, Units};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "DEXTOP_SETTINGS";

/// Validated runtime configuration.
///
/// A snapshot handed to the presentation state and the poller. Changes only
/// ever arrive as a whole new value through a `SettingsChanged` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Minutes between two polls. Always > 0.
    pub interval_minutes: u32,
    pub size: Size,
    pub units: Units,
    /// mg/dL value at or above which the reading is shown as high.
    pub upper_threshold: f64,
    /// mg/dL value at or below which the reading is shown as low.
    pub bottom_threshold: f64,
    /// Use the non-US service region.
    pub europe: bool,
    pub position: Option<Position>,
}

impl Configuration {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            interval_minutes: defaults::interval(),
            size: Size::Normal,
            units: Units::MgDl,
            upper_threshold: defaults::upper_threshold(),
            bottom_threshold: defaults::bottom_threshold(),
            europe: false,
            position: None,
        }
    }
}

/// On-disk layout of the settings file.
///
/// # Example
///
/// ```yaml
/// credentials:
///   login: jane
/// position:
///   x: 1770
///   y: 940
/// settings:
///   interval: 5
///   size: NORMAL
///   europe: false
///   upper_threshold: 200.0
///   bottom_threshold: 70.0
///   mmol: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    pub credentials: CredentialsSection,
    pub position: PositionSection,
    pub settings: SettingsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsSection {
    /// Account login. The password lives in the credential store, never here.
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSection {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSection {
    pub interval: u32,
    pub size: Size,
    pub europe: bool,
    pub upper_threshold: f64,
    pub bottom_threshold: f64,
    pub mmol: bool,
}

impl SettingsFile {
    fn defaults(screen: &Screen) -> Self {
        let position = screen.default_position(Size::Normal);
        Self {
            credentials: CredentialsSection {
                login: String::new(),
            },
            position: PositionSection {
                x: position.x,
                y: position.y,
            },
            settings: SettingsSection {
                interval: defaults::interval(),
                size: Size::Normal,
                europe: false,
                upper_threshold: defaults::upper_threshold(),
                bottom_threshold: defaults::bottom_threshold(),
                mmol: false,
            },
        }
    }

    fn configuration(&self) -> Configuration {
        Configuration {
            interval_minutes: self.settings.interval,
            size: self.settings.size,
            units: Units::from_mmol_flag(self.settings.mmol),
            upper_threshold: self.settings.upper_threshold,
            bottom_threshold: self.settings.bottom_threshold,
            europe: self.settings.europe,
            position: Some(Position::new(self.position.x, self.position.y)),
        }
    }

    fn validate(&self) -> Result<()> {
        let s = &self.settings;
        if s.interval == 0 {
            anyhow::bail!("Reading interval must be a positive number of minutes");
        }
        if !s.upper_threshold.is_finite() || !s.bottom_threshold.is_finite() {
            anyhow::bail!("Thresholds must be finite numbers");
        }
        if s.bottom_threshold >= s.upper_threshold {
            anyhow::bail!(
                "Bottom threshold ({}) must be lower than upper threshold ({})",
                s.bottom_threshold,
                s.upper_threshold
            );
        }
        Ok(())
    }
}

/// Partial update submitted from the settings panel or produced internally
/// (drag release, resize). Only `Some` fields are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub login: Option<String>,
    pub position: Option<Position>,
    pub interval_minutes: Option<u32>,
    pub size: Option<Size>,
    pub europe: Option<bool>,
    pub upper_threshold: Option<f64>,
    pub bottom_threshold: Option<f64>,
    pub mmol: Option<bool>,
}

impl SettingsPatch {
    fn apply_to(&self, file: &mut SettingsFile) {
        if let Some(login) = &self.login {
            file.credentials.login.clone_from(login);
        }
        if let Some(position) = self.position {
            file.position = PositionSection {
                x: position.x,
                y: position.y,
            };
        }
        let s = &mut file.settings;
        if let Some(interval) = self.interval_minutes {
            s.interval = interval;
        }
        if let Some(size) = self.size {
            s.size = size;
        }
        if let Some(europe) = self.europe {
            s.europe = europe;
        }
        if let Some(upper) = self.upper_threshold {
            s.upper_threshold = upper;
        }
        if let Some(bottom) = self.bottom_threshold {
            s.bottom_threshold = bottom;
        }
        if let Some(mmol) = self.mmol {
            s.mmol = mmol;
        }
    }
}

impl From<&Configuration> for SettingsPatch {
    fn from(config: &Configuration) -> Self {
        Self {
            login: None,
            position: config.position,
            interval_minutes: Some(config.interval_minutes),
            size: Some(config.size),
            europe: Some(config.europe),
            upper_threshold: Some(config.upper_threshold),
            bottom_threshold: Some(config.bottom_threshold),
            mmol: Some(config.units.is_mmol()),
        }
    }
}

mod defaults {
    /// Default polling interval in minutes.
    pub fn interval() -> u32 {
        1
    }

    pub fn upper_threshold() -> f64 {
        200.0
    }

    pub fn bottom_threshold() -> f64 {
        70.0
    }
}

/// Finds the settings file path.
///
/// Order: explicit path, `DEXTOP_SETTINGS`, then
/// `$XDG_CONFIG_HOME/dextop/settings.yml` or `~/.config/dextop/settings.yml`.
/// The file itself does not need to exist yet.
pub fn locate_settings(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    if let Ok(env_path) = env::var(SETTINGS_ENV) {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("dextop/settings.yml");
        return Ok(cfg_dir);
    }

    anyhow::bail!("Cannot determine a settings location: set {SETTINGS_ENV} or HOME")
}

/// Owner of the settings file.
///
/// # Example
///
/// ```no_run
/// use dextop::config::{SettingsManager, SettingsPatch};
/// use dextop::display::{Screen, Size};
///
/// # fn example() -> anyhow::Result<()> {
/// let mut settings = SettingsManager::load("settings.yml", Screen::default())?;
/// let interval = settings.configuration().interval_minutes;
///
/// settings.save(SettingsPatch {
///     size: Some(Size::Large),
///     ..Default::default()
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SettingsManager {
    path: PathBuf,
    screen: Screen,
    file: SettingsFile,
}

impl SettingsManager {
    /// Loads and repairs the settings file.
    ///
    /// A missing or unparsable file yields all defaults. Every field that is
    /// missing or invalid is reset to its default, and only then is the
    /// repaired document written back. A valid file is left untouched even
    /// when its formatting differs from ours (`200` versus `200.0`).
    pub fn load(path: impl Into<PathBuf>, screen: Screen) -> Result<Self> {
        let path = path.into();
        info!("Loading settings from: {}", path.display());
        let file = Self::load_and_repair(&path, &screen)?;
        Ok(Self { path, screen, file })
    }

    /// Re-reads the file after an external edit.
    pub fn reload(&mut self) -> Result<Configuration> {
        info!("Reloading settings from: {}", self.path.display());
        self.file = Self::load_and_repair(&self.path, &self.screen)?;
        Ok(self.configuration())
    }

    /// Merges `patch` into the current settings and persists the result.
    ///
    /// Rejects patches that would break an invariant. Nothing is written when
    /// the patch does not change anything.
    pub fn save(&mut self, patch: SettingsPatch) -> Result<Configuration> {
        let mut next = self.file.clone();
        patch.apply_to(&mut next);
        next.validate().context("Rejected settings update")?;

        if next == self.file {
            debug!("Settings unchanged, skipping write");
            return Ok(self.configuration());
        }

        write_atomic(&self.path, &serialize(&next)?)?;
        self.file = next;
        Ok(self.configuration())
    }

    /// Forgets the account after a failed sign-in: clears the login and puts
    /// the region and interval back to their defaults.
    pub fn reset_account(&mut self) -> Result<()> {
        self.save(SettingsPatch {
            login: Some(String::new()),
            europe: Some(false),
            interval_minutes: Some(defaults::interval()),
            ..Default::default()
        })
        .map(|_| ())
    }

    pub fn configuration(&self) -> Configuration {
        self.file.configuration()
    }

    pub fn login(&self) -> &str {
        &self.file.credentials.login
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    fn load_and_repair(path: &Path, screen: &Screen) -> Result<SettingsFile> {
        let on_disk = match fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No settings file at {}, using defaults", path.display());
                None
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read settings file: {}", path.display()));
            }
        };

        let document = match on_disk.as_deref().map(serde_yaml::from_str::<Value>) {
            Some(Ok(document)) => document,
            Some(Err(e)) => {
                warn!(
                    "Settings file {} is not valid YAML ({e}), using defaults",
                    path.display()
                );
                Value::Null
            }
            None => Value::Null,
        };

        let (file, repaired) = repair(&document, screen);
        if repaired {
            info!("Writing repaired settings to {}", path.display());
            write_atomic(path, &serialize(&file)?)?;
        }
        Ok(file)
    }
}

/// Builds a valid [`SettingsFile`] from whatever was parsed, falling back to
/// defaults field by field.
///
/// The flag is `true` when any field was missing, invalid or not in its
/// canonical form, i.e. when the file on disk must be rewritten.
fn repair(document: &Value, screen: &Screen) -> (SettingsFile, bool) {
    let defaults = SettingsFile::defaults(screen);
    let mut fields = FieldReader::default();
    let field = |section: &str, key: &str| document.get(section).and_then(|s| s.get(key));

    let login = fields
        .take("credentials.login", field("credentials", "login"), parse_login)
        .unwrap_or(defaults.credentials.login);

    let s = &defaults.settings;
    let interval = fields
        .take("settings.interval", field("settings", "interval"), parse_interval)
        .unwrap_or(s.interval);
    let size = fields
        .take("settings.size", field("settings", "size"), parse_size)
        .unwrap_or(s.size);
    let europe = fields
        .take("settings.europe", field("settings", "europe"), parse_flag)
        .unwrap_or(s.europe);
    let mmol = fields
        .take("settings.mmol", field("settings", "mmol"), parse_flag)
        .unwrap_or(s.mmol);
    let mut upper = fields
        .take(
            "settings.upper_threshold",
            field("settings", "upper_threshold"),
            parse_number,
        )
        .unwrap_or(s.upper_threshold);
    let mut bottom = fields
        .take(
            "settings.bottom_threshold",
            field("settings", "bottom_threshold"),
            parse_number,
        )
        .unwrap_or(s.bottom_threshold);

    if bottom >= upper {
        warn!(
            "Bottom threshold {bottom} is not below upper threshold {upper}, resetting both to defaults"
        );
        upper = s.upper_threshold;
        bottom = s.bottom_threshold;
        fields.repaired = true;
    }

    let x = fields.take("position.x", field("position", "x"), parse_coordinate);
    let y = fields.take("position.y", field("position", "y"), parse_coordinate);
    let position = match (x, y) {
        (Some(x), Some(y)) => PositionSection { x, y },
        _ => {
            let fallback = screen.default_position(size);
            info!(
                "Using default overlay position ({}, {})",
                fallback.x, fallback.y
            );
            PositionSection {
                x: fallback.x,
                y: fallback.y,
            }
        }
    };

    let file = SettingsFile {
        credentials: CredentialsSection { login },
        position,
        settings: SettingsSection {
            interval,
            size,
            europe,
            upper_threshold: upper,
            bottom_threshold: bottom,
            mmol,
        },
    };
    (file, fields.repaired)
}

#[derive(Default)]
struct FieldReader {
    repaired: bool,
}

impl FieldReader {
    fn take<T: Serialize>(
        &mut self,
        key: &str,
        value: Option<&Value>,
        parse: fn(&Value) -> Option<T>,
    ) -> Option<T> {
        let Some(raw) = value else {
            debug!("Setting {key} missing, using default");
            self.repaired = true;
            return None;
        };

        let Some(parsed) = parse(raw) else {
            warn!("Setting {key} has invalid value {raw:?}, using default");
            self.repaired = true;
            return None;
        };

        if !is_canonical(raw, &parsed) {
            debug!("Setting {key} written as {raw:?}, normalising");
            self.repaired = true;
        }
        Some(parsed)
    }
}

/// Whether `raw` already is the serialized form of `parsed`. Integers and
/// floats with the same value count as equal, so `200` and `200.0` both stay.
fn is_canonical<T: Serialize>(raw: &Value, parsed: &T) -> bool {
    match serde_yaml::to_value(parsed) {
        Ok(Value::Number(n)) => matches!(raw, Value::Number(r) if r.as_f64() == n.as_f64()),
        Ok(value) => value == *raw,
        Err(_) => false,
    }
}

fn parse_login(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn parse_interval(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|minutes| *minutes > 0)
}

fn parse_size(value: &Value) -> Option<Size> {
    value.as_str().and_then(|s| Size::parse(s.trim()))
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

fn parse_coordinate(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn serialize(file: &SettingsFile) -> Result<String> {
    serde_yaml::to_string(file).context("Failed to serialize settings")
}

/// Writes through a temporary file and a rename so readers never observe a
/// half-written settings file.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("yml.tmp");
    fs::write(&tmp_path, content).with_context(|| {
        format!("Failed to write temporary settings to {}", tmp_path.display())
    })?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move settings to {}", path.display()))?;

    info!("Settings saved to: {}", path.display());
    Ok(())
}
