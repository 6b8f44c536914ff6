use clap::Parser;
use std::path::{Path, PathBuf};

use crate::display::Screen;

/// dextop: always-on-top glucose overlay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML settings file (default: $DEXTOP_SETTINGS or ~/.config/dextop/settings.yml)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// Directory for the monthly failure logs (default: <settings dir>/logs)
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// JSON feed file with the latest reading
    #[arg(short = 'f', long = "feed", default_value = "feed.json")]
    pub feed: PathBuf,

    /// Account login; overrides the remembered one and signs in again
    #[arg(short = 'l', long = "login")]
    pub login: Option<String>,

    #[arg(long = "screen-width", default_value_t = Screen::default().width)]
    pub screen_width: i32,

    #[arg(long = "screen-height", default_value_t = Screen::default().height)]
    pub screen_height: i32,

    /// Height reserved for the taskbar at the bottom of the screen
    #[arg(long = "taskbar-offset", default_value_t = Screen::default().taskbar_offset)]
    pub taskbar_offset: i32,

    /// Log to syslog instead of stderr
    #[arg(long = "syslog", default_value = "false")]
    pub syslog: bool,
}

impl Cli {
    pub fn screen(&self) -> Screen {
        Screen {
            width: self.screen_width,
            height: self.screen_height,
            taskbar_offset: self.taskbar_offset,
        }
    }

    /// Explicit `--log-dir`, else `logs` next to the settings file.
    pub fn log_dir(&self, settings_path: &Path) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| default_log_dir(settings_path))
    }
}

pub fn default_log_dir(settings_path: &Path) -> PathBuf {
    settings_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("logs")
}
