//! Append-only log of fetch failures, one file per month.
//!
//! Lines look like `[14:05 03-10-2026] Connection Error: timed out`.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};

use crate::source::FetchError;

pub struct FailureLog {
    dir: PathBuf,
}

impl FailureLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one line for `error` stamped with the local time.
    pub fn record(&self, error: &FetchError) -> Result<PathBuf> {
        self.record_at(error, Local::now().naive_local())
    }

    pub fn record_at(&self, error: &FetchError, now: NaiveDateTime) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create log directory {}", self.dir.display()))?;

        let path = self.file_for(now);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        writeln!(file, "{}", format_entry(error, now))
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(path)
    }

    /// `MM-YYYY-log.txt` inside the log directory.
    pub fn file_for(&self, now: NaiveDateTime) -> PathBuf {
        self.dir.join(format!("{}-log.txt", now.format("%m-%Y")))
    }
}

/// One log line; line breaks inside the message are flattened to spaces.
pub fn format_entry(error: &FetchError, now: NaiveDateTime) -> String {
    let message = error.to_string().replace("\r\n", " ").replace(['\n', '\r'], " ");
    format!(
        "{} {}: {}",
        now.format("[%H:%M %d-%m-%Y]"),
        error.category(),
        message
    )
}
