//! Reading source backed by a small JSON document on disk.
//!
//! Any external uploader can keep `{"value": 123, "trend": 4}` up to date;
//! each fetch re-reads the file.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::{
    setup::{Authenticator, Credentials},
    source::{FetchError, Reading, ReadingSource, SourceHandle, Trend},
};

#[derive(Debug, Deserialize)]
struct FeedDocument {
    value: u16,
    trend: u8,
}

pub struct FeedFileSource {
    path: PathBuf,
    europe: bool,
}

impl FeedFileSource {
    pub fn new(path: impl Into<PathBuf>, europe: bool) -> Self {
        Self {
            path: path.into(),
            europe,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_europe(&self) -> bool {
        self.europe
    }
}

fn parse_feed(content: &str) -> Result<Reading, FetchError> {
    let doc: FeedDocument = serde_json::from_str(content)
        .map_err(|e| FetchError::Request(format!("malformed feed document: {e}")))?;
    Ok(Reading::new(doc.value, Trend::try_from(doc.trend)?))
}

#[async_trait]
impl ReadingSource for FeedFileSource {
    async fn fetch(&self) -> Result<Reading, FetchError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            FetchError::Connection(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let reading = parse_feed(&content)?;
        debug!("{}: {reading:?}", self.describe());
        Ok(reading)
    }

    fn describe(&self) -> String {
        format!("feed:{}", self.path.display())
    }
}

/// Hands out [`FeedFileSource`]s for one feed path.
#[derive(Debug, Clone)]
pub struct FeedAuthenticator {
    feed: PathBuf,
}

impl FeedAuthenticator {
    pub fn new(feed: impl Into<PathBuf>) -> Self {
        Self { feed: feed.into() }
    }
}

#[async_trait]
impl Authenticator for FeedAuthenticator {
    async fn connect(
        &self,
        credentials: &Credentials,
        europe: bool,
    ) -> Result<SourceHandle, FetchError> {
        if credentials.login.trim().is_empty() {
            return Err(FetchError::Authentication("login must not be empty".into()));
        }

        match tokio::fs::metadata(&self.feed).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(FetchError::Connection(format!(
                    "{} is not a file",
                    self.feed.display()
                )));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchError::Connection(format!(
                    "feed {} does not exist",
                    self.feed.display()
                )));
            }
            Err(e) => {
                return Err(FetchError::Connection(format!(
                    "cannot access {}: {e}",
                    self.feed.display()
                )));
            }
        }

        Ok(Arc::new(FeedFileSource::new(&self.feed, europe)))
    }
}
