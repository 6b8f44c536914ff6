//! Sign-in flow run before the overlay exists.
//!
//! This is the one place where errors are shown to the user synchronously:
//! a failed sign-in resets the stored account and is returned to the caller
//! instead of being logged and swallowed like polling failures.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use thiserror::Error;

use crate::{
    config::{SettingsManager, SettingsPatch},
    credentials::CredentialStore,
    source::{FetchError, SourceHandle},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Turns credentials into a connected [`SourceHandle`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
        europe: bool,
    ) -> Result<SourceHandle, FetchError>;
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0}")]
    SignIn(FetchError),
    #[error("no stored account, pass --login or set DEXTOP_PASSWORD")]
    MissingCredentials,
    #[error("{0:#}")]
    Settings(#[from] anyhow::Error),
}

impl SetupError {
    /// Title for the message shown to the user.
    pub fn title(&self) -> &'static str {
        match self {
            SetupError::SignIn(e) => e.category(),
            SetupError::MissingCredentials => "Setup Error",
            SetupError::Settings(_) => "Settings Error",
        }
    }
}

/// What the user submitted in the setup window.
#[derive(Debug, Clone)]
pub struct SignInRequest {
    pub credentials: Credentials,
    pub europe: bool,
    pub interval_minutes: Option<u32>,
}

/// Signed-in account able to produce new source handles, e.g. after the
/// region changes.
pub struct Session {
    authenticator: Arc<dyn Authenticator>,
    credentials: Credentials,
}

impl Session {
    pub fn login(&self) -> &str {
        &self.credentials.login
    }

    pub async fn reconnect(&self, europe: bool) -> Result<SourceHandle, FetchError> {
        info!(
            "Reconnecting {} ({} region)",
            self.credentials.login,
            region_name(europe)
        );
        self.authenticator.connect(&self.credentials, europe).await
    }
}

pub struct Connected {
    pub source: SourceHandle,
    pub session: Session,
}

/// Returns the remembered login and its password, if both exist.
pub fn stored_credentials(
    settings: &SettingsManager,
    store: &dyn CredentialStore,
) -> Option<Credentials> {
    let login = settings.login();
    if login.is_empty() {
        return None;
    }

    match store.get(login) {
        Ok(Some(password)) if !password.is_empty() => Some(Credentials {
            login: login.to_string(),
            password,
        }),
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to read stored password for {login}: {e}");
            None
        }
    }
}

/// Signs in and, on success, remembers the account.
///
/// On failure the account settings are reset so the next start asks again,
/// and the error is returned for display.
pub async fn sign_in(
    authenticator: Arc<dyn Authenticator>,
    store: &dyn CredentialStore,
    settings: &mut SettingsManager,
    request: SignInRequest,
) -> Result<Connected, SetupError> {
    let SignInRequest {
        credentials,
        europe,
        interval_minutes,
    } = request;
    info!(
        "Signing in as {} ({} region)",
        credentials.login,
        region_name(europe)
    );

    let source = match authenticator.connect(&credentials, europe).await {
        Ok(source) => source,
        Err(e) => {
            error!("{}: {e}", e.category());
            if let Err(reset) = settings.reset_account() {
                error!("Failed to reset account settings: {reset:#}");
            }
            return Err(SetupError::SignIn(e));
        }
    };

    settings.save(SettingsPatch {
        login: Some(credentials.login.clone()),
        europe: Some(europe),
        interval_minutes,
        ..Default::default()
    })?;
    store.set(&credentials.login, &credentials.password)?;

    Ok(Connected {
        source,
        session: Session {
            authenticator,
            credentials,
        },
    })
}

fn region_name(europe: bool) -> &'static str {
    if europe { "EU" } else { "US" }
}
