//! Application wiring and builder.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow};
use log::info;

use crate::{
    cli::default_log_dir,
    config::SettingsManager,
    credentials::{CredentialStore, MemoryCredentialStore},
    event::EventSender,
    failure_log::FailureLog,
    router::{EventRouter, LogRenderer, Renderer},
    setup::{self, Authenticator, Credentials, SetupError, SignInRequest},
};

/// Environment variable the binary reads the account password from.
pub const PASSWORD_ENV: &str = "DEXTOP_PASSWORD";

/// Signed-in overlay ready to run.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use dextop::{application::Application, config::SettingsManager, display::Screen};
/// use dextop::reading_sources::FeedAuthenticator;
///
/// # async fn example() -> anyhow::Result<()> {
/// let settings = SettingsManager::load("settings.yml", Screen::default())?;
/// let mut app = Application::builder()
///     .with_settings(settings)
///     .with_authenticator(Arc::new(FeedAuthenticator::new("feed.json")))
///     .with_login(Some("jane".into()))
///     .build()
///     .await?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    router: EventRouter,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Producer handle for a tray or settings panel.
    pub fn sender(&self) -> EventSender {
        self.router.sender()
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Runs the overlay until it is closed.
    pub async fn run(&mut self) -> Result<()> {
        self.router.run().await
    }
}

pub struct ApplicationBuilder {
    settings: Option<SettingsManager>,
    authenticator: Option<Arc<dyn Authenticator>>,
    credential_store: Arc<dyn CredentialStore>,
    renderer: Box<dyn Renderer>,
    login: Option<String>,
    log_dir: Option<PathBuf>,
    watch_settings: bool,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            settings: None,
            authenticator: None,
            credential_store: Arc::new(MemoryCredentialStore::new()),
            renderer: Box::new(LogRenderer),
            login: None,
            log_dir: None,
            watch_settings: false,
        }
    }

    pub fn with_settings(mut self, settings: SettingsManager) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = store;
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Signs in as `login` instead of the remembered account.
    pub fn with_login(mut self, login: Option<String>) -> Self {
        self.login = login;
        self
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    /// Reload settings when the file is edited by hand.
    pub fn watch_settings(mut self, enabled: bool) -> Self {
        self.watch_settings = enabled;
        self
    }

    /// Signs in and assembles the router.
    ///
    /// A failed sign-in resets the remembered account before the error is
    /// returned.
    pub async fn build(self) -> Result<Application, SetupError> {
        let mut settings = self
            .settings
            .ok_or_else(|| anyhow!("Settings are required"))?;
        let authenticator = self
            .authenticator
            .ok_or_else(|| anyhow!("An authenticator is required"))?;

        let credentials = match self.login {
            Some(login) => {
                let password = self.credential_store.get(&login)?.unwrap_or_default();
                Credentials { login, password }
            }
            None => setup::stored_credentials(&settings, self.credential_store.as_ref())
                .ok_or(SetupError::MissingCredentials)?,
        };

        let config = settings.configuration();
        let connected = setup::sign_in(
            authenticator,
            self.credential_store.as_ref(),
            &mut settings,
            SignInRequest {
                credentials,
                europe: config.europe,
                interval_minutes: Some(config.interval_minutes),
            },
        )
        .await?;
        info!("Signed in as {}", connected.session.login());

        let log_dir = self
            .log_dir
            .unwrap_or_else(|| default_log_dir(settings.path()));
        info!("Failure log directory: {}", log_dir.display());

        let mut router = EventRouter::new(
            settings,
            FailureLog::new(log_dir),
            connected.source,
            self.renderer,
        )
        .with_session(connected.session);
        if self.watch_settings {
            router.watch_settings();
        }

        Ok(Application { router })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        display::{NO_READING, Screen},
        presentation::PresentationEvent,
        reading_sources::FeedAuthenticator,
        setup::MockAuthenticator,
        source::FetchError,
    };
    use std::fs;
    use tempfile::TempDir;

    struct Env {
        dir: TempDir,
    }

    impl Env {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("feed.json"), r#"{"value": 111, "trend": 4}"#).unwrap();
            Self { dir }
        }

        fn settings(&self) -> SettingsManager {
            SettingsManager::load(self.dir.path().join("settings.yml"), Screen::default())
                .unwrap()
        }

        fn authenticator(&self) -> Arc<dyn Authenticator> {
            Arc::new(FeedAuthenticator::new(self.dir.path().join("feed.json")))
        }
    }

    #[tokio::test]
    async fn builds_and_remembers_login() {
        let env = Env::new();
        let store = Arc::new(MemoryCredentialStore::with_secret("jane", "pw"));

        let app = Application::builder()
            .with_settings(env.settings())
            .with_authenticator(env.authenticator())
            .with_credential_store(store.clone())
            .with_login(Some("jane".into()))
            .build()
            .await
            .unwrap();

        assert_eq!(app.router().settings().login(), "jane");
        assert_eq!(app.router().state().display().glucose_text, NO_READING);
        assert!(!app.sender().is_closed());
        assert_eq!(env.settings().login(), "jane");
    }

    #[tokio::test]
    async fn remembered_account_signs_in_without_login_flag() {
        let env = Env::new();
        let store = Arc::new(MemoryCredentialStore::with_secret("jane", "pw"));
        Application::builder()
            .with_settings(env.settings())
            .with_authenticator(env.authenticator())
            .with_credential_store(store.clone())
            .with_login(Some("jane".into()))
            .build()
            .await
            .unwrap();

        let app = Application::builder()
            .with_settings(env.settings())
            .with_authenticator(env.authenticator())
            .with_credential_store(store)
            .build()
            .await;

        assert!(app.is_ok());
    }

    #[tokio::test]
    async fn no_account_is_a_setup_error() {
        let env = Env::new();

        let err = Application::builder()
            .with_settings(env.settings())
            .with_authenticator(env.authenticator())
            .build()
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SetupError::MissingCredentials));
    }

    #[tokio::test]
    async fn missing_settings_is_a_settings_error() {
        let env = Env::new();
        let err = Application::builder()
            .with_authenticator(env.authenticator())
            .build()
            .await
            .err()
            .unwrap();
        assert_eq!(err.title(), "Settings Error");
    }

    #[tokio::test]
    async fn failed_sign_in_resets_account_and_reports_title() {
        let env = Env::new();
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_connect()
            .returning(|_, _| Err(FetchError::Session("expired".into())));

        let err = Application::builder()
            .with_settings(env.settings())
            .with_authenticator(Arc::new(authenticator))
            .with_login(Some("jane".into()))
            .build()
            .await
            .err()
            .unwrap();

        assert_eq!(err.title(), "Session Error");
        assert_eq!(env.settings().login(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn run_ends_on_close_request() {
        let env = Env::new();
        let mut app = Application::builder()
            .with_settings(env.settings())
            .with_authenticator(env.authenticator())
            .with_login(Some("jane".into()))
            .with_log_dir(Some(env.dir.path().join("custom-logs")))
            .build()
            .await
            .unwrap();

        app.sender()
            .publish(PresentationEvent::CloseRequested.into())
            .unwrap();
        app.run().await.unwrap();

        assert!(app.router().is_closed());
    }
}
