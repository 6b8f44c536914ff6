use std::{env, process::ExitCode, sync::Arc};

use anyhow::{Result, anyhow};
use clap::Parser;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use dextop::{
    application::{Application, PASSWORD_ENV},
    cli::Cli,
    config::{self, SettingsManager},
    credentials::MemoryCredentialStore,
    reading_sources::FeedAuthenticator,
    setup::SetupError,
};

fn init_syslog() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "dextop".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn init_log(use_syslog: bool) {
    if use_syslog {
        match init_syslog() {
            Ok(()) => return,
            Err(e) => eprintln!("syslog unavailable ({e}), logging to stderr"),
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

async fn build(cli: &Cli) -> Result<Application, SetupError> {
    let settings_path = config::locate_settings(cli.settings.clone())?;
    let settings = SettingsManager::load(&settings_path, cli.screen())?;

    let login = cli
        .login
        .clone()
        .unwrap_or_else(|| settings.login().to_string());
    let store = match env::var(PASSWORD_ENV) {
        Ok(password) => MemoryCredentialStore::with_secret(&login, &password),
        Err(_) => MemoryCredentialStore::new(),
    };

    Application::builder()
        .with_settings(settings)
        .with_authenticator(Arc::new(FeedAuthenticator::new(&cli.feed)))
        .with_credential_store(Arc::new(store))
        .with_login(cli.login.clone())
        .with_log_dir(Some(cli.log_dir(&settings_path)))
        .watch_settings(true)
        .build()
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_log(cli.syslog);
    info!("Starting dextop v{}", env!("CARGO_PKG_VERSION"));

    let mut app = match build(&cli).await {
        Ok(app) => app,
        Err(e) => {
            error!("{}: {e}", e.title());
            eprintln!("{}: {e}", e.title());
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
