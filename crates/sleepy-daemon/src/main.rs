mod audio;
mod controller;
mod download;
mod keys;
mod monitor;
mod power;
mod source;
mod youtube;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sleepy_proto::config::Config;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::audio::AplayCues;
use crate::controller::{Collaborators, Controller, ControllerSettings};
use crate::download::YtDlp;
use crate::keys::TerminalKeys;
use crate::monitor::PlaybackMonitor;
use crate::power::SystemPower;
use crate::source::LocalSource;
use crate::youtube::YoutubeConnector;

/// File log plus, when not attached to a terminal, stdout for the service
/// journal.  Writing to a raw-mode terminal would garble it.
fn init_logging(level: &str) -> anyhow::Result<PathBuf> {
    let log_path = sleepy_proto::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stdout_layer = (!std::io::stdout().is_terminal()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("{},hyper=warn,reqwest=warn", level))
            }),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    let log_path = init_logging(&config.log_level)?;
    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());

    let router = config.router()?;
    let playlists = config.playlists(&router);

    audio::set_system_volume(&config.audio).await;

    let episodes = PlaybackMonitor::new(
        router.clone(),
        Duration::from_millis(config.renderer.tick_ms),
        Duration::from_secs(config.renderer.grace_secs),
    );
    let collaborators = Collaborators {
        keys: Box::new(TerminalKeys),
        episodes: Box::new(episodes),
        cues: Box::new(AplayCues::new(&config.audio)),
        remote: Box::new(YoutubeConnector::new(config.youtube.clone())),
        local: Arc::new(LocalSource::new()),
        downloader: Box::new(YtDlp::new(&config.downloads)),
        power: Box::new(SystemPower::new(&config.power)),
    };

    let mut controller = Controller::new(
        playlists,
        router,
        ControllerSettings::from_config(&config),
        collaborators,
    );
    controller.run().await?;
    info!("Session states: {:?}", controller.context().history());

    Ok(())
}
