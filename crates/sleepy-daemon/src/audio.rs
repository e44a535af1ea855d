//! Audible feedback: short WAV cues and the startup mixer level.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use sleepy_proto::config::AudioConfig;
use sleepy_proto::platform::resolve_program;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::monitor::RenderCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// Process started.
    Up,
    /// Select prompt.
    Ping,
    Ok,
    Error,
    /// Played before an automatic power-off; cancellable.
    Wait,
    Shutdown,
    /// Process exiting.
    Down,
}

impl Cue {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Up => "up.wav",
            Self::Ping => "ping.wav",
            Self::Ok => "ok.wav",
            Self::Error => "error.wav",
            Self::Wait => "wait.wav",
            Self::Shutdown => "shutdown.wav",
            Self::Down => "down.wav",
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name().trim_end_matches(".wav"))
    }
}

#[async_trait]
pub trait CuePlayer: Send {
    /// Plays a cue to completion.  Failures are logged, never returned.
    async fn play(&mut self, cue: Cue);

    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;

    /// Command for playing `cue` as a cancellable episode.
    fn episode_command(&self, cue: Cue) -> RenderCommand;
}

/// Plays cues from `sound_dir` through `aplay` (or the configured player).
pub struct AplayCues {
    program: PathBuf,
    sound_dir: PathBuf,
    muted: bool,
}

impl AplayCues {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            program: resolve_program(&config.cue_player),
            sound_dir: config.sound_dir.clone(),
            muted: false,
        }
    }

    fn cue_path(&self, cue: Cue) -> PathBuf {
        self.sound_dir.join(cue.file_name())
    }
}

#[async_trait]
impl CuePlayer for AplayCues {
    async fn play(&mut self, cue: Cue) {
        if self.muted {
            debug!("muted, skipping cue {}", cue);
            return;
        }
        let path = self.cue_path(cue);
        let status = Command::new(&self.program)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => debug!("played cue {}", cue),
            Ok(status) => warn!("cue player exited with {} for {:?}", status, path),
            Err(e) => error!("failed to play sound {:?} with {:?}: {}", path, self.program, e),
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn episode_command(&self, cue: Cue) -> RenderCommand {
        RenderCommand::new(
            self.program.clone(),
            vec![self.cue_path(cue).to_string_lossy().into_owned()],
        )
    }
}

/// Sets the ALSA mixer level once at startup.  Best effort.
pub async fn set_system_volume(config: &AudioConfig) {
    let level = format!("{}%", config.volume_percent.min(100));
    let status = Command::new(resolve_program("amixer"))
        .args(["sset", config.mixer_control.as_str(), level.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => info!("System volume set to {}", level),
        Ok(status) => warn!("amixer exited with {}", status),
        Err(e) => warn!("Failed to set system volume: {}", e),
    }
}
