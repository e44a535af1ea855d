/// Playback monitor: one episode = one external renderer process.
///
/// ```text
///   run(command, keys)
///         │
///         ├── spawn renderer (own process group, stdin/stdout/stderr null)
///         └── loop every tick
///                ├── child exited            → Natural(side_effect)
///                ├── terminating key         → SIGTERM group, wait ≤ grace, SIGKILL
///                │                             → Terminated(action, side_effect)
///                ├── non-terminating key     → side_effect = true, keep going
///                └── anything else           → ignored
/// ```
///
/// The loop is cooperative: the key poll doubles as the tick sleep, so a
/// child exit is noticed within one tick and a key immediately.
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sleepy_proto::protocol::PlaybackOutcome;
use sleepy_proto::router::ActionRouter;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::keys::KeySource;

/// Upper bound on the poll interval.
pub const MAX_TICK: Duration = Duration::from_millis(100);

/// A renderer invocation: program plus arguments, content reference last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RenderCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv template such as `["mpv", "--no-video"]`.
    pub fn from_template(template: &[String], content_ref: &str) -> Self {
        let (program, fixed) = match template.split_first() {
            Some((program, rest)) => (program.as_str(), rest),
            None => ("mpv", &[][..]),
        };
        let mut args: Vec<String> = fixed.to_vec();
        args.push(content_ref.to_string());
        Self::new(sleepy_proto::platform::resolve_program(program), args)
    }

    fn spawn(&self) -> io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Keep operator keystrokes and terminal signals away from the child.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
    }
}

impl fmt::Display for RenderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("failed to start {program:?}: {source}")]
pub struct SpawnError {
    pub program: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("keyboard read failed during playback: {0}")]
    Keyboard(#[source] io::Error),
    #[error("failed to query renderer status: {0}")]
    Wait(#[source] io::Error),
}

/// Runs one episode to its outcome.
#[async_trait]
pub trait EpisodeRunner: Send {
    async fn run(
        &mut self,
        command: &RenderCommand,
        keys: &mut dyn KeySource,
    ) -> Result<PlaybackOutcome, MonitorError>;
}

pub struct PlaybackMonitor {
    router: ActionRouter,
    tick: Duration,
    grace: Duration,
}

impl PlaybackMonitor {
    pub fn new(router: ActionRouter, tick: Duration, grace: Duration) -> Self {
        Self {
            router,
            tick: tick.clamp(Duration::from_millis(1), MAX_TICK),
            grace,
        }
    }

    /// SIGTERM, bounded wait, then SIGKILL.
    async fn terminate(&self, child: &mut Child) {
        let Some(pid) = child.id() else {
            // Already reaped.
            return;
        };
        signal_group(pid, Signal::Terminate, child);

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => debug!("renderer pid={} exited: {}", pid, status),
            Ok(Err(e)) => warn!("renderer pid={} wait failed: {}", pid, e),
            Err(_) => {
                warn!(
                    "renderer pid={} did not terminate within {:?}, killing",
                    pid, self.grace
                );
                signal_group(pid, Signal::Kill, child);
                if let Err(e) = child.kill().await {
                    debug!("renderer pid={} kill: {}", pid, e);
                }
            }
        }
    }
}

#[async_trait]
impl EpisodeRunner for PlaybackMonitor {
    async fn run(
        &mut self,
        command: &RenderCommand,
        keys: &mut dyn KeySource,
    ) -> Result<PlaybackOutcome, MonitorError> {
        let mut child = command.spawn().map_err(|source| SpawnError {
            program: command.program.clone(),
            source,
        })?;

        info!(
            "started process: {}. Waiting for keys: {:?}",
            command,
            self.router.terminating_keys()
        );

        let mut side_effect = false;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("renderer finished: {}", status);
                    return Ok(PlaybackOutcome::natural(side_effect));
                }
                Ok(None) => {}
                Err(e) => {
                    self.terminate(&mut child).await;
                    return Err(MonitorError::Wait(e));
                }
            }

            let key = match keys.poll_key(self.tick).await {
                Ok(Some(key)) => key,
                Ok(None) => continue,
                Err(e) => {
                    self.terminate(&mut child).await;
                    return Err(MonitorError::Keyboard(e));
                }
            };

            match self.router.route(key) {
                Some(action) if action.is_terminating() => {
                    info!("key {:?} pressed, terminating process", key);
                    self.terminate(&mut child).await;
                    return Ok(PlaybackOutcome::terminated(action, side_effect));
                }
                Some(action) => {
                    info!("key {:?} pressed, flagged {:?}", key, action);
                    side_effect = true;
                }
                None => debug!("ignoring key {:?} during playback", key),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal, _child: &mut Child) {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // The child leads its own process group, so signal the whole group to
    // reach anything it forked (e.g. mpv helpers).
    let pgid = pid as libc::pid_t;
    unsafe {
        if libc::kill(-pgid, signo) != 0 {
            let _ = libc::kill(pgid, signo);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal, child: &mut Child) {
    let _ = child.start_kill();
}
