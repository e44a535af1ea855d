//! OS power-off.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use sleepy_proto::config::PowerConfig;
use sleepy_proto::platform::resolve_program;
use tokio::process::Command;
use tracing::{info, warn};

/// Fire-and-forget shutdown request.
pub trait PowerControl: Send {
    fn shutdown(&mut self, delay: Duration) -> Result<()>;
}

/// Runs e.g. `sudo shutdown -h +N`.
pub struct SystemPower {
    command: Vec<String>,
}

impl SystemPower {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }

    fn argv(&self, delay: Duration) -> Result<(String, Vec<String>)> {
        let (program, fixed) = self
            .command
            .split_first()
            .context("power command is empty")?;
        let mut args = fixed.to_vec();
        args.push(format!("+{}", delay_minutes(delay)));
        Ok((program.clone(), args))
    }
}

/// `shutdown` takes whole minutes; round up so the delay is never shortened.
fn delay_minutes(delay: Duration) -> u64 {
    delay.as_secs().div_ceil(60)
}

impl PowerControl for SystemPower {
    fn shutdown(&mut self, delay: Duration) -> Result<()> {
        let (program, args) = self.argv(delay)?;
        let mut child = Command::new(resolve_program(&program))
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Shutdown command {:?} failed to start", program))?;
        info!("Shutdown requested: {} {}", program, args.join(" "));

        // Reap in the background; the request itself is not awaited.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("shutdown command exited with {}", status),
                Err(e) => warn!("failed to wait for shutdown command: {}", e),
            }
        });
        Ok(())
    }
}
