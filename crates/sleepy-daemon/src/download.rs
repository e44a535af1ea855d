//! yt-dlp wrapper for saving a played item as audio.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sleepy_proto::config::DownloadsConfig;
use sleepy_proto::platform::resolve_program;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

#[async_trait]
pub trait Downloader: Send {
    async fn download(&mut self, url: &str) -> Result<()>;
}

pub struct YtDlp {
    program: PathBuf,
    dir: PathBuf,
    audio_format: String,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(config: &DownloadsConfig) -> Self {
        Self {
            program: resolve_program("yt-dlp"),
            dir: config.dir.clone(),
            audio_format: config.audio_format.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, url: &str) -> Result<(), String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--extract-audio")
            .arg("--audio-format")
            .arg(&self.audio_format)
            .arg("-P")
            .arg(&self.dir)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn {:?}: {}", self.program, e))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("yt-dlp: {}", line);
                }
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to wait for yt-dlp: {}", e)),
            Err(_) => return Err("Download timed out".to_string()),
        };
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Err(format!("yt-dlp exited with status: {:?}", output.status.code()))
        } else {
            Err(stderr)
        }
    }
}

#[async_trait]
impl Downloader for YtDlp {
    async fn download(&mut self, url: &str) -> Result<()> {
        info!("Downloading video: {}", url);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create download directory {:?}", self.dir))?;

        match self.run(url).await {
            Ok(()) => {
                info!("Video downloaded successfully");
                Ok(())
            }
            Err(reason) => {
                error!("Video download failed: {}", reason);
                if let Err(e) = write_failure_log(&self.dir, url, &reason).await {
                    error!("Failed to write download failure log: {}", e);
                }
                anyhow::bail!("download of {} failed: {}", url, reason)
            }
        }
    }
}

/// Drops a `download_failed_<timestamp>.log` next to the downloads.
async fn write_failure_log(dir: &Path, url: &str, reason: &str) -> Result<PathBuf> {
    let now = chrono::Local::now();
    let path = dir.join(format!("download_failed_{}.log", now.format("%Y%m%d_%H%M%S")));
    let body = format!(
        "URL: {}\nReason: {}\nTimestamp: {}\n",
        url,
        reason,
        now.to_rfc3339()
    );
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Download failure logged to {:?}", path);
    Ok(path)
}
