use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use super::platform;
use crate::protocol::{Action, PlaylistConfig};
use crate::router::ActionRouter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialise config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("key {key:?} bound to both {first:?} and {second:?}")]
    DuplicateKey {
        key: char,
        first: Action,
        second: Action,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default tracing verbosity; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    /// Selector key -> queue definition.
    #[serde(default)]
    pub playlists: BTreeMap<String, PlaylistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Directory holding the `<cue>.wav` files.
    #[serde(default = "default_sound_dir")]
    pub sound_dir: PathBuf,
    #[serde(default = "default_cue_player")]
    pub cue_player: String,
    /// ALSA mixer control adjusted at startup.
    #[serde(default = "default_mixer_control")]
    pub mixer_control: String,
    #[serde(default = "default_volume_percent")]
    pub volume_percent: u8,
}

/// argv templates for the external renderer; the content reference is
/// appended as the last argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_remote_renderer")]
    pub remote: Vec<String>,
    #[serde(default = "default_local_renderer")]
    pub local: Vec<String>,
    /// Key/liveness poll interval, capped at 100 ms.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// How long a terminated renderer may take to exit before SIGKILL.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_shutdown_key")]
    pub shutdown: char,
    #[serde(default = "default_quit_key")]
    pub quit: char,
    #[serde(default = "default_reselect_key")]
    pub reselect: char,
    #[serde(default = "default_skip_key")]
    pub skip: char,
    /// Non-terminating keys that flag the current item for download.
    #[serde(default = "default_flag_download_keys")]
    pub flag_download: Vec<char>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    /// Google client secrets JSON.  The OAuth client must be of the
    /// "TVs and Limited Input devices" type for the device flow.
    #[serde(default = "default_client_secrets")]
    pub client_secrets: PathBuf,
    /// Persisted OAuth token.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_device_code_url")]
    pub device_code_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_power_command")]
    pub command: Vec<String>,
    #[serde(default = "default_power_delay_secs")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_downloads_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

/// One `[playlists.<key>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Remote playlist id or local directory.
    #[serde(default, alias = "id")]
    pub locator: String,
    #[serde(default)]
    pub randomize: bool,
    #[serde(default)]
    pub delete_after_play: bool,
    #[serde(default)]
    pub shutdown_after_play: bool,
    #[serde(default)]
    pub download_after_play: bool,
    #[serde(default)]
    pub sequential: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sound_dir: default_sound_dir(),
            cue_player: default_cue_player(),
            mixer_control: default_mixer_control(),
            volume_percent: default_volume_percent(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            remote: default_remote_renderer(),
            local: default_local_renderer(),
            tick_ms: default_tick_ms(),
            grace_secs: default_grace_secs(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            shutdown: default_shutdown_key(),
            quit: default_quit_key(),
            reselect: default_reselect_key(),
            skip: default_skip_key(),
            flag_download: default_flag_download_keys(),
        }
    }
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            client_secrets: default_client_secrets(),
            token_file: default_token_file(),
            api_base: default_api_base(),
            device_code_url: default_device_code_url(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            command: default_power_command(),
            delay_secs: default_power_delay_secs(),
        }
    }
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: default_downloads_dir(),
            audio_format: default_audio_format(),
            timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sound_dir() -> PathBuf {
    PathBuf::from("./sounds")
}

fn default_cue_player() -> String {
    "aplay".to_string()
}

fn default_mixer_control() -> String {
    "Master".to_string()
}

fn default_volume_percent() -> u8 {
    80
}

fn default_remote_renderer() -> Vec<String> {
    vec!["mpv".to_string(), "--no-video".to_string()]
}

fn default_local_renderer() -> Vec<String> {
    vec!["aplay".to_string()]
}

fn default_tick_ms() -> u64 {
    100
}

fn default_grace_secs() -> u64 {
    5
}

fn default_shutdown_key() -> char {
    '*'
}

fn default_quit_key() -> char {
    '/'
}

fn default_reselect_key() -> char {
    '-'
}

fn default_skip_key() -> char {
    '+'
}

fn default_flag_download_keys() -> Vec<char> {
    vec!['.']
}

fn default_client_secrets() -> PathBuf {
    platform::config_dir().join("cred.json")
}

fn default_token_file() -> PathBuf {
    platform::data_dir().join("token.json")
}

fn default_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_device_code_url() -> String {
    "https://oauth2.googleapis.com/device/code".to_string()
}

fn default_power_command() -> Vec<String> {
    vec!["sudo".to_string(), "shutdown".to_string(), "-h".to_string()]
}

fn default_power_delay_secs() -> u64 {
    60
}

fn default_downloads_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sleepy-downloads")
}

fn default_audio_format() -> String {
    "wav".to_string()
}

fn default_download_timeout_secs() -> u64 {
    300
}

impl Config {
    /// Load the config file, writing a default one when none exists yet.
    /// A missing or empty file yields an empty playlist table; a malformed
    /// one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                warn!("could not write default config: {}", e);
            }
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `$SLEEPY_CONFIG`, else `<config_dir>/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(p) = std::env::var("SLEEPY_CONFIG") {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        platform::config_dir().join("config.toml")
    }

    pub fn router(&self) -> Result<ActionRouter, ConfigError> {
        ActionRouter::new(&self.keys)
    }

    /// Validated selector table.  Entries without a locator, with a selector
    /// that is not a single character, or whose selector is a reserved key
    /// are dropped with a warning.
    pub fn playlists(&self, router: &ActionRouter) -> BTreeMap<char, PlaylistConfig> {
        let mut table = BTreeMap::new();
        for (key, entry) in &self.playlists {
            let mut chars = key.chars();
            let selector = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    warn!("playlist '{}': selector must be a single key, skipping", key);
                    continue;
                }
            };
            if router.is_reserved(selector) {
                warn!("playlist '{}': selector is a reserved key, skipping", key);
                continue;
            }
            if entry.locator.trim().is_empty() {
                warn!("playlist '{}' has no id, skipping", key);
                continue;
            }
            table.insert(
                selector,
                PlaylistConfig {
                    key: key.clone(),
                    name: entry
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Playlist {}", key)),
                    locator: entry.locator.trim().to_string(),
                    randomize: entry.randomize,
                    delete_after_play: entry.delete_after_play,
                    shutdown_after_play: entry.shutdown_after_play,
                    download_after_play: entry.download_after_play,
                    sequential: entry.sequential,
                },
            );
        }
        info!("configuration has {} playlists", table.len());
        table
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            audio: AudioConfig::default(),
            renderer: RendererConfig::default(),
            keys: KeysConfig::default(),
            youtube: YoutubeConfig::default(),
            power: PowerConfig::default(),
            downloads: DownloadsConfig::default(),
            playlists: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.renderer.grace_secs, 5);
        assert_eq!(config.renderer.tick_ms, 100);
        assert_eq!(config.renderer.remote, vec!["mpv", "--no-video"]);
        assert_eq!(config.audio.volume_percent, 80);
        assert!(config.youtube.token_file.ends_with("sleepy/token.json"));
        assert!(config.playlists.is_empty());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::parse("").unwrap();
        assert!(config.playlists.is_empty());
        assert_eq!(config.keys, KeysConfig::default());
    }

    #[test]
    fn test_playlist_table_validation() {
        let config = Config::parse(
            r#"
            log_level = "debug"

            [playlists.0]
            name = "Rain"
            id = "PLrain"
            delete_after_play = true

            [playlists.1]
            locator = "./asmr"
            randomize = true
            shutdown_after_play = true

            [playlists.2]
            name = "No id"

            [playlists."*"]
            locator = "PLclash"

            [playlists.10]
            locator = "PLlong"
            "#,
        )
        .unwrap();
        let router = config.router().unwrap();
        let table = config.playlists(&router);

        assert_eq!(table.len(), 2);
        let rain = &table[&'0'];
        assert_eq!(rain.name, "Rain");
        assert_eq!(rain.locator, "PLrain");
        assert!(rain.delete_after_play);
        assert!(!rain.randomize);

        let local = &table[&'1'];
        assert_eq!(local.name, "Playlist 1");
        assert!(local.source_kind().is_local());
        assert!(local.shutdown_after_play);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[playlists.0\nname = ").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.playlists.insert(
            "3".to_string(),
            PlaylistEntry {
                locator: "PLthree".to_string(),
                ..PlaylistEntry::default()
            },
        );
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.playlists["3"].locator, "PLthree");
    }
}
