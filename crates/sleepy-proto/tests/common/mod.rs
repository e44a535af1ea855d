#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// A bedside setup: two remote playlists, one local folder.
pub const APPLIANCE_CONFIG: &str = r#"
log_level = "debug"

[audio]
sound_dir = "/opt/sleepy/sounds"
volume_percent = 65

[renderer]
remote = ["mpv", "--no-video", "--volume=70"]
tick_ms = 50

[power]
delay_secs = 90

[playlists.0]
name = "Rain"
id = "PLrainrainrain"
randomize = true

[playlists.1]
name = "Stories"
locator = "youtube:PLstories"
delete_after_play = true
shutdown_after_play = true
download_after_play = true

[playlists.2]
name = "Downloads"
locator = "~/sleepy-downloads"
sequential = true
delete_after_play = true
"#;

pub fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, content).expect("write config fixture");
    path
}
