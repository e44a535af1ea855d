use std::path::{Path, PathBuf};

const APP_DIR: &str = "sleepy";

pub fn data_dir() -> PathBuf {
    // Use ~/.local/share/sleepy/ (XDG standard) on every unix, including macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("sleepy.log")
}

fn find_beside_exe(name: &str) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    let p = dir.join(name);
    if p.is_file() {
        return Some(p);
    }
    let p = dir.join("external").join(name);
    if p.is_file() {
        return Some(p);
    }
    None
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Resolve an external program (renderer, cue player, yt-dlp, ...).
///
/// Names containing a path separator are taken as-is.  Otherwise searches
/// beside the current executable, then PATH.  Falls back to the bare name
/// so that a missing binary surfaces as a spawn error at the call site.
pub fn resolve_program(name: &str) -> PathBuf {
    if Path::new(name).components().count() > 1 {
        return PathBuf::from(name);
    }
    find_beside_exe(name)
        .or_else(|| find_on_path(name))
        .unwrap_or_else(|| PathBuf::from(name))
}
