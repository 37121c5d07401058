//! Tool-owned directories, overridable through the environment.

use std::path::PathBuf;

pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CONCORD_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(dir).join("concord");
    }
    home().join(".config").join("concord")
}

pub fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CONCORD_LOG_DIR") {
        return PathBuf::from(dir);
    }
    config_dir().join("logs")
}

fn home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
