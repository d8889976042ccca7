//! Configuration: directory discovery, the `brine.toml` editor options, the
//! `fish_color_*` theme, and the immutable environment snapshot the worker
//! passes consume.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

pub mod colors;
pub mod snapshot;

pub use colors::{ColorSpec, Theme, parse_color_spec};
pub use snapshot::EnvSnapshot;

/// Configuration directory: `$XDG_CONFIG_HOME/fish`, else
/// `$HOME/.config/fish`, else the platform config dir. Created on demand by
/// callers that write into it.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("fish");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".config").join("fish");
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fish")
}

/// Runtime directory holding the canonical universal-variable socket.
pub fn runtime_dir() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir(),
    }
}

/// Canonical universal-variable socket path.
pub fn socket_path() -> PathBuf {
    runtime_dir().join("fishd.socket")
}

/// Directory for the legacy per-user socket link. `FISHD_SOCKET_DIR`
/// overrides; the default is the system temporary directory.
pub fn legacy_socket_dir() -> PathBuf {
    match std::env::var("FISHD_SOCKET_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir(),
    }
}

/// Legacy socket path kept hard-linked for older clients.
pub fn legacy_socket_path() -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    legacy_socket_dir().join(format!("fishd.socket.{user}"))
}

/// Backing file for a named history session.
pub fn history_file(session: &str) -> PathBuf {
    config_dir().join(format!("{session}_history"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditorConfig {
    /// External candidate pager; `None` selects the built-in default.
    #[serde(default)]
    pub pager_command: Option<String>,
    #[serde(default = "EditorConfig::default_autosuggest")]
    pub autosuggest: bool,
    /// New-item count that triggers a history save.
    #[serde(default = "EditorConfig::default_history_save_count")]
    pub history_save_count: usize,
    /// Seconds between forced history saves.
    #[serde(default = "EditorConfig::default_history_save_interval")]
    pub history_save_interval_secs: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        EditorConfig {
            pager_command: None,
            autosuggest: Self::default_autosuggest(),
            history_save_count: Self::default_history_save_count(),
            history_save_interval_secs: Self::default_history_save_interval(),
        }
    }
}

impl EditorConfig {
    const fn default_autosuggest() -> bool {
        true
    }
    const fn default_history_save_count() -> usize {
        5
    }
    const fn default_history_save_interval() -> u64 {
        300
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    editor: Option<EditorConfig>,
}

/// Load `brine.toml` from the given path or from the config directory. A
/// missing or malformed file yields defaults; parse failures are logged, not
/// fatal.
pub fn load_editor_config(path: Option<PathBuf>) -> Result<EditorConfig> {
    let path = path.unwrap_or_else(|| config_dir().join("brine.toml"));
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Ok(EditorConfig::default());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => Ok(file.editor.unwrap_or_default()),
        Err(e) => {
            warn!(target: "config", file = %path.display(), %e, "config_parse_failed");
            Ok(EditorConfig::default())
        }
    }
}
