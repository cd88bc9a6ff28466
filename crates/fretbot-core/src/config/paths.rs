//! Path utilities for fretbot configuration files

use std::path::PathBuf;

/// Get the fretbot configuration directory
///
/// Returns: `<config_dir>/fretbot` (e.g. `~/.config/fretbot` on Linux)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fretbot")
}

/// Get the default config file path for a given file name
///
/// Returns: `<config_dir>/fretbot/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
