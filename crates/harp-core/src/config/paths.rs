//! Standard locations for HARP files

use std::path::PathBuf;

/// Directory holding HARP settings
///
/// Returns: `{config_dir}/harp` (for example `~/.config/harp` on Linux)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harp")
}

/// Default settings file: `{config_dir}/harp/config.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}
