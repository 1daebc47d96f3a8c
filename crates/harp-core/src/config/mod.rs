//! Configuration for HARP
//!
//! Settings live in one YAML file (see [`default_config_path`]). A missing,
//! unreadable or malformed file never stops a session: HARP runs on the
//! defaults and says why in the log.
//!
//! ```ignore
//! use harp_core::config::{default_config_path, HarpConfig};
//!
//! let config = HarpConfig::load_or_init(&default_config_path());
//! ```

mod paths;
mod settings;

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use paths::{default_config_dir, default_config_path};
pub use settings::{ClientConfig, HarpConfig, JobsConfig, RenderConfig};

/// Outcome of reading a settings file
enum ReadOutcome<T> {
    Loaded(T),
    Missing,
    Unusable,
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> ReadOutcome<T> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(e) => {
            log::warn!("load_config: cannot read {:?}: {}", path, e);
            return ReadOutcome::Unusable;
        }
    };
    match serde_yaml::from_str(&contents) {
        Ok(config) => ReadOutcome::Loaded(config),
        Err(e) => {
            log::warn!("load_config: {:?} is not valid settings YAML: {}", path, e);
            ReadOutcome::Unusable
        }
    }
}

/// Settings from `path`, or `T::default()` when the file is missing or bad
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match read_yaml(path) {
        ReadOutcome::Loaded(config) => {
            log::info!("load_config: using {:?}", path);
            config
        }
        ReadOutcome::Missing => {
            log::info!("load_config: no file at {:?}, using defaults", path);
            T::default()
        }
        ReadOutcome::Unusable => T::default(),
    }
}

/// Write settings as YAML, creating parent directories
pub fn save_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("cannot create {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("cannot serialize settings")?;
    std::fs::write(path, yaml).with_context(|| format!("cannot write {:?}", path))?;
    log::info!("save_config: wrote {:?}", path);
    Ok(())
}

impl HarpConfig {
    /// Load settings, writing a default file on first run
    ///
    /// A file that exists but cannot be used is left untouched so a typo
    /// does not wipe the user's tokens.
    pub fn load_or_init(path: &Path) -> Self {
        match read_yaml(path) {
            ReadOutcome::Loaded(config) => {
                log::info!("HarpConfig::load_or_init: using {:?}", path);
                config
            }
            ReadOutcome::Missing => {
                let config = Self::default();
                if let Err(e) = save_config(&config, path) {
                    log::warn!("HarpConfig::load_or_init: defaults not saved: {:#}", e);
                }
                config
            }
            ReadOutcome::Unusable => Self::default(),
        }
    }
}
