//! Configuration file resolution
//!
//! Resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform configuration directory (`<config_dir>/segue/config.toml`)
//! 4. None: callers fall back to built-in defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SEGUE_CONFIG";

/// Locate the TOML configuration file, if any
///
/// An explicitly named file (CLI or environment) must exist; a missing
/// platform default is not an error.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_exists(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Using platform config file {}", path.display());
            Ok(Some(path))
        }
        _ => Ok(None),
    }
}

fn require_exists(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

/// Platform default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("segue").join("config.toml"))
}

/// Load a TOML document into `T`, or `T::default()` when no file is configured
///
/// Missing configuration never aborts startup: defaults are used with a
/// warning. A file that exists but does not parse is an error.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No configuration file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str::<T>(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(value)
}
