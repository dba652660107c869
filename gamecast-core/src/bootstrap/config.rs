//! Configuration loading

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::Config;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "GAMECAST_CONFIG_PATH";

fn existing(path: &str) -> Option<String> {
    Path::new(path).exists().then(|| path.to_string())
}

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `GAMECAST_CONFIG_PATH` environment variable (explicit path, must load)
/// 2. ./config.yaml (current working directory)
/// 3. /config/config.yaml (container mount path)
/// 4. Fall back to environment variables only
pub fn load_config() -> Result<Config> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return load_config_from(Some(&path));
    }

    let config = match existing("config.yaml").or_else(|| existing("/config/config.yaml")) {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path).unwrap_or_else(|e| {
                eprintln!("Failed to load {path}: {e}");
                eprintln!("Falling back to environment variables");
                Config::from_env().unwrap_or_default()
            })
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env().unwrap_or_else(|e| {
                eprintln!("Failed to load config: {e}");
                eprintln!("Using default configuration");
                Config::default()
            })
        }
    };

    validated(config)
}

/// Load configuration from an explicit `path` (or environment only) and validate it.
///
/// A named file that is missing or fails to parse is an error. Runs before
/// logging is initialized, so progress goes to stderr.
pub fn load_config_from(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            if !Path::new(path).exists() {
                bail!("Config file not found: {path}");
            }
            eprintln!("Loading config from {path}");
            Config::from_file(path).with_context(|| format!("Failed to load config file {path}"))?
        }
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    validated(config)
}

// Fail fast on misconfigurations
fn validated(config: Config) -> Result<Config> {
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        bail!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        );
    }

    Ok(config)
}
