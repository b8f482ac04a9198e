//! Configuration discovery and loading.
//!
//! The discovery order is:
//! 1. `--config <path>` flag (must exist).
//! 2. `TOLLGATE_CONFIG` environment variable.
//! 3. `~/.tollgate/config.toml`
//! 4. If none found, built-in defaults.
//!
//! After loading, secret-bearing fields are overridden from the environment
//! so credentials can stay out of the config file:
//! `TOLLGATE_AUTH_SECRET`, `TOLLGATE_ADMIN_KEY`, `TOLLGATE_REDIS_URL`.

use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::{debug, info};

use tollgate_types::Config;

/// Locate the config file, if any.
pub fn discover_config_path(flag: Option<PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = flag {
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        return Ok(Some(path));
    }

    if let Ok(env_path) = std::env::var("TOLLGATE_CONFIG") {
        return Ok(Some(PathBuf::from(env_path)));
    }

    if let Some(home) = dirs::home_dir() {
        let default_path = home.join(".tollgate").join("config.toml");
        if default_path.exists() {
            return Ok(Some(default_path));
        }
    }

    Ok(None)
}

/// Load the configuration and apply environment overrides.
pub fn load(flag: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = match discover_config_path(flag)? {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            debug!(path = %path.display(), "loaded config file");
            config
        }
        None => {
            info!("no config file found, using defaults");
            Config::default()
        }
    };

    if let Ok(secret) = std::env::var("TOLLGATE_AUTH_SECRET") {
        config.auth.secret = secret;
    }
    if let Ok(admin_key) = std::env::var("TOLLGATE_ADMIN_KEY") {
        config.auth.admin_key = admin_key;
    }
    if let Ok(redis_url) = std::env::var("TOLLGATE_REDIS_URL") {
        config.redis_url = redis_url;
    }

    Ok(config)
}
