//! Configuration loader for Latchkey.
//!
//! Reads `latchkey.toml` and deserializes it into [`LatchkeyConfig`]. A
//! missing file yields defaults. A file that exists but fails to parse is an
//! error: silently falling back to defaults could point lock managers at the
//! wrong database.

use std::path::{Path, PathBuf};

use latchkey_types::config::LatchkeyConfig;
use latchkey_types::error::ConfigError;

/// Overrides `database_url`.
pub const DATABASE_URL_ENV: &str = "LATCHKEY_DATABASE_URL";

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "LATCHKEY_CONFIG";

/// `$LATCHKEY_CONFIG`, or `latchkey.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("latchkey.toml"))
}

/// Load, apply environment overrides, and validate.
pub async fn load_config(path: &Path) -> Result<LatchkeyConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok()).await
}

/// [`load_config`] with an explicit environment lookup.
pub async fn load_config_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<LatchkeyConfig, ConfigError> {
    let mut config = match tokio::fs::read_to_string(path).await {
        Ok(content) => toml::from_str::<LatchkeyConfig>(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            LatchkeyConfig::default()
        }
        Err(err) => return Err(ConfigError::Io(format!("{}: {err}", path.display()))),
    };

    if let Some(url) = env(DATABASE_URL_ENV).filter(|url| !url.trim().is_empty()) {
        tracing::debug!("database_url taken from {DATABASE_URL_ENV}");
        config.database_url = url;
    }

    config.validate()?;
    Ok(config)
}
