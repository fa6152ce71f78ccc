use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "FETCHDECK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/fetchdeck.toml";
const ENV_PREFIX: &str = "FETCHDECK";
const ENV_SEPARATOR: &str = "__";

/// Path of the TOML file: `FETCHDECK_CONFIG` or the default location
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    load_from_sources(config_path())
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // FETCHDECK__DOWNLOADS__MAX_CONCURRENT_DOWNLOADS -> downloads.max_concurrent_downloads
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.callback.backoff_max_ms, 60_000);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
store_path = "/var/lib/fetchdeck/tasks"

[downloads]
download_dir = "/srv/downloads"
max_concurrent_downloads = 8
max_file_size = "1GB"
proxy = "http://proxy.internal:3128"

[callback]
timeout_secs = 10
backoff_base_ms = 500
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.store_path, PathBuf::from("/var/lib/fetchdeck/tasks"));
        assert_eq!(config.downloads.download_dir, PathBuf::from("/srv/downloads"));
        assert_eq!(config.downloads.max_concurrent_downloads, 8);
        assert_eq!(config.downloads.max_file_size.as_u64(), 1024 * 1024 * 1024);
        assert_eq!(config.downloads.proxy.as_deref(), Some("http://proxy.internal:3128"));
        assert_eq!(config.callback.timeout_secs, 10);
        assert_eq!(config.callback.backoff_base_ms, 500);
        assert_eq!(config.callback.max_retries, 3);
    }
}
