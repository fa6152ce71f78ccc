use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_concurrent_downloads must be at least 1")]
    NoWorkers,

    #[error("{field} must be positive")]
    ZeroDuration { field: &'static str },

    #[error("max_file_size must be positive")]
    ZeroMaxFileSize,

    #[error("backoff_base_ms ({base}) exceeds backoff_max_ms ({max})")]
    BackoffBaseAboveCap { base: u64, max: u64 },

    #[error("Invalid proxy URL '{url}': {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("Page sizes must be positive and default_page_size ({default}) <= max_page_size ({max})")]
    InvalidPageSize { default: usize, max: usize },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_downloads(config)?;
    validate_callback(config)?;
    validate_api(config)?;
    Ok(())
}

fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    let downloads = &config.downloads;

    if downloads.max_concurrent_downloads == 0 {
        return Err(ValidationError::NoWorkers);
    }
    if downloads.download_timeout_secs == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "download_timeout_secs",
        });
    }
    if downloads.progress_flush_interval_ms == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "progress_flush_interval_ms",
        });
    }
    if downloads.max_file_size.as_u64() == 0 {
        return Err(ValidationError::ZeroMaxFileSize);
    }

    if let Some(proxy) = &downloads.proxy {
        let parsed = url::Url::parse(proxy).map_err(|e| ValidationError::InvalidProxy {
            url: proxy.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ValidationError::InvalidProxy {
                url: proxy.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
    }

    Ok(())
}

fn validate_callback(config: &Config) -> Result<(), ValidationError> {
    let callback = &config.callback;

    if callback.timeout_secs == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "callback.timeout_secs",
        });
    }
    if callback.backoff_base_ms > callback.backoff_max_ms {
        return Err(ValidationError::BackoffBaseAboveCap {
            base: callback.backoff_base_ms,
            max: callback.backoff_max_ms,
        });
    }

    Ok(())
}

fn validate_api(config: &Config) -> Result<(), ValidationError> {
    let api = &config.api;
    if api.default_page_size == 0 || api.default_page_size > api.max_page_size {
        return Err(ValidationError::InvalidPageSize {
            default: api.default_page_size,
            max: api.max_page_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = Config::default();
        config.downloads.max_concurrent_downloads = 0;
        assert!(matches!(validate(&config), Err(ValidationError::NoWorkers)));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = Config::default();
        config.downloads.download_timeout_secs = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroDuration {
                field: "download_timeout_secs"
            })
        ));
    }

    #[test]
    fn test_zero_max_file_size() {
        let mut config = Config::default();
        config.downloads.max_file_size = ByteSize(0);
        assert!(matches!(validate(&config), Err(ValidationError::ZeroMaxFileSize)));
    }

    #[test]
    fn test_backoff_base_above_cap() {
        let mut config = Config::default();
        config.callback.backoff_base_ms = 120_000;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::BackoffBaseAboveCap { .. })
        ));
    }

    #[test]
    fn test_proxy_url() {
        let mut config = Config::default();
        config.downloads.proxy = Some("http://proxy.internal:3128".to_string());
        assert!(validate(&config).is_ok());

        config.downloads.proxy = Some("not a url".to_string());
        assert!(matches!(validate(&config), Err(ValidationError::InvalidProxy { .. })));

        config.downloads.proxy = Some("ftp://proxy.internal".to_string());
        assert!(matches!(validate(&config), Err(ValidationError::InvalidProxy { .. })));
    }

    #[test]
    fn test_page_sizes() {
        let mut config = Config::default();
        config.api.default_page_size = 200;
        assert!(matches!(validate(&config), Err(ValidationError::InvalidPageSize { .. })));
    }
}
