//! Configuration module for the wardrobe sync core.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default lazy-load proximity margin in pixels.
pub const DEFAULT_IMAGE_MARGIN_PX: f64 = 50.0;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the local SQLite cache file
    pub db_path: PathBuf,
    /// Base URL of the remote document store
    pub remote_url: String,
    /// Bearer token issued by the identity provider
    pub api_token: Option<String>,
    /// User to sync when running the binary
    pub user_id: Option<String>,
    /// Upper bound on any single remote call
    pub remote_timeout: Duration,
    /// Upper bound on any single image fetch
    pub image_timeout: Duration,
    /// Distance from the viewport at which images start loading
    pub image_margin_px: f64,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/wardrobe-cache.sqlite"),
            remote_url: "http://127.0.0.1:8080/api".to_string(),
            api_token: None,
            user_id: None,
            remote_timeout: Duration::from_secs(15),
            image_timeout: Duration::from_secs(20),
            image_margin_px: DEFAULT_IMAGE_MARGIN_PX,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let db_path = env::var("WARDROBE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let remote_url = env::var("WARDROBE_REMOTE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.remote_url);

        let api_token = env::var("WARDROBE_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        let user_id = env::var("WARDROBE_USER_ID").ok().filter(|u| !u.is_empty());

        let remote_timeout = Duration::from_secs(parse_var(
            "WARDROBE_REMOTE_TIMEOUT_SECS",
            defaults.remote_timeout.as_secs(),
        ));
        let image_timeout = Duration::from_secs(parse_var(
            "WARDROBE_IMAGE_TIMEOUT_SECS",
            defaults.image_timeout.as_secs(),
        ));
        let image_margin_px = parse_var("WARDROBE_IMAGE_MARGIN_PX", defaults.image_margin_px);

        let log_level = env::var("WARDROBE_LOG_LEVEL").unwrap_or(defaults.log_level);

        Self {
            db_path,
            remote_url,
            api_token,
            user_id,
            remote_timeout,
            image_timeout,
            image_margin_px,
            log_level,
        }
    }
}

fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("WARDROBE_DB_PATH");
        env::remove_var("WARDROBE_REMOTE_URL");
        env::remove_var("WARDROBE_API_TOKEN");
        env::remove_var("WARDROBE_USER_ID");
        env::remove_var("WARDROBE_REMOTE_TIMEOUT_SECS");
        env::remove_var("WARDROBE_IMAGE_TIMEOUT_SECS");
        env::remove_var("WARDROBE_IMAGE_MARGIN_PX");
        env::remove_var("WARDROBE_LOG_LEVEL");

        let config = Config::from_env();

        assert!(config.api_token.is_none());
        assert!(config.user_id.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/wardrobe-cache.sqlite"));
        assert_eq!(config.remote_url, "http://127.0.0.1:8080/api");
        assert_eq!(config.remote_timeout, Duration::from_secs(15));
        assert_eq!(config.image_timeout, Duration::from_secs(20));
        assert_eq!(config.image_margin_px, 50.0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_var_falls_back_on_garbage() {
        env::set_var("WARDROBE_TEST_PARSE_GARBAGE", "soon");
        assert_eq!(parse_var("WARDROBE_TEST_PARSE_GARBAGE", 7u64), 7);
        env::set_var("WARDROBE_TEST_PARSE_GARBAGE", " 12 ");
        assert_eq!(parse_var("WARDROBE_TEST_PARSE_GARBAGE", 7u64), 12);
        env::remove_var("WARDROBE_TEST_PARSE_GARBAGE");
    }
}
