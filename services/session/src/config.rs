use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub ws_url: String,
    pub chat_url: String,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub reconnect_max_retries: u32,
    pub connect_timeout: Duration,
    pub tool_settle: Duration,
    pub tool_history_cap: usize,
    pub history_cap: usize,
    pub history_retain: usize,
    pub history_window: usize,
    /// `None` disables the keepalive ping.
    pub ping_interval: Option<Duration>,
    pub fallback_timeout: Duration,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws".to_string(),
            chat_url: "http://localhost:8000/api/chat".to_string(),
            reconnect_base: Duration::from_millis(1000),
            reconnect_cap: Duration::from_millis(30_000),
            reconnect_max_retries: 5,
            connect_timeout: Duration::from_secs(10),
            tool_settle: Duration::from_millis(2000),
            tool_history_cap: 10,
            history_cap: 50,
            history_retain: 40,
            history_window: 10,
            ping_interval: Some(Duration::from_secs(30)),
            fallback_timeout: Duration::from_secs(30),
            log_level: Level::INFO,
        }
    }
}

/// Reads `name` and parses it, or returns `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        let ws_url = std::env::var("SESSION_WS_URL").unwrap_or(defaults.ws_url);
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "SESSION_WS_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", ws_url),
            ));
        }
        let chat_url = std::env::var("SESSION_CHAT_URL").unwrap_or(defaults.chat_url);

        let reconnect_base = Duration::from_millis(parse_var("RECONNECT_BASE_MS", 1000u64)?);
        let reconnect_cap = Duration::from_millis(parse_var("RECONNECT_CAP_MS", 30_000u64)?);
        let reconnect_max_retries = parse_var("RECONNECT_MAX_RETRIES", defaults.reconnect_max_retries)?;
        let connect_timeout = Duration::from_secs(parse_var("CONNECT_TIMEOUT_SECS", 10u64)?);
        if connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "CONNECT_TIMEOUT_SECS".to_string(),
                "must be at least one second".to_string(),
            ));
        }

        let tool_settle = Duration::from_millis(parse_var("TOOL_SETTLE_MS", 2000u64)?);
        let tool_history_cap = parse_var("TOOL_HISTORY_CAP", defaults.tool_history_cap)?;

        let history_cap = parse_var("HISTORY_CAP", defaults.history_cap)?;
        let history_retain = parse_var("HISTORY_RETAIN", defaults.history_retain)?;
        if history_cap == 0 || history_retain >= history_cap {
            return Err(ConfigError::InvalidValue(
                "HISTORY_RETAIN".to_string(),
                format!(
                    "retain ({}) must be smaller than a non-zero HISTORY_CAP ({})",
                    history_retain, history_cap
                ),
            ));
        }
        let history_window = parse_var("HISTORY_WINDOW", defaults.history_window)?;

        let ping_secs = parse_var("PING_INTERVAL_SECS", 30u64)?;
        let ping_interval = (ping_secs > 0).then(|| Duration::from_secs(ping_secs));
        let fallback_timeout = Duration::from_secs(parse_var("FALLBACK_TIMEOUT_SECS", 30u64)?);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            ws_url,
            chat_url,
            reconnect_base,
            reconnect_cap,
            reconnect_max_retries,
            connect_timeout,
            tool_settle,
            tool_history_cap,
            history_cap,
            history_retain,
            history_window,
            ping_interval,
            fallback_timeout,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "SESSION_WS_URL",
        "SESSION_CHAT_URL",
        "RECONNECT_BASE_MS",
        "RECONNECT_CAP_MS",
        "RECONNECT_MAX_RETRIES",
        "CONNECT_TIMEOUT_SECS",
        "TOOL_SETTLE_MS",
        "TOOL_HISTORY_CAP",
        "HISTORY_CAP",
        "HISTORY_RETAIN",
        "HISTORY_WINDOW",
        "PING_INTERVAL_SECS",
        "FALLBACK_TIMEOUT_SECS",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_config_error_display() {
        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.ws_url, "ws://localhost:8000/ws");
        assert_eq!(config.chat_url, "http://localhost:8000/api/chat");
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_cap, Duration::from_secs(30));
        assert_eq!(config.reconnect_max_retries, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.tool_settle, Duration::from_secs(2));
        assert_eq!(config.tool_history_cap, 10);
        assert_eq!(config.history_cap, 50);
        assert_eq!(config.history_retain, 40);
        assert_eq!(config.history_window, 10);
        assert_eq!(config.ping_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.fallback_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_WS_URL", "wss://antriksh.example/ws");
            env::set_var("SESSION_CHAT_URL", "https://antriksh.example/api/chat");
            env::set_var("RECONNECT_BASE_MS", "500");
            env::set_var("RECONNECT_MAX_RETRIES", "3");
            env::set_var("HISTORY_CAP", "20");
            env::set_var("HISTORY_RETAIN", "15");
            env::set_var("PING_INTERVAL_SECS", "0");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.ws_url, "wss://antriksh.example/ws");
        assert_eq!(config.chat_url, "https://antriksh.example/api/chat");
        assert_eq!(config.reconnect_base, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_retries, 3);
        assert_eq!(config.history_cap, 20);
        assert_eq!(config.history_retain, 15);
        assert_eq!(config.ping_interval, None);
        assert_eq!(config.log_level, Level::DEBUG);
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_number() {
        clear_env_vars();
        unsafe {
            env::set_var("RECONNECT_CAP_MS", "soon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RECONNECT_CAP_MS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_retain_must_be_below_cap() {
        clear_env_vars();
        unsafe {
            env::set_var("HISTORY_CAP", "10");
            env::set_var("HISTORY_RETAIN", "10");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "HISTORY_RETAIN"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_rejects_http_socket_url() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_WS_URL", "http://localhost:8000/ws");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_WS_URL"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_connect_timeout() {
        clear_env_vars();
        unsafe {
            env::set_var("CONNECT_TIMEOUT_SECS", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CONNECT_TIMEOUT_SECS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
        }
        clear_env_vars();
    }
}
