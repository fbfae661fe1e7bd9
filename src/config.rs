// Configuration module
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub cors: CorsSettings,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file_path: String,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Sessions idle longer than this are closed by the background reaper.
    /// 0 disables reaping.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// How often the reaper sweeps for idle sessions
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,

    /// Server names accepted by initialize. Empty list accepts any name.
    #[serde(default)]
    pub allowed_servers: Vec<String>,
}

/// CORS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins; empty or "*" allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: default_log_file(),
            log_to_console: true,
            format: default_log_format(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            reaper_interval_seconds: default_reaper_interval(),
            allowed_servers: Vec::new(),
        }
    }
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

// Default value functions
fn default_workers() -> usize {
    0
}

fn default_keepalive_timeout() -> u64 {
    75
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "./logs/server.log".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_idle_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_cors_max_age() -> u64 {
    3600
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        // Override with environment variables if present
        config.apply_env_overrides()?;

        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides for deployment configuration
    ///
    /// Supported environment variables:
    /// - QUERYDESK_SERVER_HOST: Override server.host
    /// - QUERYDESK_SERVER_PORT: Override server.port
    /// - QUERYDESK_LOG_LEVEL: Override logging.level
    /// - QUERYDESK_LOG_FILE: Override logging.file_path
    /// - QUERYDESK_LOG_TO_CONSOLE: Override logging.log_to_console
    /// - QUERYDESK_SESSION_IDLE_TIMEOUT: Override session.idle_timeout_seconds
    ///
    /// Environment variables take precedence over config.toml values
    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        use std::env;

        if let Ok(host) = env::var("QUERYDESK_SERVER_HOST") {
            self.server.host = host;
        }

        if let Ok(port_str) = env::var("QUERYDESK_SERVER_PORT") {
            self.server.port = port_str.parse().map_err(|_| {
                anyhow::anyhow!("Invalid QUERYDESK_SERVER_PORT value: {}", port_str)
            })?;
        }

        if let Ok(level) = env::var("QUERYDESK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(path) = env::var("QUERYDESK_LOG_FILE") {
            self.logging.file_path = path;
        }

        if let Ok(val) = env::var("QUERYDESK_LOG_TO_CONSOLE") {
            self.logging.log_to_console =
                val.to_lowercase() == "true" || val == "1" || val.to_lowercase() == "yes";
        }

        if let Ok(timeout_str) = env::var("QUERYDESK_SESSION_IDLE_TIMEOUT") {
            self.session.idle_timeout_seconds = timeout_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "Invalid QUERYDESK_SESSION_IDLE_TIMEOUT value: {}",
                    timeout_str
                )
            })?;
        }

        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate port range
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        // Validate log level
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        // Validate log format
        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        // A reaper with an idle timeout needs a sweep interval
        if self.session.idle_timeout_seconds > 0 && self.session.reaper_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "session.reaper_interval_seconds cannot be 0 when idle timeout is set"
            ));
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: 0,
                keepalive_timeout: default_keepalive_timeout(),
            },
            logging: LoggingSettings::default(),
            session: SessionSettings::default(),
            cors: CorsSettings::default(),
        }
    }
}
