use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, error};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database URL
    pub db_url: Option<String>,

    /// JWT secret used to verify the identity of websocket clients.
    /// Without it the identity is taken from the `user_id` query parameter.
    pub auth_jwt_secret: Option<String>,

    /// Seconds between two liveness probes
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Seconds of silence after which a session is considered dead
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Capacity of the outbound queue of every session
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Idle time before a cached conversation is evicted
    #[serde(default = "default_conversation_cache_ttl_secs")]
    pub conversation_cache_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        let config = match envy::from_env::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                return Err(ConfigError::EnvError(e));
            }
        };

        config.validate()?;
        info!("✅ Configuration loaded successfully");
        Ok(config)
    }

    /// Reject settings the heartbeat and the session queues cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("HEARTBEAT_INTERVAL_SECS must be greater than 0".to_string()));
        }
        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "HEARTBEAT_TIMEOUT_SECS ({}) must be greater than HEARTBEAT_INTERVAL_SECS ({})",
                self.heartbeat_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid("SEND_QUEUE_CAPACITY must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn conversation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.conversation_cache_ttl_secs)
    }

    /// Parsed CORS origins, `None` when every origin is allowed
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        let origins = self.cors_origins.as_deref()?.trim();
        if origins.is_empty() || origins == "*" {
            return None;
        }
        Some(
            origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            db_url: None,
            auth_jwt_secret: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            send_queue_capacity: default_send_queue_capacity(),
            conversation_cache_ttl_secs: default_conversation_cache_ttl_secs(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_heartbeat_timeout_secs() -> u64 {
    15
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_conversation_cache_ttl_secs() -> u64 {
    300
}
