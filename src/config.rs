use std::env;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub startup: StartupConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Channel or group all relay messages are posted to.
    pub chat_id: i64,
    /// Upper bound for a single Bot API call (send/edit/delete).
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    /// Port of the backend's request/reply socket.
    pub request_port: u16,
    /// Port of the backend's publish socket.
    pub subscriber_port: u16,
    /// How long a single backend query may take before it is abandoned.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum spacing between two outbound chat calls.
    pub base_delay_ms: u64,
    /// Total attempts per job, the first one included.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    /// Refresh the overview message once after start.
    pub refresh_enabled: bool,
    pub refresh_delay_seconds: u64,
    /// Reconcile per-project messages with the backend's active set on start.
    pub sync_project_messages: bool,
    /// Optional JSON state file of an older deployment to import into the registry.
    pub legacy_state_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// When set, logs are also written to daily rolling files in this directory.
    pub log_dir: Option<String>,
}

impl BackendConfig {
    pub fn request_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.request_port)
    }

    pub fn subscriber_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.subscriber_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SchedulerConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Interpret common truthy/falsy spellings; `None` for anything else.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN")
                    .map_err(|_| ConfigError::MissingEnv("TELEGRAM_BOT_TOKEN".to_string()))?,
                chat_id: env::var("TELEGRAM_CHAT_ID")
                    .map_err(|_| ConfigError::MissingEnv("TELEGRAM_CHAT_ID".to_string()))?
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("TELEGRAM_CHAT_ID".to_string()))?,
                request_timeout_seconds: env::var("TELEGRAM_REQUEST_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            backend: BackendConfig {
                host: env::var("BACKEND_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                request_port: env::var("BACKEND_REQUEST_PORT")
                    .map_err(|_| ConfigError::MissingEnv("BACKEND_REQUEST_PORT".to_string()))?
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("BACKEND_REQUEST_PORT".to_string()))?,
                subscriber_port: env::var("BACKEND_SUBSCRIBER_PORT")
                    .map_err(|_| ConfigError::MissingEnv("BACKEND_SUBSCRIBER_PORT".to_string()))?
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("BACKEND_SUBSCRIBER_PORT".to_string())
                    })?,
                request_timeout_ms: env::var("BACKEND_REQUEST_TIMEOUT_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/relay.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            scheduler: SchedulerConfig {
                base_delay_ms: env::var("SCHEDULER_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SCHEDULER_BASE_DELAY_MS".to_string()))?,
                max_attempts: match env::var("SCHEDULER_MAX_ATTEMPTS") {
                    Ok(v) => match v.parse::<u32>() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            return Err(ConfigError::InvalidValue(
                                "SCHEDULER_MAX_ATTEMPTS".to_string(),
                            ))
                        }
                    },
                    Err(_) => 5,
                },
            },
            startup: StartupConfig {
                refresh_enabled: env::var("STARTUP_REFRESH_ENABLED")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(true),
                refresh_delay_seconds: env::var("STARTUP_REFRESH_DELAY_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                sync_project_messages: env::var("STARTUP_SYNC_PROJECT_MESSAGES")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(false),
                legacy_state_file: env::var("LEGACY_STATE_FILE")
                    .ok()
                    .filter(|v| !v.is_empty()),
            },
            logging: LoggingConfig {
                log_dir: env::var("LOG_DIR").ok().filter(|v| !v.is_empty()),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            telegram: TelegramConfig {
                bot_token: String::new(),
                chat_id: 0,
                request_timeout_seconds: 10,
            },
            backend: BackendConfig {
                host: "127.0.0.1".to_string(),
                request_port: 0,
                subscriber_port: 0,
                request_timeout_ms: 1000,
            },
            database: DatabaseConfig {
                url: "sqlite://data/relay.db".to_string(),
                max_connections: 5,
            },
            scheduler: SchedulerConfig {
                base_delay_ms: 2000,
                max_attempts: 5,
            },
            startup: StartupConfig {
                refresh_enabled: true,
                refresh_delay_seconds: 5,
                sync_project_messages: false,
                legacy_state_file: None,
            },
            logging: LoggingConfig { log_dir: None },
        }
    }
}
