use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub committee: CommitteeConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let feedback_base_url = env::var("APP_FEEDBACK_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let scheduler_secret = env::var("APP_SCHEDULER_SECRET")
            .unwrap_or_else(|_| "local-scheduler-secret".to_string());
        let reminder_lookahead_days =
            parse_positive_i64("APP_REMINDER_LOOKAHEAD_DAYS", 2)?;
        let resend_daily_cap = parse_positive_i64("APP_RESEND_DAILY_CAP", 3)? as u32;
        let resend_cooldown_hours = parse_positive_i64("APP_RESEND_COOLDOWN_HOURS", 4)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            committee: CommitteeConfig {
                feedback_base_url,
                scheduler_secret,
                reminder_lookahead_days,
                resend_daily_cap,
                resend_cooldown_hours,
            },
        })
    }
}

fn parse_positive_i64(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    let value = match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::InvalidNumber { key })?,
        Err(_) => default,
    };

    if value <= 0 {
        return Err(ConfigError::InvalidNumber { key });
    }
    Ok(value)
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Dials for the committee workflow: link URLs, scheduler auth, reminder
/// window, and resend limits.
#[derive(Debug, Clone)]
pub struct CommitteeConfig {
    pub feedback_base_url: String,
    pub scheduler_secret: String,
    pub reminder_lookahead_days: i64,
    pub resend_daily_cap: u32,
    pub resend_cooldown_hours: i64,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidNumber { .. } => None,
        }
    }
}
