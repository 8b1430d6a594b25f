use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_PONG_WAIT_SECS: u64 = 60;
const DEFAULT_WRITE_WAIT_SECS: u64 = 10;
const DEFAULT_MAILBOX_CAPACITY: usize = 256;
const DEFAULT_MAX_FRAME_BYTES: usize = 512;

/// Tuning for the hub and its per-connection workers
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Liveness window: the read deadline, refreshed on every pong
    pub pong_wait: Duration,
    /// Deadline for a single socket write
    pub write_wait: Duration,
    /// Outbound mailbox slots per connection
    pub mailbox_capacity: usize,
    /// Inbound frames larger than this tear the connection down
    pub max_frame_bytes: usize,
}

impl HubConfig {
    /// Ping interval, 9/10 of the liveness window so a pong can arrive in time
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub cors_allowed_origins: Vec<String>,
    pub hub: HubConfig,
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_var<T: FromStr>(name: &str, default: T) -> AppResult<T> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} is not a valid value: {raw}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;
        let port = Self::parse_var("PORT", DEFAULT_PORT)?;

        let cors_allowed_origins =
            Self::parse_list(&env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".into()));

        let pong_wait_secs = Self::parse_var("WS_PONG_WAIT_SECS", DEFAULT_PONG_WAIT_SECS)?;
        let write_wait_secs = Self::parse_var("WS_WRITE_WAIT_SECS", DEFAULT_WRITE_WAIT_SECS)?;
        let mailbox_capacity = Self::parse_var("WS_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        let max_frame_bytes = Self::parse_var("WS_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;

        if pong_wait_secs == 0 || write_wait_secs == 0 {
            return Err(AppError::Config(
                "WS_PONG_WAIT_SECS and WS_WRITE_WAIT_SECS must be positive".into(),
            ));
        }
        // tokio's bounded channel panics on zero capacity
        if mailbox_capacity == 0 {
            return Err(AppError::Config("WS_MAILBOX_CAPACITY must be positive".into()));
        }

        Ok(Self {
            port,
            jwt_secret,
            cors_allowed_origins,
            hub: HubConfig {
                pong_wait: Duration::from_secs(pong_wait_secs),
                write_wait: Duration::from_secs(write_wait_secs),
                mailbox_capacity,
                max_frame_bytes,
            },
        })
    }
}
