//! Server configuration loaded from environment variables.
//!
//! - `HOST` / `PORT` - bind address (defaults `0.0.0.0:5000`)
//! - `DATABASE_PATH` - SQLite database file (default `taskboard.db`)
//! - `JWT_SECRET` - required, at least 16 characters
//! - `JWT_EXPIRES_IN` - access token lifetime in seconds (default 7 days)
//! - `JWT_REFRESH_EXPIRES_IN` - refresh token lifetime in seconds (default 30 days)

use anyhow::{bail, Context};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_JWT_EXPIRES_IN: i64 = 60 * 60 * 24 * 7;
const DEFAULT_JWT_REFRESH_EXPIRES_IN: i64 = 60 * 60 * 24 * 30;

/// Runtime configuration for the server.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    /// Access token lifetime in seconds.
    pub jwt_expires_in: i64,
    /// Refresh token lifetime in seconds.
    pub jwt_refresh_expires_in: i64,
}

impl Config {
    /// Load configuration from the environment, failing fast on
    /// missing or unusable values.
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().context("PORT must be a valid port number")?,
            Err(_) => DEFAULT_PORT,
        };

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "taskboard.db".to_string());

        let jwt_secret = std::env::var("JWT_SECRET")
            .context("JWT_SECRET environment variable is required")?;
        if jwt_secret.len() < 16 {
            bail!("JWT_SECRET must be at least 16 characters");
        }

        let jwt_expires_in = env_seconds("JWT_EXPIRES_IN", DEFAULT_JWT_EXPIRES_IN)?;
        let jwt_refresh_expires_in =
            env_seconds("JWT_REFRESH_EXPIRES_IN", DEFAULT_JWT_REFRESH_EXPIRES_IN)?;

        Ok(Self {
            host,
            port,
            database_path,
            jwt_secret,
            jwt_expires_in,
            jwt_refresh_expires_in,
        })
    }
}

fn env_seconds(name: &str, default: i64) -> anyhow::Result<i64> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs = raw
                .parse::<i64>()
                .with_context(|| format!("{} must be a number of seconds", name))?;
            if secs <= 0 {
                bail!("{} must be positive", name);
            }
            Ok(secs)
        }
        Err(_) => Ok(default),
    }
}
