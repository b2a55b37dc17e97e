//! Application configuration loaded from environment variables.

use crate::errors::{FundError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Human-readable service title, reported by `/health`
    pub app_title: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Upper bound on pooled SQLite connections
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            app_title: env_var("APP_TITLE").unwrap_or_else(|_| "Charity fund".to_string()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./charity_fund.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| FundError::Config("Invalid API_PORT".to_string()))?,
            db_max_connections: parse_max_connections(
                &env_var("DB_MAX_CONNECTIONS").unwrap_or_else(|_| "5".to_string()),
            )?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| FundError::Config(format!("Missing env var: {key}")))
}

fn parse_max_connections(raw: &str) -> Result<u32> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FundError::Config("Invalid DB_MAX_CONNECTIONS".to_string())),
    }
}
