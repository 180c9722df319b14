use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::job::{Backoff, JobOptions};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    /// Full connection string; takes precedence over the individual fields.
    pub url: Option<String>,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty());
        let password = match &url {
            Some(_) => env::var("DATABASE_PASSWORD").unwrap_or_default(),
            None => env::var("DATABASE_PASSWORD")
                .context("DATABASE_PASSWORD must be set when DATABASE_URL is not")?,
        };

        Ok(Self {
            host: env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("DATABASE_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .context("DATABASE_PORT must be a port number")?,
            username: env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password,
            database: env::var("DATABASE_NAME").unwrap_or_else(|_| "shoplytics".to_string()),
            ssl_mode: env::var("DATABASE_SSL_MODE").unwrap_or_else(|_| "prefer".to_string()),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            url,
        })
    }

    pub fn connection_string(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                self.username, self.password, self.host, self.port, self.database, self.ssl_mode
            ),
        }
    }

    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&self.connection_string())
            .await
            .context("failed to connect to Postgres")?;
        Ok(pool)
    }
}

/// Storefront Admin API client settings.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub api_version: String,
    /// Replaces `https://{shop}` when set. Used for local mocks.
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub page_limit: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            api_version: "2024-01".to_string(),
            api_base_url: None,
            request_timeout_secs: 30,
            page_limit: 250,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

const MAX_STOREFRONT_RETRIES: u32 = 10;
const MAX_RETRY_DELAY_MS: u64 = 60_000;

impl StorefrontConfig {
    /// Delay before retry number `retry` (1-based): the base delay doubled
    /// per earlier retry, capped at one minute.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(
            self.retry_base_delay_ms
                .saturating_mul(factor)
                .min(MAX_RETRY_DELAY_MS),
        )
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_version: env::var("SHOPIFY_API_VERSION").unwrap_or(defaults.api_version),
            api_base_url: env::var("STOREFRONT_API_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            request_timeout_secs: env_or("STOREFRONT_TIMEOUT_SECS", defaults.request_timeout_secs),
            page_limit: env_or("STOREFRONT_PAGE_LIMIT", defaults.page_limit),
            max_retries: env_or("STOREFRONT_MAX_RETRIES", defaults.max_retries).min(MAX_STOREFRONT_RETRIES),
            retry_base_delay_ms: env_or("STOREFRONT_RETRY_DELAY_MS", defaults.retry_base_delay_ms),
        }
    }
}

/// Queue worker and scheduler settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub worker_concurrency: usize,
    pub job_max_attempts: i32,
    pub job_backoff_base_ms: u64,
    pub poll_interval_ms: u64,
    /// Running jobs locked longer than this are handed out again.
    pub stale_job_timeout_secs: u64,
    pub sync_interval_hours: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 5,
            job_max_attempts: 3,
            job_backoff_base_ms: 5_000,
            poll_interval_ms: 1_000,
            stale_job_timeout_secs: 900,
            sync_interval_hours: 6,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency).max(1),
            job_max_attempts: env_or("JOB_MAX_ATTEMPTS", defaults.job_max_attempts).max(1),
            job_backoff_base_ms: env_or("JOB_BACKOFF_BASE_MS", defaults.job_backoff_base_ms),
            poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", defaults.poll_interval_ms).max(10),
            stale_job_timeout_secs: env_or("JOB_STALE_TIMEOUT_SECS", defaults.stale_job_timeout_secs),
            sync_interval_hours: env_or("SYNC_INTERVAL_HOURS", defaults.sync_interval_hours).max(1),
        }
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_attempts: self.job_max_attempts,
            backoff: Backoff::Exponential {
                base_ms: self.job_backoff_base_ms,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storefront: StorefrontConfig,
    pub ingest: IngestConfig,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            storefront: StorefrontConfig::from_env(),
            ingest: IngestConfig::from_env(),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            webhook_secret: env::var("SHOPIFY_WEBHOOK_SECRET")
                .context("SHOPIFY_WEBHOOK_SECRET must be set")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_or("SERVER_PORT", 4000),
            cors_origins,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.worker_concurrency, 5);
        assert_eq!(config.sync_interval_hours, 6);
        assert_eq!(
            config.job_options(),
            JobOptions {
                max_attempts: 3,
                backoff: Backoff::Exponential { base_ms: 5_000 },
            }
        );
    }

    #[test]
    fn test_retry_delay_doubles_and_saturates() {
        let config = StorefrontConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(500));
        assert_eq!(config.retry_delay(3), Duration::from_millis(2_000));
        assert_eq!(config.retry_delay(64), Duration::from_millis(60_000));
        assert_eq!(config.retry_delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_connection_string_prefers_url() {
        let config = DatabaseConfig {
            host: "db".to_string(),
            port: 5432,
            username: "u".to_string(),
            password: "p".to_string(),
            database: "d".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 5,
            url: None,
        };
        assert_eq!(config.connection_string(), "postgres://u:p@db:5432/d?sslmode=disable");

        let with_url = DatabaseConfig {
            url: Some("postgres://elsewhere/x".to_string()),
            ..config
        };
        assert_eq!(with_url.connection_string(), "postgres://elsewhere/x");
    }
}
