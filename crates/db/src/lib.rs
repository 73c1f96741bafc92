use std::{str::FromStr, time::Duration};

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

pub mod health;
pub mod models;
pub mod repositories;
pub mod retry;

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Shared database handle. Constructed once at startup and passed through the
/// worker context; repositories borrow the pool per call.
#[derive(Clone)]
pub struct DBService {
    pub pool: PgPool,
}

impl DBService {
    /// Connect using `DATABASE_URL` when set, otherwise the `DB_*` parts.
    /// Runs pending migrations before returning.
    pub async fn new() -> Result<DBService, sqlx::Error> {
        let options = Self::connect_options()?;

        let pool = PgPoolOptions::new()
            .min_connections(env_u32("DB_POOL_MIN", 2))
            .max_connections(env_u32("DB_POOL_MAX", 10))
            .idle_timeout(Duration::from_secs(env_u64("DB_MAX_IDLE_TIME", 300)))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(DBService { pool })
    }

    fn connect_options() -> Result<PgConnectOptions, sqlx::Error> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return PgConnectOptions::from_str(&url);
        }

        let mut options = PgConnectOptions::new()
            .host(&std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into()))
            .port(env_u32("DB_PORT", 5432) as u16)
            .username(&std::env::var("DB_USER").unwrap_or_else(|_| "postgres".into()))
            .database(&std::env::var("DB_NAME").unwrap_or_else(|_| "clips".into()));
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            options = options.password(&password);
        }
        Ok(options)
    }

    /// Trivial liveness probe used by the health loop.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
