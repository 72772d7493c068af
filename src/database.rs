use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, Connection, Pool, Postgres, Row};
use std::env;
use std::time::Duration;

use crate::checkpoint::{log_checkpoint_write, CheckpointStore, CheckpointWrite, StateCheckpoint};
use crate::settings::Database as DatabaseSettings;
use crate::types::{PairSnapshot, TokenSnapshot};

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

const UNIQUE_VIOLATION: &str = "23505";

fn database_url(settings: &DatabaseSettings) -> Result<String> {
    match &settings.url {
        Some(url) if !url.trim().is_empty() => Ok(url.clone()),
        _ => env::var("DATABASE_URL").context("DATABASE_URL must be set when database.url is empty"),
    }
}

/// Connects and initializes the schema, retrying with capped exponential backoff.
pub async fn connect(settings: &DatabaseSettings) -> Result<DbPool> {
    // Force UTF-8 client encoding to avoid sqlx issues with non-ASCII server messages
    env::set_var("PGCLIENTENCODING", "UTF8");

    let url = database_url(settings)?;
    let max_attempts = settings.connect_attempts.max(1);
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=max_attempts {
        match PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&url)
            .await
        {
            Ok(pool) => {
                log::info!(
                    "✅ Connected to database (attempt {}/{}).",
                    attempt,
                    max_attempts
                );
                match initialize_database(&pool, &settings.schema).await {
                    Ok(()) => return Ok(pool),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(e) => last_err = Some(e.into()),
        }
        if attempt == max_attempts {
            break;
        }
        let delay_ms = (1u64 << attempt.min(6)) * 200; // 400ms, 800ms, ... capped at ~12.8s
        log::warn!(
            "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
            attempt,
            max_attempts,
            delay_ms
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
}

/// Creates the schema and checkpoint table under a migration advisory lock.
pub async fn initialize_database(pool: &DbPool, schema: &str) -> Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x4D4952524F524442; // "MIRRORDB"

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    log::info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(tx.as_mut())
        .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.state_checkpoints (
            day DATE PRIMARY KEY,
            block_nonce BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            pairs JSONB NOT NULL,
            tokens JSONB NOT NULL
        )",
        schema
    ))
    .execute(tx.as_mut())
    .await?;

    tx.commit().await?;
    log::info!("Database initialization complete, transaction committed.");
    Ok(())
}

/// Checkpoints in `<schema>.state_checkpoints`, one row per day.
pub struct PgCheckpointStore {
    pool: DbPool,
    schema: String,
}

impl PgCheckpointStore {
    pub fn new(pool: DbPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = connect(settings).await?;
        Ok(Self::new(pool, settings.schema.clone()))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn latest(&self) -> Result<Option<StateCheckpoint>> {
        let row = sqlx::query(&format!(
            "SELECT day, block_nonce, created_at, pairs, tokens
             FROM {}.state_checkpoints
             ORDER BY day DESC, block_nonce DESC
             LIMIT 1",
            self.schema
        ))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load latest checkpoint")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let pairs: Json<Vec<PairSnapshot>> = row.try_get("pairs")?;
        let tokens: Json<Vec<TokenSnapshot>> = row.try_get("tokens")?;
        Ok(Some(StateCheckpoint {
            date: row.try_get::<NaiveDate, _>("day")?,
            block_nonce: row.try_get::<i64, _>("block_nonce")?.max(0) as u64,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            pairs: pairs.0,
            tokens: tokens.0,
        }))
    }

    async fn save(&self, checkpoint: &StateCheckpoint) -> Result<CheckpointWrite> {
        let result = sqlx::query(&format!(
            "INSERT INTO {}.state_checkpoints (day, block_nonce, created_at, pairs, tokens)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (day) DO UPDATE SET
             block_nonce = EXCLUDED.block_nonce,
             created_at = EXCLUDED.created_at,
             pairs = EXCLUDED.pairs,
             tokens = EXCLUDED.tokens
             WHERE {}.state_checkpoints.block_nonce < EXCLUDED.block_nonce",
            self.schema, self.schema
        ))
        .bind(checkpoint.date)
        .bind(checkpoint.block_nonce as i64)
        .bind(checkpoint.created_at)
        .bind(Json(&checkpoint.pairs))
        .bind(Json(&checkpoint.tokens))
        .execute(&self.pool)
        .await;

        let outcome = match result {
            Ok(done) if done.rows_affected() > 0 => CheckpointWrite::Written,
            Ok(_) => CheckpointWrite::Discarded,
            Err(e) if is_unique_violation(&e) => CheckpointWrite::Discarded,
            Err(e) => return Err(e).context("Failed to save checkpoint"),
        };
        log_checkpoint_write(checkpoint, outcome);
        Ok(outcome)
    }
}
