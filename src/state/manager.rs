//! PostgreSQL swap store

use super::{SwapEventRecord, SwapStats, SwapStore};
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::{ChainId, EscrowId, Secret};
use crate::events::EscrowEvent;
use crate::swap::{SwapIntent, SwapStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Swap store backed by PostgreSQL
pub struct PgSwapStore {
    pool: PgPool,
}

impl PgSwapStore {
    /// Connect the pool
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        // Inline schema; switch to sqlx::migrate! once the schema settles
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_intents (
                swap_id UUID PRIMARY KEY,
                secret_hash VARCHAR(66) NOT NULL,
                status VARCHAR(40) NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swap_intents_status
            ON swap_intents (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_events (
                id BIGSERIAL PRIMARY KEY,
                swap_id UUID NOT NULL,
                chain_id VARCHAR(64) NOT NULL,
                escrow_id BIGINT NOT NULL,
                sequence BIGINT NOT NULL,
                tx_hash VARCHAR(66) NOT NULL,
                event_type VARCHAR(32) NOT NULL,
                event_data JSONB NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swap_events_swap
            ON swap_events (swap_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_secrets (
                swap_id UUID PRIMARY KEY,
                secret BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_checkpoints (
                chain_id VARCHAR(64) PRIMARY KEY,
                sequence BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn terminal_statuses() -> Vec<String> {
        SwapStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl SwapStore for PgSwapStore {
    async fn save_intent(&self, intent: &SwapIntent) -> RelayerResult<()> {
        let record = serde_json::to_value(intent)?;

        sqlx::query(
            r#"
            INSERT INTO swap_intents (swap_id, secret_hash, status, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (swap_id)
            DO UPDATE SET status = $3, record = $4, updated_at = $6
            "#,
        )
        .bind(intent.swap_id)
        .bind(intent.secret_hash.to_hex())
        .bind(intent.status.as_str())
        .bind(record)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved swap {} ({})", intent.swap_id, intent.status);
        Ok(())
    }

    async fn load_intent(&self, swap_id: &Uuid) -> RelayerResult<Option<SwapIntent>> {
        let row = sqlx::query("SELECT record FROM swap_intents WHERE swap_id = $1")
            .bind(swap_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.get("record"))?)),
            None => Ok(None),
        }
    }

    async fn load_active(&self) -> RelayerResult<Vec<SwapIntent>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM swap_intents
            WHERE status <> ALL($1)
            ORDER BY created_at
            "#,
        )
        .bind(Self::terminal_statuses())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row.get("record")).map_err(RelayerError::from))
            .collect()
    }

    async fn append_event(&self, record: &SwapEventRecord) -> RelayerResult<()> {
        let event_data = serde_json::to_value(&record.event)?;

        sqlx::query(
            r#"
            INSERT INTO swap_events
                (swap_id, chain_id, escrow_id, sequence, tx_hash, event_type, event_data, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.swap_id)
        .bind(record.chain_id.as_str())
        .bind(record.escrow_id.0 as i64)
        .bind(record.sequence as i64)
        .bind(&record.tx_hash)
        .bind(record.event.name())
        .bind(event_data)
        .bind(record.observed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(&self, swap_id: &Uuid) -> RelayerResult<Vec<SwapEventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT swap_id, chain_id, escrow_id, sequence, tx_hash, event_data, observed_at
            FROM swap_events
            WHERE swap_id = $1
            ORDER BY id
            "#,
        )
        .bind(swap_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let event: EscrowEvent = serde_json::from_value(row.get("event_data"))?;
                Ok(SwapEventRecord {
                    swap_id: row.get("swap_id"),
                    chain_id: ChainId::new(row.get::<String, _>("chain_id")),
                    escrow_id: EscrowId(row.get::<i64, _>("escrow_id") as u64),
                    sequence: row.get::<i64, _>("sequence") as u64,
                    tx_hash: row.get("tx_hash"),
                    event,
                    observed_at: row.get::<DateTime<Utc>, _>("observed_at"),
                })
            })
            .collect()
    }

    async fn save_secret(&self, swap_id: &Uuid, secret: &Secret) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO swap_secrets (swap_id, secret)
            VALUES ($1, $2)
            ON CONFLICT (swap_id) DO NOTHING
            "#,
        )
        .bind(swap_id)
        .bind(&secret.0[..])
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_secret(&self, swap_id: &Uuid) -> RelayerResult<Option<Secret>> {
        let row = sqlx::query("SELECT secret FROM swap_secrets WHERE swap_id = $1")
            .bind(swap_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.get("secret");
                Secret::from_slice(&bytes)
                    .map(Some)
                    .ok_or_else(|| RelayerError::Internal(format!("corrupt secret for swap {}", swap_id)))
            }
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, chain_id: &ChainId, sequence: u64) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_checkpoints (chain_id, sequence, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain_id)
            DO UPDATE SET sequence = GREATEST(chain_checkpoints.sequence, $2), updated_at = NOW()
            "#,
        )
        .bind(chain_id.as_str())
        .bind(sequence as i64)
        .execute(&self.pool)
        .await?;

        debug!("Saved checkpoint for chain {}: sequence {}", chain_id, sequence);
        Ok(())
    }

    async fn load_checkpoint(&self, chain_id: &ChainId) -> RelayerResult<Option<u64>> {
        let row = sqlx::query("SELECT sequence FROM chain_checkpoints WHERE chain_id = $1")
            .bind(chain_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("sequence") as u64))
    }

    async fn stats(&self) -> RelayerResult<SwapStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM swap_intents
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let by_status: BTreeMap<String, u64> = rows
            .into_iter()
            .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("count") as u64))
            .collect();

        Ok(SwapStats::from_counts(by_status))
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
