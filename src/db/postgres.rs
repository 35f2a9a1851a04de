use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, error};

use super::models::{from_bigint, to_bigint, AccountCacheRow, OperationRow, RateWindowRow};
use super::{evict_at, Store, StoreResult, WindowCount};
use crate::error::StoreError;
use crate::types::{Operation, OperationId, OperationRecord, OperationStatus, OriginKey, SmartAccount};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Postgres-backed [`Store`]
///
/// TTLs are stored as absolute `evict_at` timestamps. Reads filter on them, so
/// eviction is exact even if the sweeper lags.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn log_sql(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("SQL error {}: {:?}", context, e);
        StoreError::Database(e)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_operation(&self, op: &Operation, ttl: Duration) -> StoreResult<()> {
        let row = OperationRow::from_operation(op)?;
        sqlx::query(
            r#"
            INSERT INTO operations (id, actor_key, params, expected_nonce, canonical_message,
                message_timestamp, prepared_at, expires_at, status, signature, result_tx_ref,
                failure_reason, evict_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&row.id)
        .bind(&row.actor_key)
        .bind(&row.params)
        .bind(row.expected_nonce)
        .bind(&row.canonical_message)
        .bind(row.message_timestamp)
        .bind(row.prepared_at)
        .bind(row.expires_at)
        .bind(&row.status)
        .bind(&row.signature)
        .bind(&row.result_tx_ref)
        .bind(&row.failure_reason)
        .bind(evict_at(Utc::now(), ttl))
        .execute(&self.pool)
        .await
        .map_err(log_sql("inserting operation"))?;
        Ok(())
    }

    async fn get_operation(&self, id: &OperationId) -> StoreResult<Option<Operation>> {
        let row = sqlx::query_as::<_, OperationRow>(
            r#"SELECT id, actor_key, params, expected_nonce, canonical_message, message_timestamp,
                      prepared_at, expires_at, status, signature, result_tx_ref, failure_reason
               FROM operations WHERE id = $1 AND evict_at > NOW()"#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(log_sql("getting operation"))?;

        row.map(OperationRow::into_operation).transpose()
    }

    async fn delete_operation(&self, id: &OperationId) -> StoreResult<()> {
        sqlx::query("DELETE FROM operations WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(log_sql("deleting operation"))?;
        Ok(())
    }

    async fn transition_operation(
        &self,
        op: &Operation,
        expected: OperationStatus,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let row = OperationRow::from_operation(op)?;
        // Status guard and write in one statement; a concurrent claimant
        // sees zero rows affected
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = $2, signature = $3, result_tx_ref = $4, failure_reason = $5,
                evict_at = $6, updated_at = NOW()
            WHERE id = $1 AND status = $7 AND evict_at > NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.status)
        .bind(&row.signature)
        .bind(&row.result_tx_ref)
        .bind(&row.failure_reason)
        .bind(evict_at(Utc::now(), ttl))
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(log_sql("transitioning operation"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_cached_account(&self, key: &OriginKey) -> StoreResult<Option<SmartAccount>> {
        let row = sqlx::query_as::<_, AccountCacheRow>(
            r#"SELECT origin_key, address, nonce, created_at, bump
               FROM account_cache WHERE origin_key = $1 AND evict_at > NOW()"#,
        )
        .bind(key.to_hex())
        .fetch_optional(&self.pool)
        .await
        .map_err(log_sql("getting cached account"))?;

        row.map(AccountCacheRow::into_account).transpose()
    }

    async fn cache_account(&self, account: &SmartAccount, ttl: Duration) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_cache (origin_key, address, nonce, created_at, bump, evict_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (origin_key) DO UPDATE SET
                address = EXCLUDED.address,
                nonce = EXCLUDED.nonce,
                created_at = EXCLUDED.created_at,
                bump = EXCLUDED.bump,
                evict_at = EXCLUDED.evict_at
            "#,
        )
        .bind(account.origin_key.to_hex())
        .bind(account.address.to_string())
        .bind(to_bigint(account.nonce, "account_cache")?)
        .bind(account.created_at)
        .bind(i16::from(account.bump))
        .bind(evict_at(Utc::now(), ttl))
        .execute(&self.pool)
        .await
        .map_err(log_sql("caching account"))?;
        Ok(())
    }

    async fn invalidate_account(&self, key: &OriginKey) -> StoreResult<()> {
        sqlx::query("DELETE FROM account_cache WHERE origin_key = $1")
            .bind(key.to_hex())
            .execute(&self.pool)
            .await
            .map_err(log_sql("invalidating account"))?;
        Ok(())
    }

    async fn increment_window(&self, key: &str, window: Duration) -> StoreResult<WindowCount> {
        let row = sqlx::query_as::<_, RateWindowRow>(
            r#"
            INSERT INTO rate_windows (key, count, window_ends_at)
            VALUES ($1, 1, NOW() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET
                count = CASE WHEN rate_windows.window_ends_at <= NOW() THEN 1
                             ELSE rate_windows.count + 1 END,
                window_ends_at = CASE WHEN rate_windows.window_ends_at <= NOW()
                                      THEN EXCLUDED.window_ends_at
                                      ELSE rate_windows.window_ends_at END
            RETURNING count, window_ends_at
            "#,
        )
        .bind(key)
        .bind(window.as_secs_f64())
        .fetch_one(&self.pool)
        .await
        .map_err(log_sql("incrementing rate window"))?;

        Ok(WindowCount {
            count: from_bigint(row.count, "rate_windows")?,
            resets_at: row.window_ends_at,
        })
    }

    async fn push_record(
        &self,
        account: &str,
        record: &OperationRecord,
        cap: usize,
    ) -> StoreResult<()> {
        let body = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            table: "operation_records",
            reason: e.to_string(),
        })?;
        let cap = to_bigint(cap as u64, "operation_records")?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(log_sql("starting record transaction"))?;

        sqlx::query("INSERT INTO operation_records (account, record) VALUES ($1, $2)")
            .bind(account)
            .bind(&body)
            .execute(&mut *tx)
            .await
            .map_err(log_sql("inserting record"))?;

        let trimmed = sqlx::query(
            r#"
            DELETE FROM operation_records
            WHERE account = $1 AND seq NOT IN (
                SELECT seq FROM operation_records WHERE account = $1
                ORDER BY seq DESC LIMIT $2
            )
            "#,
        )
        .bind(account)
        .bind(cap)
        .execute(&mut *tx)
        .await
        .map_err(log_sql("trimming records"))?;

        tx.commit()
            .await
            .map_err(log_sql("committing record transaction"))?;

        if trimmed.rows_affected() > 0 {
            debug!(account = %account, dropped = trimmed.rows_affected(), "Trimmed operation history");
        }
        Ok(())
    }

    async fn list_records(
        &self,
        account: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<OperationRecord>> {
        let bodies: Vec<(String,)> = sqlx::query_as(
            r#"SELECT record FROM operation_records WHERE account = $1
               ORDER BY seq DESC OFFSET $2 LIMIT $3"#,
        )
        .bind(account)
        .bind(to_bigint(offset as u64, "operation_records")?)
        .bind(to_bigint(limit as u64, "operation_records")?)
        .fetch_all(&self.pool)
        .await
        .map_err(log_sql("listing records"))?;

        bodies
            .into_iter()
            .map(|(body,)| {
                serde_json::from_str(&body).map_err(|e| StoreError::Corrupt {
                    table: "operation_records",
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn count_records(&self, account: &str) -> StoreResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM operation_records WHERE account = $1")
                .bind(account)
                .fetch_one(&self.pool)
                .await
                .map_err(log_sql("counting records"))?;
        from_bigint(count, "operation_records")
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let mut removed = 0;
        for statement in [
            "DELETE FROM operations WHERE evict_at <= NOW()",
            "DELETE FROM account_cache WHERE evict_at <= NOW()",
            "DELETE FROM rate_windows WHERE window_ends_at <= NOW()",
        ] {
            removed += sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(log_sql("sweeping expired rows"))?
                .rows_affected();
        }
        Ok(removed)
    }
}
