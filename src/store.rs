//! Durable score cache and subject store.
//!
//! Both traits are backed by one Postgres table in production (`PgStore`),
//! mirroring how the subject's permanent record carries its cached score
//! fields. Expected schema:
//!
//! ```sql
//! CREATE TABLE subjects (
//!     id                  UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     full_name           TEXT NOT NULL,
//!     pan_number          TEXT,
//!     annual_income       TEXT,
//!     date_of_birth       DATE,
//!     occupation          TEXT,
//!     credit_score        INTEGER,
//!     cached_credit_score INTEGER,
//!     risk_level          TEXT,
//!     last_score_update   TIMESTAMPTZ,
//!     bureau_data         JSONB
//! );
//! ```

use crate::circuit_breaker::{create_store_circuit_breaker, StoreCircuitBreaker};
use crate::errors::AppError;
use crate::models::{CacheEntry, ConsolidatedScore, RiskLevel, Subject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

const SUBJECT_COLUMNS: &str = "id, full_name, pan_number, annual_income, date_of_birth, occupation";

/// Last known-good score per subject. Used only as a fallback, never as a
/// primary source while any live bureau succeeds.
#[async_trait]
pub trait ScoreCache: Send + Sync {
    /// Best-effort write; retries internally, never propagates failure.
    /// Returns whether the entry was persisted.
    async fn write(
        &self,
        subject_id: Uuid,
        score: i32,
        risk_level: RiskLevel,
        full_result: Option<&ConsolidatedScore>,
    ) -> bool;

    /// Single best-effort lookup. Absence is a normal outcome, not an error.
    async fn read(&self, subject_id: Uuid) -> Option<CacheEntry>;
}

/// Collaborator-owned subject records. The scoring core reads subjects and
/// writes refreshed scores back onto their permanent record.
#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn find_subject(&self, id: Uuid) -> Result<Option<Subject>, AppError>;

    /// Subjects without a usable cached score, bounded by `limit`.
    async fn subjects_missing_cache(&self, limit: i64) -> Result<Vec<Subject>, AppError>;

    /// (total subjects, subjects with a cached score).
    async fn cache_counts(&self) -> Result<(i64, i64), AppError>;

    /// Persist a refreshed consolidated score onto the subject's record,
    /// including the cached-score fields and the full payload.
    async fn persist_refreshed_score(
        &self,
        id: Uuid,
        result: &ConsolidatedScore,
    ) -> Result<(), AppError>;
}

/// Postgres-backed implementation of both store traits.
pub struct PgStore {
    pool: PgPool,
    breaker: StoreCircuitBreaker,
    write_retries: u32,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_store_circuit_breaker(),
            write_retries: 3,
        }
    }

    async fn try_cache_write(
        &self,
        subject_id: Uuid,
        score: i32,
        risk_level: RiskLevel,
        payload: Option<&serde_json::Value>,
    ) -> Result<u64, failsafe::Error<sqlx::Error>> {
        // GREATEST keeps last_score_update monotonically non-decreasing even
        // if a lagging writer lands after a newer one.
        let query = sqlx::query(
            r#"
            UPDATE subjects
               SET cached_credit_score = $2,
                   risk_level = $3,
                   bureau_data = COALESCE($4, bureau_data),
                   last_score_update = GREATEST(COALESCE(last_score_update, 'epoch'::timestamptz), now())
             WHERE id = $1
            "#,
        )
        .bind(subject_id)
        .bind(score)
        .bind(risk_level.as_str())
        .bind(payload)
        .execute(&self.pool);

        let result = self.breaker.call(query).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ScoreCache for PgStore {
    async fn write(
        &self,
        subject_id: Uuid,
        score: i32,
        risk_level: RiskLevel,
        full_result: Option<&ConsolidatedScore>,
    ) -> bool {
        let payload = full_result.and_then(|r| match serde_json::to_value(r) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Failed to serialize consolidated result for cache: {}", e);
                None
            }
        });

        for attempt in 1..=self.write_retries {
            match self
                .try_cache_write(subject_id, score, risk_level, payload.as_ref())
                .await
            {
                Ok(rows) => {
                    if rows == 0 {
                        tracing::warn!("Cache write matched no subject: {}", subject_id);
                        return false;
                    }
                    return true;
                }
                Err(failsafe::Error::Rejected) => {
                    // Circuit open: the store is known-bad, skip the
                    // remaining retries instead of stacking sleeps.
                    tracing::warn!("Cache write rejected by circuit breaker for {}", subject_id);
                    return false;
                }
                Err(failsafe::Error::Inner(e)) => {
                    if attempt == self.write_retries {
                        tracing::error!(
                            "Cache write failed after {} retries for {}: {}",
                            self.write_retries,
                            subject_id,
                            e
                        );
                        return false;
                    }
                    tracing::warn!(
                        "Cache write attempt {} failed for {}: {}",
                        attempt,
                        subject_id,
                        e
                    );
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }
        false
    }

    async fn read(&self, subject_id: Uuid) -> Option<CacheEntry> {
        let row = sqlx::query(
            "SELECT cached_credit_score, risk_level, last_score_update, bureau_data
               FROM subjects WHERE id = $1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::warn!("Cache read failed for {}: {}", subject_id, e);
        })
        .ok()??;

        let score: Option<i32> = row.try_get("cached_credit_score").ok().flatten();
        let risk_level: Option<String> = row.try_get("risk_level").ok().flatten();
        let last_update: Option<DateTime<Utc>> = row.try_get("last_score_update").ok().flatten();
        let full_result: Option<serde_json::Value> = row.try_get("bureau_data").ok().flatten();

        // A zero or negative cached score is treated as absent, matching the
        // repair job's notion of a missing cache.
        let score = score.filter(|s| *s > 0);
        if score.is_none() && full_result.is_none() {
            return None;
        }

        Some(CacheEntry {
            score,
            risk_level: risk_level.and_then(|s| s.parse().ok()),
            last_update,
            full_result,
        })
    }
}

#[async_trait]
impl SubjectStore for PgStore {
    async fn find_subject(&self, id: Uuid) -> Result<Option<Subject>, AppError> {
        let subject = sqlx::query_as::<_, Subject>(&format!(
            "SELECT {} FROM subjects WHERE id = $1",
            SUBJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subject)
    }

    async fn subjects_missing_cache(&self, limit: i64) -> Result<Vec<Subject>, AppError> {
        let subjects = sqlx::query_as::<_, Subject>(&format!(
            "SELECT {} FROM subjects
              WHERE cached_credit_score IS NULL OR cached_credit_score <= 0
              ORDER BY id
              LIMIT $1",
            SUBJECT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(subjects)
    }

    async fn cache_counts(&self) -> Result<(i64, i64), AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE cached_credit_score > 0) AS with_cache
               FROM subjects",
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let with_cache: i64 = row.try_get("with_cache")?;
        Ok((total, with_cache))
    }

    async fn persist_refreshed_score(
        &self,
        id: Uuid,
        result: &ConsolidatedScore,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_value(result)
            .map_err(|e| AppError::InternalError(format!("Failed to serialize result: {}", e)))?;

        let updated = sqlx::query(
            r#"
            UPDATE subjects
               SET credit_score = $2,
                   cached_credit_score = $2,
                   risk_level = $3,
                   bureau_data = $4,
                   last_score_update = GREATEST(COALESCE(last_score_update, 'epoch'::timestamptz), now())
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result.consolidated_score)
        .bind(result.risk_level.as_str())
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Subject {} not found", id)));
        }
        Ok(())
    }
}
