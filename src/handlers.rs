use crate::aggregator::ScoreAggregator;
use crate::cache_repair::CacheRepairJob;
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::health::HealthMonitor;
use crate::models::{
    Bureau, BureauStatus, CacheStats, ConsolidatedScore, ScoreOrigin, Subject,
};
use crate::store::SubjectStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Multi-bureau aggregation engine.
    pub aggregator: Arc<ScoreAggregator>,
    /// Bureau health monitor (read for status, written by its own timer).
    pub health: Arc<dyn HealthMonitor>,
    /// Collaborator-owned subject records.
    pub subjects: Arc<dyn SubjectStore>,
    /// Background cache repair job (also invocable on demand).
    pub repair: Arc<CacheRepairJob>,
    /// Short-TTL memo of consolidated results to absorb repeat requests for
    /// the same subject without re-querying four bureaus.
    pub recent_score_cache: Cache<Uuid, ConsolidatedScore>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "credit-bureau-api",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/v1/bureau/consolidated-score
///
/// Consolidated weighted score for an inline subject profile. Persisted
/// subjects (with an id) get the short-TTL memo and cache write-through.
pub async fn consolidated_score(
    State(state): State<Arc<AppState>>,
    Json(subject): Json<Subject>,
) -> Result<Json<ConsolidatedScore>, AppError> {
    validate_subject(&subject)?;
    tracing::info!(
        "POST /bureau/consolidated-score - subject: {:?}",
        subject.id
    );

    if let Some(id) = subject.id {
        if let Some(recent) = state.recent_score_cache.get(&id).await {
            tracing::debug!("Recent-score memo hit for subject {}", id);
            return Ok(Json(recent));
        }
    }

    let result = state.aggregator.consolidated_score(&subject).await;

    if result.origin == ScoreOrigin::Live {
        if let Some(id) = subject.id {
            state.recent_score_cache.insert(id, result.clone()).await;
        }
    }

    Ok(Json(result))
}

/// GET /api/v1/bureau/all-scores/:subject_id
///
/// Per-bureau score map for a persisted subject. Each slot is a report or an
/// error descriptor; the call itself never fails on bureau errors.
pub async fn all_scores(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("GET /bureau/all-scores/{}", subject_id);

    let subject = state
        .subjects
        .find_subject(subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subject {} not found", subject_id)))?;

    let results = state.aggregator.all_scores(&subject).await;
    Ok(Json(json!({ "bureau_results": results })))
}

/// POST /api/v1/bureau/score/:bureau
///
/// Single-bureau score for an inline subject, with the full fallback chain.
pub async fn bureau_score(
    State(state): State<Arc<AppState>>,
    Path(bureau): Path<String>,
    Json(subject): Json<Subject>,
) -> Result<Json<crate::models::ScoreResult>, AppError> {
    let bureau: Bureau = bureau
        .parse()
        .map_err(|e: String| AppError::BadRequest(e))?;
    validate_subject(&subject)?;
    tracing::info!("POST /bureau/score/{}", bureau);

    let result = state.aggregator.bureau_score(&subject, bureau).await;
    Ok(Json(result))
}

/// POST /api/v1/bureau/refresh-score/:subject_id
///
/// Re-runs aggregation for a persisted subject and writes the result onto
/// its permanent record.
pub async fn refresh_score(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("POST /bureau/refresh-score/{}", subject_id);

    let subject = state
        .subjects
        .find_subject(subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subject {} not found", subject_id)))?;

    // A refresh must bypass and replace any memoized result.
    state.recent_score_cache.invalidate(&subject_id).await;

    let result = state.aggregator.consolidated_score(&subject).await;
    state
        .subjects
        .persist_refreshed_score(subject_id, &result)
        .await
        .context("Persisting refreshed score")?;

    if result.origin == ScoreOrigin::Live {
        state
            .recent_score_cache
            .insert(subject_id, result.clone())
            .await;
    }

    Ok(Json(json!({
        "message": "Credit score refreshed successfully",
        "data": result
    })))
}

/// GET /api/v1/bureau/health-status
pub async fn health_status(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(json!({ "data": state.health.status() }))
}

#[derive(Debug, Deserialize)]
pub struct StatusOverride {
    pub status: BureauStatus,
}

/// PUT /api/v1/bureau/health-status/:bureau
///
/// Manual status override for operator dashboards and failure drills.
pub async fn override_health_status(
    State(state): State<Arc<AppState>>,
    Path(bureau): Path<String>,
    Json(body): Json<StatusOverride>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bureau: Bureau = bureau
        .parse()
        .map_err(|e: String| AppError::BadRequest(e))?;

    state.health.set_status(bureau, body.status);
    Ok(Json(json!({
        "message": format!("{} status set to {:?}", bureau, body.status)
    })))
}

/// GET /api/v1/cache/stats
pub async fn cache_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CacheStats>, AppError> {
    let stats = state.repair.stats().await?;
    Ok(Json(stats))
}

/// POST /api/v1/cache/repair
///
/// Fire-and-forget trigger of the repair sweep. Returns immediately; an
/// already-running sweep makes this a no-op.
pub async fn trigger_repair(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    // The run slot is claimed before spawning, so the reported flag cannot
    // race with the sweep it just started.
    let started = state.repair.start_background();

    Json(json!({
        "message": "Cache repair job triggered",
        "already_running": !started
    }))
}

/// POST /api/v1/cache/repair/:subject_id
///
/// Repair one subject's cache entry with its baseline score.
pub async fn repair_subject(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let subject = state
        .subjects
        .find_subject(subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subject {} not found", subject_id)))?;

    let repaired = state.repair.repair_subject(&subject).await;
    if !repaired {
        return Err(AppError::InternalError(format!(
            "Failed to repair cache for subject {}",
            subject_id
        )));
    }

    Ok(Json(json!({
        "message": "Subject cache repaired successfully",
        "subject_id": subject_id
    })))
}

/// Inline subjects need at least a usable identity for seeding.
fn validate_subject(subject: &Subject) -> Result<(), AppError> {
    if subject.full_name.trim().is_empty()
        && subject
            .pan_number
            .as_deref()
            .map(|p| p.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(AppError::BadRequest(
            "Subject requires a full_name or pan_number".to_string(),
        ));
    }
    Ok(())
}
