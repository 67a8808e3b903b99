//! Background cache repair.
//!
//! Sweeps for subjects that have no cached score (created while bureaus or
//! the store were unavailable) and backfills them with the locally
//! computable baseline, restoring cache completeness over time.

use crate::models::{CacheStats, RiskLevel, Subject};
use crate::scoring::baseline_score;
use crate::store::{ScoreCache, SubjectStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::errors::AppError;

/// Recurring repair job. Overlap-guarded: a run that finds another already in
/// flight exits immediately without error.
pub struct CacheRepairJob {
    subjects: Arc<dyn SubjectStore>,
    cache: Arc<dyn ScoreCache>,
    batch_size: i64,
    running: AtomicBool,
}

/// Clears the in-progress flag on every exit path, including early returns
/// on store errors.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CacheRepairJob {
    pub fn new(subjects: Arc<dyn SubjectStore>, cache: Arc<dyn ScoreCache>, batch_size: i64) -> Self {
        Self {
            subjects,
            cache,
            batch_size,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Atomically claim the single run slot. The caller that wins must see
    /// the claim through to [`run_claimed`](Self::run_claimed).
    fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Backfill baseline scores for one batch of subjects lacking a cache
    /// entry. Returns the number of subjects repaired; 0 when another run is
    /// already in flight.
    pub async fn repair_missing(&self) -> usize {
        if !self.try_claim() {
            tracing::debug!("Cache repair already running, skipping");
            return 0;
        }
        self.run_claimed().await
    }

    /// Claim the run slot and run one sweep on a background task. Returns
    /// whether this call started the sweep; `false` means one was already in
    /// flight. Unlike polling [`is_running`](Self::is_running) before
    /// spawning, the claim happens before this returns, so the answer cannot
    /// race with the spawned task.
    pub fn start_background(self: &Arc<Self>) -> bool {
        if !self.try_claim() {
            tracing::debug!("Cache repair already running, not spawning");
            return false;
        }
        let job = Arc::clone(self);
        tokio::spawn(async move {
            job.run_claimed().await;
        });
        true
    }

    /// Body of one sweep. The run slot must already be held; it is released
    /// on every exit path.
    async fn run_claimed(&self) -> usize {
        let _guard = RunningGuard(&self.running);

        tracing::info!("Starting cache repair job");

        let missing = match self.subjects.subjects_missing_cache(self.batch_size).await {
            Ok(subjects) => subjects,
            Err(e) => {
                tracing::error!("Cache repair job failed to enumerate subjects: {}", e);
                return 0;
            }
        };

        tracing::info!("Found {} subjects with missing cache", missing.len());

        let mut repaired = 0;
        for subject in &missing {
            if self.repair_subject(subject).await {
                repaired += 1;
            }
        }

        tracing::info!("Cache repair job completed, repaired {}", repaired);
        repaired
    }

    /// Backfill one subject's cache with its baseline score. The cache's own
    /// retry policy applies; failure is logged and reported, not raised.
    pub async fn repair_subject(&self, subject: &Subject) -> bool {
        let Some(id) = subject.id else {
            tracing::warn!("Cannot repair cache for unpersisted subject");
            return false;
        };

        let score = baseline_score(subject);
        let persisted = self
            .cache
            .write(id, score, RiskLevel::from_score(score), None)
            .await;

        if persisted {
            tracing::info!("Repaired cache for subject {}: {}", id, score);
        } else {
            tracing::warn!("Failed to repair cache for subject {}", id);
        }
        persisted
    }

    /// Cache completeness statistics.
    pub async fn stats(&self) -> Result<CacheStats, AppError> {
        let (total, with_cache) = self.subjects.cache_counts().await?;
        let without_cache = total - with_cache;
        let hit_rate_pct = if total > 0 {
            (with_cache as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Ok(CacheStats {
            total_subjects: total,
            with_cache,
            without_cache,
            hit_rate_pct,
        })
    }
}

/// Owned handle for the scheduled repair loop.
pub struct RepairLoopHandle {
    handle: JoinHandle<()>,
}

impl RepairLoopHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Spawn the scheduled repair sweep: one run after `initial_delay` (so cold
/// starts do not stampede), then every `period`.
pub fn spawn_repair_loop(
    job: Arc<CacheRepairJob>,
    period: Duration,
    initial_delay: Duration,
) -> RepairLoopHandle {
    let handle = tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;
        job.repair_missing().await;

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval's first tick is immediate and we just ran; consume it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            job.repair_missing().await;
        }
    });
    RepairLoopHandle { handle }
}
