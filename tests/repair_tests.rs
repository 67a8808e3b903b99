//! Cache repair job behavior against in-memory collaborators.

use async_trait::async_trait;
use chrono::Utc;
use credit_bureau_api::cache_repair::CacheRepairJob;
use credit_bureau_api::errors::AppError;
use credit_bureau_api::models::{CacheEntry, ConsolidatedScore, RiskLevel, Subject};
use credit_bureau_api::scoring::baseline_score;
use credit_bureau_api::store::{ScoreCache, SubjectStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn make_subject(name: &str) -> Subject {
    Subject {
        id: Some(Uuid::new_v4()),
        full_name: name.to_string(),
        pan_number: None,
        annual_income: Some("₹4,00,000".to_string()),
        date_of_birth: None,
        occupation: Some("Analyst".to_string()),
    }
}

/// Subject store whose "missing cache" set is whatever the shared cache map
/// does not contain.
struct MemoryStore {
    subjects: Vec<Subject>,
    cache: Arc<MemoryCache>,
}

#[async_trait]
impl SubjectStore for MemoryStore {
    async fn find_subject(&self, id: Uuid) -> Result<Option<Subject>, AppError> {
        Ok(self.subjects.iter().find(|s| s.id == Some(id)).cloned())
    }

    async fn subjects_missing_cache(&self, limit: i64) -> Result<Vec<Subject>, AppError> {
        let cached = self.cache.entries.lock().unwrap();
        Ok(self
            .subjects
            .iter()
            .filter(|s| !cached.contains_key(&s.id.unwrap()))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn cache_counts(&self) -> Result<(i64, i64), AppError> {
        let cached = self.cache.entries.lock().unwrap();
        let total = self.subjects.len() as i64;
        let with_cache = self
            .subjects
            .iter()
            .filter(|s| cached.contains_key(&s.id.unwrap()))
            .count() as i64;
        Ok((total, with_cache))
    }

    async fn persist_refreshed_score(
        &self,
        _id: Uuid,
        _result: &ConsolidatedScore,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

/// In-memory cache with a configurable write delay and a write counter.
#[derive(Default)]
struct MemoryCache {
    entries: Mutex<HashMap<Uuid, CacheEntry>>,
    writes: AtomicUsize,
    write_delay: Option<Duration>,
}

#[async_trait]
impl ScoreCache for MemoryCache {
    async fn write(
        &self,
        subject_id: Uuid,
        score: i32,
        risk_level: RiskLevel,
        _full_result: Option<&ConsolidatedScore>,
    ) -> bool {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(
            subject_id,
            CacheEntry {
                score: Some(score),
                risk_level: Some(risk_level),
                last_update: Some(Utc::now()),
                full_result: None,
            },
        );
        true
    }

    async fn read(&self, subject_id: Uuid) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(&subject_id).cloned()
    }
}

fn fixture(count: usize, write_delay: Option<Duration>) -> (Arc<CacheRepairJob>, Arc<MemoryCache>, Vec<Subject>) {
    let cache = Arc::new(MemoryCache {
        write_delay,
        ..MemoryCache::default()
    });
    let subjects: Vec<Subject> = (0..count).map(|i| make_subject(&format!("Subject {}", i))).collect();
    let store = Arc::new(MemoryStore {
        subjects: subjects.clone(),
        cache: Arc::clone(&cache),
    });
    let job = Arc::new(CacheRepairJob::new(
        store,
        Arc::clone(&cache) as Arc<dyn ScoreCache>,
        50,
    ));
    (job, cache, subjects)
}

#[tokio::test]
async fn repair_backfills_baseline_scores() {
    let (job, cache, subjects) = fixture(5, None);

    let repaired = job.repair_missing().await;
    assert_eq!(repaired, 5);

    for subject in &subjects {
        let entry = cache.read(subject.id.unwrap()).await.unwrap();
        assert_eq!(entry.score, Some(baseline_score(subject)));
        assert_eq!(
            entry.risk_level,
            Some(RiskLevel::from_score(baseline_score(subject)))
        );
    }
}

#[tokio::test]
async fn second_run_finds_nothing_to_repair() {
    let (job, _cache, _subjects) = fixture(3, None);

    assert_eq!(job.repair_missing().await, 3);
    assert_eq!(job.repair_missing().await, 0);
}

#[tokio::test]
async fn concurrent_runs_do_not_double_repair() {
    // Slow writes keep the first run in flight while the second starts.
    let (job, cache, _subjects) = fixture(4, Some(Duration::from_millis(50)));

    let first = tokio::spawn({
        let job = Arc::clone(&job);
        async move { job.repair_missing().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = job.repair_missing().await;

    assert_eq!(second, 0);
    assert_eq!(first.await.unwrap(), 4);
    assert_eq!(cache.writes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn background_start_claims_the_run_slot_before_returning() {
    // Slow writes keep the spawned sweep in flight long enough to observe.
    let (job, cache, _subjects) = fixture(3, Some(Duration::from_millis(50)));

    assert!(job.start_background());
    // The claim happens synchronously, so a second trigger is refused even
    // before the spawned task gets a chance to run.
    assert!(job.is_running());
    assert!(!job.start_background());
    assert_eq!(job.repair_missing().await, 0);

    // Wait out the sweep and check it ran exactly once.
    tokio::time::timeout(Duration::from_secs(5), async {
        while job.is_running() || cache.writes.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sweep did not finish");
    assert_eq!(cache.writes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn repair_subject_requires_a_persisted_id() {
    let (job, _cache, _subjects) = fixture(1, None);
    let unpersisted = Subject {
        id: None,
        ..make_subject("Ghost")
    };
    assert!(!job.repair_subject(&unpersisted).await);
}

#[tokio::test]
async fn stats_reflect_cache_completeness() {
    let (job, _cache, subjects) = fixture(10, None);

    // Repair 7 of the 10 by hand.
    for subject in subjects.iter().take(7) {
        assert!(job.repair_subject(subject).await);
    }

    let stats = job.stats().await.unwrap();
    assert_eq!(stats.total_subjects, 10);
    assert_eq!(stats.with_cache, 7);
    assert_eq!(stats.without_cache, 3);
    assert!((stats.hit_rate_pct - 70.0).abs() < 1e-9);
}

#[tokio::test]
async fn batch_size_bounds_one_run() {
    let cache = Arc::new(MemoryCache::default());
    let subjects: Vec<Subject> = (0..8).map(|i| make_subject(&format!("S{}", i))).collect();
    let store = Arc::new(MemoryStore {
        subjects,
        cache: Arc::clone(&cache),
    });
    let job = CacheRepairJob::new(store, Arc::clone(&cache) as Arc<dyn ScoreCache>, 3);

    assert_eq!(job.repair_missing().await, 3);
    assert_eq!(job.repair_missing().await, 3);
    assert_eq!(job.repair_missing().await, 2);
    assert_eq!(job.repair_missing().await, 0);
}
