//! Multi-bureau score aggregation.
//!
//! Fans out to every enabled bureau the health monitor has not marked DOWN,
//! waits for all of them (success or failure, no early return), and folds
//! the successes into a weighted consolidated score. A single bureau failure
//! never fails the aggregation; only total failure takes the fallback path,
//! which prefers the persisted cache over a freshly computed baseline.

use crate::errors::ProviderError;
use crate::health::HealthMonitor;
use crate::models::{
    Bureau, BureauOutcome, BureauReport, BureauStatus, ConsolidatedScore, RiskLevel, ScoreOrigin,
    ScoreResult, Subject,
};
use crate::providers::BureauProvider;
use crate::scoring::baseline_score;
use crate::store::ScoreCache;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct ScoreAggregator {
    provider: Arc<dyn BureauProvider>,
    health: Arc<dyn HealthMonitor>,
    cache: Arc<dyn ScoreCache>,
    /// Hard deadline per bureau call, independent of the provider's own
    /// simulated delays.
    call_timeout: Duration,
}

impl ScoreAggregator {
    pub fn new(
        provider: Arc<dyn BureauProvider>,
        health: Arc<dyn HealthMonitor>,
        cache: Arc<dyn ScoreCache>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            health,
            cache,
            call_timeout,
        }
    }

    /// Weighted average of the succeeding bureaus' scores, with weights
    /// renormalized so partial failure still yields a proper weighted
    /// average. `None` when nothing succeeded.
    pub fn weighted_consolidated(scores: &[(f64, i32)]) -> Option<i32> {
        let total_weight: f64 = scores.iter().map(|(w, _)| w).sum();
        if total_weight <= 0.0 {
            return None;
        }
        let weighted_sum: f64 = scores.iter().map(|(w, s)| w * *s as f64).sum();
        Some((weighted_sum / total_weight).round() as i32)
    }

    /// Score from one bureau, with the full fallback chain. Never fails:
    /// bureau errors degrade to cached or baseline scores.
    pub async fn bureau_score(&self, subject: &Subject, bureau: Bureau) -> ScoreResult {
        let descriptor = bureau.descriptor();
        let health = self.health.status();
        let marked_down = health
            .get(&bureau)
            .map(|r| r.status == BureauStatus::Down)
            .unwrap_or(false);

        if !descriptor.enabled || marked_down {
            return self
                .fallback_result(subject, bureau, "Bureau unavailable")
                .await;
        }

        match self.dispatch(bureau, subject).await {
            Ok(report) => {
                // Write-through, best effort. A cache failure must not fail
                // the scoring call.
                if let Some(id) = subject.id {
                    let risk = RiskLevel::from_score(report.score);
                    if !self.cache.write(id, report.score, risk, None).await {
                        tracing::warn!("Cache write-through failed for subject {}", id);
                    }
                }

                ScoreResult {
                    bureau,
                    score: report.score,
                    risk_level: RiskLevel::from_score(report.score),
                    origin: ScoreOrigin::Live,
                    report_date: report.report_date,
                    factors: report
                        .factors
                        .iter()
                        .map(|f| format!("{}: {}%", f.name, f.value))
                        .collect(),
                }
            }
            Err(e) => {
                tracing::warn!("Bureau API error for {}: {}", bureau, e);
                self.fallback_result(subject, bureau, &e.to_string()).await
            }
        }
    }

    /// All bureaus in parallel. Each slot is a report or an error
    /// descriptor; this never fails as a whole.
    pub async fn all_scores(&self, subject: &Subject) -> HashMap<Bureau, BureauOutcome> {
        self.fan_out(subject).await
    }

    /// One consolidated score across all usable bureaus.
    pub async fn consolidated_score(&self, subject: &Subject) -> ConsolidatedScore {
        let outcomes = self.fan_out(subject).await;

        let successes: Vec<(f64, i32)> = outcomes
            .iter()
            .filter_map(|(bureau, outcome)| {
                outcome
                    .report()
                    .map(|r| (bureau.descriptor().weight, r.score))
            })
            .collect();

        let (consolidated, origin) = match Self::weighted_consolidated(&successes) {
            Some(score) => (score, ScoreOrigin::Live),
            None => {
                tracing::warn!(
                    "All bureaus failed for subject {:?}, falling back",
                    subject.id
                );
                self.fallback_score(subject).await
            }
        };

        let result = ConsolidatedScore {
            consolidated_score: consolidated,
            risk_level: RiskLevel::from_score(consolidated),
            origin,
            bureau_results: outcomes,
            report_date: Utc::now(),
        };

        // Persist the last known-good score, best effort.
        if origin == ScoreOrigin::Live {
            if let Some(id) = subject.id {
                if !self
                    .cache
                    .write(id, consolidated, result.risk_level, Some(&result))
                    .await
                {
                    tracing::warn!("Consolidated cache write failed for subject {}", id);
                }
            }
        }

        result
    }

    /// Dispatch every enabled, non-DOWN bureau concurrently and collect all
    /// outcomes. Bureaus marked DOWN are recorded as failed without a call.
    async fn fan_out(&self, subject: &Subject) -> HashMap<Bureau, BureauOutcome> {
        let health = self.health.status();
        let mut outcomes = HashMap::new();
        let mut in_flight = Vec::new();

        for bureau in Bureau::ALL {
            let descriptor = bureau.descriptor();
            if !descriptor.enabled {
                outcomes.insert(
                    bureau,
                    BureauOutcome::Failed {
                        error: format!("{} is disabled", bureau),
                    },
                );
                continue;
            }

            let marked_down = health
                .get(&bureau)
                .map(|r| r.status == BureauStatus::Down)
                .unwrap_or(false);
            if marked_down {
                // Cost avoidance: no network attempt against a known-bad
                // provider.
                outcomes.insert(
                    bureau,
                    BureauOutcome::Failed {
                        error: format!("{} marked DOWN by health monitor", bureau),
                    },
                );
                continue;
            }

            let provider = Arc::clone(&self.provider);
            let subject = subject.clone();
            let timeout = self.call_timeout;
            in_flight.push((
                bureau,
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, provider.fetch_score(bureau, &subject))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout { bureau }),
                    }
                }),
            ));
        }

        // Fan-in: wait for every dispatched call, no early return.
        for (bureau, task) in in_flight {
            let outcome = match task.await {
                Ok(Ok(report)) => BureauOutcome::Report(report),
                Ok(Err(e)) => {
                    tracing::warn!("Bureau API error for {}: {}", bureau, e);
                    BureauOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    tracing::error!("Bureau dispatch task for {} failed: {}", bureau, e);
                    BureauOutcome::Failed {
                        error: format!("{} dispatch failed", bureau),
                    }
                }
            };
            outcomes.insert(bureau, outcome);
        }

        outcomes
    }

    async fn dispatch(&self, bureau: Bureau, subject: &Subject) -> Result<BureauReport, ProviderError> {
        match tokio::time::timeout(self.call_timeout, self.provider.fetch_score(bureau, subject))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout { bureau }),
        }
    }

    /// Fallback priority: cached score, then the consolidated score inside
    /// the last full cached payload, then a fresh baseline.
    async fn fallback_score(&self, subject: &Subject) -> (i32, ScoreOrigin) {
        if let Some(entry) = self.read_cache(subject.id).await {
            if let Some(score) = entry.score {
                return (score, ScoreOrigin::Cached);
            }
            if let Some(score) = entry
                .full_result
                .as_ref()
                .and_then(|v| v.get("consolidated_score"))
                .and_then(|v| v.as_i64())
            {
                return (score as i32, ScoreOrigin::Cached);
            }
        }
        (baseline_score(subject), ScoreOrigin::Fallback)
    }

    async fn fallback_result(
        &self,
        subject: &Subject,
        bureau: Bureau,
        reason: &str,
    ) -> ScoreResult {
        let (score, origin) = self.fallback_score(subject).await;
        let factors = match origin {
            ScoreOrigin::Cached => vec!["Cached score from previous calculation".to_string()],
            _ => vec![reason.to_string()],
        };

        ScoreResult {
            bureau,
            score,
            risk_level: RiskLevel::from_score(score),
            origin,
            report_date: Utc::now(),
            factors,
        }
    }

    async fn read_cache(&self, subject_id: Option<Uuid>) -> Option<crate::models::CacheEntry> {
        self.cache.read(subject_id?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renormalizes_weights_over_successes() {
        // Sole success carries the whole result regardless of its weight.
        assert_eq!(
            ScoreAggregator::weighted_consolidated(&[(0.40, 820)]),
            Some(820)
        );

        // Two equal weights average evenly.
        assert_eq!(
            ScoreAggregator::weighted_consolidated(&[(0.25, 700), (0.25, 800)]),
            Some(750)
        );
    }

    #[test]
    fn consolidated_stays_within_input_bounds() {
        let scores = [(0.40, 812), (0.25, 745), (0.25, 790), (0.10, 845)];
        let result = ScoreAggregator::weighted_consolidated(&scores).unwrap();
        assert!(result >= 745 && result <= 845);
    }

    #[test]
    fn no_successes_yields_none() {
        assert_eq!(ScoreAggregator::weighted_consolidated(&[]), None);
    }
}
