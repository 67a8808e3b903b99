//! Bureau health monitoring.
//!
//! Maintains a best-effort, eventually-consistent view of each bureau's
//! operational status on a timer that is fully decoupled from request
//! handling. The aggregator consults the snapshot before dispatch and skips
//! bureaus currently DOWN without spending a network call on them.

use crate::models::{Bureau, BureauStatus, HealthRecord};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Response times above this are classified SLOW.
pub const SLOW_THRESHOLD_MS: u64 = 2000;

/// Read/probe interface over per-bureau health state.
///
/// Writers are exclusively the health-check timer (and the manual override);
/// readers are aggregation calls. Last-writer-wins, no transactional needs.
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Probe one bureau and update its record.
    async fn check_one(&self, bureau: Bureau) -> HealthRecord;

    /// Probe every bureau and return the refreshed map.
    async fn check_all(&self) -> HashMap<Bureau, HealthRecord>;

    /// Read-only snapshot of the current status map.
    fn status(&self) -> HashMap<Bureau, HealthRecord>;

    /// Bureaus currently UP.
    fn available(&self) -> Vec<Bureau>;

    /// Manual status override, for operator dashboards and tests.
    fn set_status(&self, bureau: Bureau, status: BureauStatus);
}

/// Probe tuning. Tests scale latency to zero.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// Multiplier applied to simulated probe delays.
    pub probe_scale: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { probe_scale: 1.0 }
    }
}

impl HealthSettings {
    pub fn instant() -> Self {
        Self { probe_scale: 0.0 }
    }
}

/// Simulated health probes with per-bureau demo profiles.
///
/// Production deployments would swap in real network probes behind the same
/// [`HealthMonitor`] trait without touching the aggregator.
pub struct SimulatedHealth {
    records: RwLock<HashMap<Bureau, HealthRecord>>,
    settings: HealthSettings,
}

impl SimulatedHealth {
    /// Starts every bureau with an optimistic UP record.
    pub fn new(settings: HealthSettings) -> Self {
        let now = Utc::now();
        let records = Bureau::ALL
            .iter()
            .map(|&bureau| {
                (
                    bureau,
                    HealthRecord {
                        status: BureauStatus::Up,
                        last_check: now,
                        response_time_ms: 0,
                        uptime_pct: uptime_baseline(bureau),
                    },
                )
            })
            .collect();

        Self {
            records: RwLock::new(records),
            settings,
        }
    }

    /// Draw a simulated status for a bureau. Profiles mirror the observed
    /// behavior of the real providers: CIBIL flaps the most, Equifax is
    /// chronically slow.
    fn draw_status(bureau: Bureau) -> (BureauStatus, u64) {
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.gen();

        let status = match bureau {
            Bureau::Cibil => {
                if roll < 0.10 {
                    BureauStatus::Down
                } else if roll < 0.20 {
                    BureauStatus::Slow
                } else {
                    BureauStatus::Up
                }
            }
            Bureau::Equifax => BureauStatus::Slow,
            _ => {
                if roll < 0.05 {
                    BureauStatus::Down
                } else if roll < 0.15 {
                    BureauStatus::Slow
                } else {
                    BureauStatus::Up
                }
            }
        };

        let response_time_ms = match status {
            BureauStatus::Down => 0,
            BureauStatus::Slow => 250 + (rng.gen::<f64>() * 300.0) as u64,
            BureauStatus::Up => 80 + (rng.gen::<f64>() * 200.0) as u64,
        };

        (status, response_time_ms)
    }
}

/// Per-bureau rolling-uptime baseline percentage.
fn uptime_baseline(bureau: Bureau) -> f64 {
    match bureau {
        Bureau::Cibil => 99.5,
        Bureau::Experian => 99.2,
        Bureau::Equifax => 97.8,
        Bureau::Crif => 99.7,
    }
}

/// Baseline with ±1% jitter, floored at 95 and capped at 100.
fn rolled_uptime(bureau: Bureau) -> f64 {
    let jitter = (rand::thread_rng().gen::<f64>() - 0.5) * 2.0;
    (uptime_baseline(bureau) + jitter).clamp(95.0, 100.0)
}

#[async_trait]
impl HealthMonitor for SimulatedHealth {
    async fn check_one(&self, bureau: Bureau) -> HealthRecord {
        // Simulated probe round-trip.
        let probe_ms = {
            let mut rng = rand::thread_rng();
            ((200.0 + rng.gen::<f64>() * 1000.0) * self.settings.probe_scale) as u64
        };
        tokio::time::sleep(Duration::from_millis(probe_ms)).await;

        let (mut status, response_time_ms) = Self::draw_status(bureau);
        if status != BureauStatus::Down && response_time_ms > SLOW_THRESHOLD_MS {
            status = BureauStatus::Slow;
        }

        let record = HealthRecord {
            status,
            last_check: Utc::now(),
            response_time_ms,
            uptime_pct: rolled_uptime(bureau),
        };

        if let Ok(mut records) = self.records.write() {
            records.insert(bureau, record.clone());
        }

        tracing::debug!(
            "Health check {}: {:?} ({}ms)",
            bureau,
            record.status,
            record.response_time_ms
        );
        record
    }

    async fn check_all(&self) -> HashMap<Bureau, HealthRecord> {
        for bureau in Bureau::ALL {
            self.check_one(bureau).await;
        }
        self.status()
    }

    fn status(&self) -> HashMap<Bureau, HealthRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn available(&self) -> Vec<Bureau> {
        self.status()
            .into_iter()
            .filter(|(_, record)| record.status == BureauStatus::Up)
            .map(|(bureau, _)| bureau)
            .collect()
    }

    fn set_status(&self, bureau: Bureau, status: BureauStatus) {
        if let Ok(mut records) = self.records.write() {
            if let Some(record) = records.get_mut(&bureau) {
                record.status = status;
                record.last_check = Utc::now();
            }
        }
        tracing::info!("Bureau {} status manually set to {:?}", bureau, status);
    }
}

/// Owned handle for the background health loop; aborting it stops the checks.
pub struct HealthLoopHandle {
    handle: JoinHandle<()>,
}

impl HealthLoopHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Spawn the periodic health sweep. The first sweep runs immediately, then
/// every `period`.
pub fn spawn_health_loop(
    monitor: Arc<SimulatedHealth>,
    period: Duration,
) -> HealthLoopHandle {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            monitor.check_all().await;
        }
    });
    HealthLoopHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initial_records_are_optimistic() {
        let health = SimulatedHealth::new(HealthSettings::instant());
        let status = health.status();
        assert_eq!(status.len(), 4);
        assert!(status.values().all(|r| r.status == BureauStatus::Up));
        assert_eq!(health.available().len(), 4);
    }

    #[tokio::test]
    async fn uptime_stays_in_bounds_across_checks() {
        let health = SimulatedHealth::new(HealthSettings::instant());
        for _ in 0..20 {
            let records = health.check_all().await;
            for record in records.values() {
                assert!(record.uptime_pct >= 0.0 && record.uptime_pct <= 100.0);
            }
        }
    }

    #[tokio::test]
    async fn manual_override_sticks_until_next_check() {
        let health = SimulatedHealth::new(HealthSettings::instant());
        health.set_status(Bureau::Cibil, BureauStatus::Down);

        let status = health.status();
        assert_eq!(status[&Bureau::Cibil].status, BureauStatus::Down);
        assert!(!health.available().contains(&Bureau::Cibil));
    }
}
