//! Simulated external bureau APIs.
//!
//! Each bureau has its own latency profile, failure rates and score
//! variation band, so the health monitor sees realistically heterogeneous
//! response-time distributions. Scores are `baseline(subject)` plus a
//! per-call bureau variation, clamped to the bureau's declared range; the
//! factor breakdown and synthetic accounts are derived from the subject's
//! stable seed so they stay consistent across calls.

use crate::errors::ProviderError;
use crate::models::{Bureau, BureauReport, CreditAccount, ScoreFactor, Subject};
use crate::scoring::{baseline_score, stable_seed};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rand::Rng;
use std::time::{Duration, Instant};

/// One external bureau's scoring API, as seen by the aggregator.
#[async_trait]
pub trait BureauProvider: Send + Sync {
    /// Fetch a score report for the subject from the named bureau.
    ///
    /// Callers must apply their own deadline: a simulated timeout stalls for
    /// several seconds before erroring, just like a real silent provider.
    async fn fetch_score(
        &self,
        bureau: Bureau,
        subject: &Subject,
    ) -> Result<BureauReport, ProviderError>;
}

/// Tuning knobs for the simulator. Tests use [`SimulatorSettings::instant`]
/// to strip out latency and failure injection.
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Chance per call that the provider rejects the connection outright.
    pub unavailable_chance: f64,
    /// Chance per call that the provider goes silent and times out.
    pub timeout_chance: f64,
    /// Multiplier applied to all simulated delays (1.0 = realistic).
    pub latency_scale: f64,
    /// How long a silent provider stalls before the simulated timeout fires.
    pub timeout_stall: Duration,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            unavailable_chance: 0.05,
            timeout_chance: 0.05,
            latency_scale: 1.0,
            timeout_stall: Duration::from_secs(5),
        }
    }
}

impl SimulatorSettings {
    /// No latency, no injected failures. For tests.
    pub fn instant() -> Self {
        Self {
            unavailable_chance: 0.0,
            timeout_chance: 0.0,
            latency_scale: 0.0,
            timeout_stall: Duration::ZERO,
        }
    }

    /// Every call fails with the given flavor. For tests.
    pub fn always_timeout() -> Self {
        Self {
            unavailable_chance: 0.0,
            timeout_chance: 1.0,
            latency_scale: 0.0,
            timeout_stall: Duration::ZERO,
        }
    }

    pub fn always_unavailable() -> Self {
        Self {
            unavailable_chance: 1.0,
            timeout_chance: 0.0,
            latency_scale: 0.0,
            timeout_stall: Duration::ZERO,
        }
    }
}

/// In-process stand-in for all four bureau APIs.
pub struct SimulatedBureaus {
    settings: SimulatorSettings,
}

impl SimulatedBureaus {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self { settings }
    }

    /// Base network delay per bureau, before jitter.
    fn base_delay_ms(bureau: Bureau) -> u64 {
        match bureau {
            Bureau::Cibil => 150,
            Bureau::Experian => 180,
            Bureau::Equifax => 220,
            Bureau::Crif => 160,
        }
    }

    /// Half-width of the per-call random score variation band.
    fn variation_band(bureau: Bureau) -> i32 {
        match bureau {
            Bureau::Cibil => 20,
            Bureau::Experian => 30,
            Bureau::Equifax => 25,
            Bureau::Crif => 35,
        }
    }
}

/// Random draws for one call, taken up front so the rng never crosses an
/// await point.
struct CallPlan {
    unavailable: bool,
    timeout: bool,
    delay: Duration,
    variation: i32,
}

impl CallPlan {
    fn draw(bureau: Bureau, settings: &SimulatorSettings) -> Self {
        let mut rng = rand::thread_rng();
        let roll: f64 = rng.gen();
        let unavailable = roll < settings.unavailable_chance;
        let timeout =
            !unavailable && roll < settings.unavailable_chance + settings.timeout_chance;

        let base = SimulatedBureaus::base_delay_ms(bureau) as f64;
        let jitter: f64 = rng.gen::<f64>() * 1800.0;
        let delay_ms = (base + jitter) * settings.latency_scale;

        let band = SimulatedBureaus::variation_band(bureau);
        let variation = rng.gen_range(-band..=band);

        Self {
            unavailable,
            timeout,
            delay: Duration::from_millis(delay_ms as u64),
            variation,
        }
    }
}

#[async_trait]
impl BureauProvider for SimulatedBureaus {
    async fn fetch_score(
        &self,
        bureau: Bureau,
        subject: &Subject,
    ) -> Result<BureauReport, ProviderError> {
        let started = Instant::now();
        let plan = CallPlan::draw(bureau, &self.settings);

        if plan.unavailable {
            tracing::debug!("{} simulated connection rejection", bureau);
            return Err(ProviderError::Unavailable { bureau });
        }

        if plan.timeout {
            // Go silent: stall, then fail. The aggregator's own deadline is
            // expected to fire first under realistic settings.
            tokio::time::sleep(self.settings.timeout_stall).await;
            tracing::debug!("{} simulated silent timeout", bureau);
            return Err(ProviderError::Timeout { bureau });
        }

        tokio::time::sleep(plan.delay).await;

        let (min, max) = bureau.descriptor().score_range;
        let score = (baseline_score(subject) + plan.variation).clamp(min, max);
        let seed = stable_seed(subject);

        Ok(BureauReport {
            bureau,
            score,
            score_range: format!("{}-{}", min, max),
            report_date: Utc::now(),
            factors: bureau_factors(bureau, seed),
            accounts: synthetic_accounts(seed),
            response_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Display-only factor breakdown, per bureau vocabulary. Values are seeded
/// from the subject so repeat reports agree.
fn bureau_factors(bureau: Bureau, seed: u64) -> Vec<ScoreFactor> {
    let factor = |name: &str, base: u64, span: u64| ScoreFactor {
        name: name.to_string(),
        value: (base + seed % span).min(100) as u8,
    };

    match bureau {
        Bureau::Cibil => vec![
            factor("Payment History", 70, 30),
            factor("Credit Utilization", 60, 40),
            factor("Credit Age", 50, 50),
            factor("Credit Mix", 65, 35),
            factor("New Credit", 75, 25),
        ],
        Bureau::Experian => vec![
            factor("Payment Behavior", 65, 35),
            factor("Account Utilization", 55, 45),
            factor("Account Age", 45, 55),
            factor("Account Types", 70, 30),
            factor("Recent Activity", 80, 20),
        ],
        Bureau::Equifax => vec![
            factor("Repayment History", 75, 25),
            factor("Balance Utilization", 50, 50),
            factor("Credit History", 40, 60),
            factor("Credit Portfolio", 60, 40),
            factor("Inquiries", 85, 15),
        ],
        Bureau::Crif => vec![
            factor("Credit Behavior", 80, 20),
            factor("Credit Exposure", 45, 55),
            factor("Credit Vintage", 35, 65),
            factor("Credit Diversity", 55, 45),
            factor("Credit Inquiries", 90, 10),
        ],
    }
}

const ACCOUNT_TYPES: [&str; 5] = [
    "Credit Card",
    "Personal Loan",
    "Home Loan",
    "Car Loan",
    "Business Loan",
];

const BANKS: [&str; 5] = [
    "HDFC Bank",
    "ICICI Bank",
    "SBI",
    "Axis Bank",
    "Kotak Mahindra",
];

/// 2-5 synthetic credit accounts derived from the subject seed.
fn synthetic_accounts(seed: u64) -> Vec<CreditAccount> {
    let count = 2 + (seed % 4) as usize;
    (0..count)
        .map(|i| {
            let s = seed.wrapping_add(i as u64 * 17);
            let open_date = NaiveDate::from_ymd_opt(
                2020 + (s % 4) as i32,
                1 + (s % 12) as u32,
                1 + (s % 28) as u32,
            )
            .unwrap_or_default();

            CreditAccount {
                account_type: ACCOUNT_TYPES[(s % ACCOUNT_TYPES.len() as u64) as usize].to_string(),
                bank: BANKS[(s % BANKS.len() as u64) as usize].to_string(),
                account_number: format!("****{}", 1000 + s % 9000),
                open_date,
                current_balance: (s % 500_000) as i64 + 10_000,
                credit_limit: (s % 1_000_000) as i64 + 50_000,
                payment_status: if s % 10 == 0 { "Late" } else { "Current" }.to_string(),
                months_reviewed: 12 + (s % 24) as u32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_accounts_are_bounded_and_deterministic() {
        for seed in [0u64, 1, 17, u64::MAX] {
            let accounts = synthetic_accounts(seed);
            assert!((2..=5).contains(&accounts.len()));
            assert_eq!(
                serde_json::to_string(&accounts).unwrap(),
                serde_json::to_string(&synthetic_accounts(seed)).unwrap()
            );
        }
    }

    #[test]
    fn factors_never_exceed_one_hundred() {
        for bureau in Bureau::ALL {
            for seed in [0u64, 99, 12345, u64::MAX] {
                for factor in bureau_factors(bureau, seed) {
                    assert!(factor.value <= 100);
                }
            }
        }
    }
}
