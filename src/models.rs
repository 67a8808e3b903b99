use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Bureau Registry ============

/// The four simulated credit bureaus queried during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bureau {
    Cibil,
    Experian,
    Equifax,
    Crif,
}

impl Bureau {
    /// All bureaus, in aggregation-weight order.
    pub const ALL: [Bureau; 4] = [
        Bureau::Cibil,
        Bureau::Experian,
        Bureau::Equifax,
        Bureau::Crif,
    ];

    /// Static configuration for this bureau. Weights across all four sum to 1.0.
    pub fn descriptor(self) -> &'static BureauDescriptor {
        match self {
            Bureau::Cibil => &BureauDescriptor {
                bureau: Bureau::Cibil,
                display_name: "CIBIL TransUnion",
                weight: 0.40,
                score_range: (300, 900),
                enabled: true,
            },
            Bureau::Experian => &BureauDescriptor {
                bureau: Bureau::Experian,
                display_name: "Experian",
                weight: 0.25,
                score_range: (300, 850),
                enabled: true,
            },
            Bureau::Equifax => &BureauDescriptor {
                bureau: Bureau::Equifax,
                display_name: "Equifax",
                weight: 0.25,
                score_range: (280, 850),
                enabled: true,
            },
            Bureau::Crif => &BureauDescriptor {
                bureau: Bureau::Crif,
                display_name: "CRIF High Mark",
                weight: 0.10,
                score_range: (300, 900),
                enabled: true,
            },
        }
    }
}

impl fmt::Display for Bureau {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bureau::Cibil => "CIBIL",
            Bureau::Experian => "EXPERIAN",
            Bureau::Equifax => "EQUIFAX",
            Bureau::Crif => "CRIF",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Bureau {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CIBIL" => Ok(Bureau::Cibil),
            "EXPERIAN" => Ok(Bureau::Experian),
            "EQUIFAX" => Ok(Bureau::Equifax),
            "CRIF" => Ok(Bureau::Crif),
            other => Err(format!("Unknown bureau: {}", other)),
        }
    }
}

/// Static per-bureau configuration, immutable for the process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct BureauDescriptor {
    pub bureau: Bureau,
    pub display_name: &'static str,
    /// Aggregation weight; renormalized over the bureaus that actually succeed.
    pub weight: f64,
    /// Declared (min, max) score range for this bureau.
    pub score_range: (i32, i32),
    pub enabled: bool,
}

// ============ Subject ============

/// The individual whose credit score is being computed.
///
/// Owned by the subject store; the scoring core receives it by value per
/// request and writes back only through the score cache.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subject {
    /// Stable identifier; absent for inline (unpersisted) scoring requests.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub full_name: String,
    #[serde(default)]
    pub pan_number: Option<String>,
    /// Free-form income string, e.g. "₹12,00,000". Digits are extracted for scoring.
    #[serde(default)]
    pub annual_income: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub occupation: Option<String>,
}

impl Subject {
    /// The most stable identifier available, used to seed deterministic
    /// per-subject values (baseline offset, synthetic accounts).
    pub fn identity_key(&self) -> &str {
        if let Some(ref pan) = self.pan_number {
            if !pan.trim().is_empty() {
                return pan;
            }
        }
        &self.full_name
    }
}

// ============ Risk Classification ============

/// Coarse risk tier derived from a consolidated score on the 300-900 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: i32) -> Self {
        if score >= 750 {
            RiskLevel::Low
        } else if score >= 650 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(RiskLevel::Low),
            "Medium" => Ok(RiskLevel::Medium),
            "High" => Ok(RiskLevel::High),
            other => Err(format!("Unknown risk level: {}", other)),
        }
    }
}

// ============ Provider Results ============

/// Named sub-score in a bureau report. Display-only; not used in scoring math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreFactor {
    pub name: String,
    /// Percentage contribution, 0-100.
    pub value: u8,
}

/// Synthetic credit account attached to a bureau report for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    pub account_type: String,
    pub bank: String,
    /// Masked, e.g. "****4821".
    pub account_number: String,
    pub open_date: NaiveDate,
    pub current_balance: i64,
    pub credit_limit: i64,
    pub payment_status: String,
    pub months_reviewed: u32,
}

/// Successful outcome of one bureau call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BureauReport {
    pub bureau: Bureau,
    /// Always within the bureau's declared score range.
    pub score: i32,
    pub score_range: String,
    pub report_date: DateTime<Utc>,
    pub factors: Vec<ScoreFactor>,
    pub accounts: Vec<CreditAccount>,
    pub response_time_ms: u64,
}

/// Per-bureau slot in an aggregation response: a report or an error message,
/// never a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BureauOutcome {
    Report(BureauReport),
    Failed { error: String },
}

impl BureauOutcome {
    pub fn report(&self) -> Option<&BureauReport> {
        match self {
            BureauOutcome::Report(r) => Some(r),
            BureauOutcome::Failed { .. } => None,
        }
    }
}

/// Where a returned score came from, so consumers can display data freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreOrigin {
    /// Computed from at least one live bureau response.
    Live,
    /// Served from the persisted score cache.
    Cached,
    /// Freshly computed internal baseline; no bureau or cache available.
    Fallback,
}

/// Single-bureau score response, including the fallback paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub bureau: Bureau,
    pub score: i32,
    pub risk_level: RiskLevel,
    pub origin: ScoreOrigin,
    pub report_date: DateTime<Utc>,
    pub factors: Vec<String>,
}

/// Weighted-average score across the bureaus that answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedScore {
    pub consolidated_score: i32,
    pub risk_level: RiskLevel,
    pub origin: ScoreOrigin,
    pub bureau_results: HashMap<Bureau, BureauOutcome>,
    pub report_date: DateTime<Utc>,
}

// ============ Health ============

/// Operational status of one bureau as seen by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BureauStatus {
    Up,
    Slow,
    Down,
}

/// Rolling health view for one bureau. Written only by the health monitor;
/// read by aggregation before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: BureauStatus,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: u64,
    /// Rolling uptime percentage, always within [0, 100].
    pub uptime_pct: f64,
}

// ============ Cache ============

/// Last known-good score persisted per subject, used only as a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub score: Option<i32>,
    pub risk_level: Option<RiskLevel>,
    pub last_update: Option<DateTime<Utc>>,
    /// Full last aggregation payload, when one was stored.
    pub full_result: Option<serde_json::Value>,
}

/// Cache completeness statistics reported by the repair job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_subjects: i64,
    pub with_cache: i64,
    pub without_cache: i64,
    pub hit_rate_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bureau_weights_sum_to_one() {
        let total: f64 = Bureau::ALL.iter().map(|b| b.descriptor().weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bureau_parses_case_insensitively() {
        assert_eq!("cibil".parse::<Bureau>().unwrap(), Bureau::Cibil);
        assert_eq!("EXPERIAN".parse::<Bureau>().unwrap(), Bureau::Experian);
        assert_eq!("Equifax".parse::<Bureau>().unwrap(), Bureau::Equifax);
        assert!("TRANSUNION".parse::<Bureau>().is_err());
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(750), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(749), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(650), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(649), RiskLevel::High);
    }

    #[test]
    fn bureau_serializes_as_upper_snake() {
        let json = serde_json::to_string(&Bureau::Cibil).unwrap();
        assert_eq!(json, "\"CIBIL\"");
    }

    #[test]
    fn identity_key_prefers_pan() {
        let subject = Subject {
            id: None,
            full_name: "Asha Rao".to_string(),
            pan_number: Some("ABCDE1234F".to_string()),
            annual_income: None,
            date_of_birth: None,
            occupation: None,
        };
        assert_eq!(subject.identity_key(), "ABCDE1234F");

        let unnamed = Subject {
            pan_number: Some("  ".to_string()),
            ..subject
        };
        assert_eq!(unnamed.identity_key(), "Asha Rao");
    }
}
