//! Locally computable baseline score.
//!
//! Pure functions over subject attributes only: no network, no cache, no
//! shared state. When all bureaus and the cache are gone the baseline is
//! still computable, so a score can always be returned.

use crate::models::Subject;
use chrono::{Datelike, Utc};
use sha2::{Digest, Sha256};

pub const SCORE_FLOOR: i32 = 300;
pub const SCORE_CEILING: i32 = 900;

/// Deterministic baseline score in [300, 900] derived from subject attributes.
///
/// Each factor degrades independently to a default point value when its input
/// is missing or malformed; the result is clamped and can never be NaN or out
/// of range. Calling twice with the same subject yields the same score.
pub fn baseline_score(subject: &Subject) -> i32 {
    let mut score = SCORE_FLOOR;

    score += income_points(subject.annual_income.as_deref());
    score += age_points(subject);
    score += occupation_points(subject.occupation.as_deref());
    score += identity_offset(subject);

    score.clamp(SCORE_FLOOR, SCORE_CEILING)
}

/// Income bracket contribution, 50-200 points. Non-numeric characters
/// (currency symbols, separators) are stripped before parsing.
fn income_points(annual_income: Option<&str>) -> i32 {
    let digits: String = annual_income
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    match digits.parse::<i64>() {
        Ok(income) if income > 1_000_000 => 200,
        Ok(income) if income > 500_000 => 150,
        Ok(income) if income > 300_000 => 100,
        Ok(_) => 50,
        Err(_) => {
            tracing::debug!("No parseable income, using default points");
            50
        }
    }
}

/// Age bucket contribution, 30-100 points; 50 when date of birth is missing.
fn age_points(subject: &Subject) -> i32 {
    let Some(dob) = subject.date_of_birth else {
        return 50;
    };

    let age = Utc::now().date_naive().year() - dob.year();
    if (25..=45).contains(&age) {
        100
    } else if (18..=60).contains(&age) {
        70
    } else {
        30
    }
}

/// Occupation keyword contribution, 50-150 points.
fn occupation_points(occupation: Option<&str>) -> i32 {
    let Some(occupation) = occupation else {
        return 50;
    };

    let job = occupation.to_lowercase();
    if job.contains("engineer") || job.contains("manager") {
        150
    } else if job.contains("business") || job.contains("professional") {
        120
    } else if job.trim().is_empty() {
        50
    } else {
        80
    }
}

/// Stable 64-bit seed for a subject, from a SHA-256 of its identity key.
/// Shared with the bureau simulator so synthetic data stays consistent
/// across calls for the same subject.
pub fn stable_seed(subject: &Subject) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(subject.identity_key().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Per-subject deterministic offset, 0-50 points, so similarly-profiled
/// subjects do not land on identical baselines.
fn identity_offset(subject: &Subject) -> i32 {
    (stable_seed(subject) % 51) as i32
}
