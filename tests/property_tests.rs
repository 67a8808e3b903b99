use chrono::NaiveDate;
use credit_bureau_api::aggregator::ScoreAggregator;
use credit_bureau_api::models::{RiskLevel, Subject};
use credit_bureau_api::scoring::{baseline_score, SCORE_CEILING, SCORE_FLOOR};
use proptest::prelude::*;

fn arb_subject() -> impl Strategy<Value = Subject> {
    (
        "\\PC{0,40}",
        proptest::option::of("\\PC{0,20}"),
        proptest::option::of("\\PC{0,30}"),
        proptest::option::of((1900i32..2026, 1u32..13, 1u32..29)),
        proptest::option::of("\\PC{0,30}"),
    )
        .prop_map(|(full_name, pan, income, dob, occupation)| Subject {
            id: None,
            full_name,
            pan_number: pan,
            annual_income: income,
            date_of_birth: dob.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            occupation,
        })
}

proptest! {
    #[test]
    fn baseline_never_panics_and_stays_in_range(subject in arb_subject()) {
        let score = baseline_score(&subject);
        prop_assert!((SCORE_FLOOR..=SCORE_CEILING).contains(&score));
        // Purity: same input, same output.
        prop_assert_eq!(score, baseline_score(&subject));
    }

    #[test]
    fn consolidated_score_stays_within_input_bounds(
        scores in proptest::collection::vec((0.01f64..1.0, 300i32..=900), 1..8)
    ) {
        let result = ScoreAggregator::weighted_consolidated(&scores).unwrap();
        let min = scores.iter().map(|(_, s)| *s).min().unwrap();
        let max = scores.iter().map(|(_, s)| *s).max().unwrap();
        prop_assert!(result >= min && result <= max);
    }

    #[test]
    fn risk_tiers_are_monotonic(score in 300i32..=900) {
        let level = RiskLevel::from_score(score);
        match level {
            RiskLevel::Low => prop_assert!(score >= 750),
            RiskLevel::Medium => prop_assert!((650..750).contains(&score)),
            RiskLevel::High => prop_assert!(score < 650),
        }
    }
}
