//! Simulated bureau provider contract checks.

use credit_bureau_api::errors::ProviderError;
use credit_bureau_api::models::{Bureau, Subject};
use credit_bureau_api::providers::{BureauProvider, SimulatedBureaus, SimulatorSettings};
use uuid::Uuid;

fn subject() -> Subject {
    Subject {
        id: Some(Uuid::new_v4()),
        full_name: "Neha Gupta".to_string(),
        pan_number: Some("QRSTU3456V".to_string()),
        annual_income: Some("₹6,50,000".to_string()),
        date_of_birth: None,
        occupation: Some("Business Owner".to_string()),
    }
}

#[tokio::test]
async fn scores_stay_within_each_bureau_declared_range() {
    let provider = SimulatedBureaus::new(SimulatorSettings::instant());
    let s = subject();

    for bureau in Bureau::ALL {
        let (min, max) = bureau.descriptor().score_range;
        // The variation band is random per call, so sample repeatedly.
        for _ in 0..25 {
            let report = provider.fetch_score(bureau, &s).await.unwrap();
            assert!(
                (min..=max).contains(&report.score),
                "{} score {} outside {}-{}",
                bureau,
                report.score,
                min,
                max
            );
            assert_eq!(report.bureau, bureau);
            assert_eq!(report.score_range, format!("{}-{}", min, max));
        }
    }
}

#[tokio::test]
async fn reports_carry_factors_and_accounts() {
    let provider = SimulatedBureaus::new(SimulatorSettings::instant());
    let report = provider.fetch_score(Bureau::Cibil, &subject()).await.unwrap();

    assert_eq!(report.factors.len(), 5);
    assert!(report.factors.iter().all(|f| f.value <= 100));
    assert!((2..=5).contains(&report.accounts.len()));
    for account in &report.accounts {
        assert!(account.account_number.starts_with("****"));
        assert!(account.credit_limit > 0);
    }
}

#[tokio::test]
async fn synthetic_data_is_stable_per_subject() {
    let provider = SimulatedBureaus::new(SimulatorSettings::instant());
    let s = subject();

    let first = provider.fetch_score(Bureau::Experian, &s).await.unwrap();
    let second = provider.fetch_score(Bureau::Experian, &s).await.unwrap();

    // Scores vary per call within the band, but seeded data does not.
    assert_eq!(
        serde_json::to_string(&first.accounts).unwrap(),
        serde_json::to_string(&second.accounts).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.factors).unwrap(),
        serde_json::to_string(&second.factors).unwrap()
    );
}

#[tokio::test]
async fn forced_timeout_surfaces_as_timeout_error() {
    let provider = SimulatedBureaus::new(SimulatorSettings::always_timeout());
    let err = provider
        .fetch_score(Bureau::Equifax, &subject())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { bureau } if bureau == Bureau::Equifax));
    assert!(err.to_string().contains("timeout"));
}

#[tokio::test]
async fn forced_unavailability_surfaces_as_unavailable_error() {
    let provider = SimulatedBureaus::new(SimulatorSettings::always_unavailable());
    let err = provider
        .fetch_score(Bureau::Crif, &subject())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable { bureau } if bureau == Bureau::Crif));
}
