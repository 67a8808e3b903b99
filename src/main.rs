use axum::{
    routing::{get, post, put},
    Router,
};
use credit_bureau_api::aggregator::ScoreAggregator;
use credit_bureau_api::cache_repair::{spawn_repair_loop, CacheRepairJob};
use credit_bureau_api::config::Config;
use credit_bureau_api::db::Database;
use credit_bureau_api::handlers::{self, AppState};
use credit_bureau_api::health::{spawn_health_loop, HealthSettings, SimulatedHealth};
use credit_bureau_api::providers::{SimulatedBureaus, SimulatorSettings};
use credit_bureau_api::store::{PgStore, ScoreCache, SubjectStore};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_bureau_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting credit bureau API server");

    let database = Database::new(&config.database_url).await?;
    tracing::info!("Database connection established");

    let provider = Arc::new(SimulatedBureaus::new(SimulatorSettings {
        unavailable_chance: config.simulated_unavailable_chance,
        timeout_chance: config.simulated_timeout_chance,
        ..SimulatorSettings::default()
    }));

    let health_monitor = Arc::new(SimulatedHealth::new(HealthSettings::default()));
    let health_loop = spawn_health_loop(
        Arc::clone(&health_monitor),
        Duration::from_secs(config.health_check_interval_secs),
    );

    let store = Arc::new(PgStore::new(database.pool.clone()));
    let score_cache: Arc<dyn ScoreCache> = store.clone();
    let subject_store: Arc<dyn SubjectStore> = store.clone();

    let aggregator = Arc::new(ScoreAggregator::new(
        provider,
        health_monitor.clone(),
        Arc::clone(&score_cache),
        Duration::from_secs(config.bureau_timeout_secs),
    ));

    let repair = Arc::new(CacheRepairJob::new(
        Arc::clone(&subject_store),
        Arc::clone(&score_cache),
        config.repair_batch_size,
    ));
    let repair_loop = spawn_repair_loop(
        Arc::clone(&repair),
        Duration::from_secs(config.repair_interval_secs),
        Duration::from_secs(config.repair_initial_delay_secs),
    );

    // Repeat requests for the same subject within a minute are served from
    // memory instead of re-querying four bureaus.
    let recent_score_cache = moka::future::Cache::builder()
        .max_capacity(10_000)
        .time_to_live(Duration::from_secs(60))
        .build();

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        aggregator,
        health: health_monitor,
        subjects: subject_store,
        repair,
        recent_score_cache,
    });

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Bureau and cache routes carry the security layers.
    let api_routes = Router::new()
        .route(
            "/api/v1/bureau/consolidated-score",
            post(handlers::consolidated_score),
        )
        .route(
            "/api/v1/bureau/all-scores/:subject_id",
            get(handlers::all_scores),
        )
        .route("/api/v1/bureau/score/:bureau", post(handlers::bureau_score))
        .route(
            "/api/v1/bureau/refresh-score/:subject_id",
            post(handlers::refresh_score),
        )
        .route("/api/v1/bureau/health-status", get(handlers::health_status))
        .route(
            "/api/v1/bureau/health-status/:bureau",
            put(handlers::override_health_status),
        )
        .route("/api/v1/cache/stats", get(handlers::cache_stats))
        .route("/api/v1/cache/repair", post(handlers::trigger_repair))
        .route(
            "/api/v1/cache/repair/:subject_id",
            post(handlers::repair_subject),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting so orchestrator probes never 429.
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    health_loop.stop();
    repair_loop.stop();
    Ok(())
}
