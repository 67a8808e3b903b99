use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Hard deadline per bureau call, seconds.
    pub bureau_timeout_secs: u64,
    /// Health sweep cadence, seconds. Decoupled from request handling.
    pub health_check_interval_secs: u64,
    /// Scheduled cache repair cadence, seconds.
    pub repair_interval_secs: u64,
    /// Delay before the first repair run, seconds.
    pub repair_initial_delay_secs: u64,
    /// Maximum subjects repaired per run.
    pub repair_batch_size: i64,
    /// Chance per bureau call of a simulated silent timeout.
    pub simulated_timeout_chance: f64,
    /// Chance per bureau call of a simulated connection rejection.
    pub simulated_unavailable_chance: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            bureau_timeout_secs: parse_env_u64("BUREAU_TIMEOUT_SECS", 10)?,
            health_check_interval_secs: parse_env_u64("HEALTH_CHECK_INTERVAL_SECS", 30)?,
            repair_interval_secs: parse_env_u64("REPAIR_INTERVAL_SECS", 6 * 60 * 60)?,
            repair_initial_delay_secs: parse_env_u64("REPAIR_INITIAL_DELAY_SECS", 30)?,
            repair_batch_size: parse_env_u64("REPAIR_BATCH_SIZE", 50)? as i64,
            simulated_timeout_chance: parse_env_chance("SIMULATED_TIMEOUT_CHANCE", 0.05)?,
            simulated_unavailable_chance: parse_env_chance("SIMULATED_UNAVAILABLE_CHANCE", 0.05)?,
        };

        if config.bureau_timeout_secs == 0 {
            anyhow::bail!("BUREAU_TIMEOUT_SECS must be greater than zero");
        }
        if config.health_check_interval_secs == 0 {
            anyhow::bail!("HEALTH_CHECK_INTERVAL_SECS must be greater than zero");
        }
        if config.repair_batch_size <= 0 {
            anyhow::bail!("REPAIR_BATCH_SIZE must be greater than zero");
        }

        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "Bureau timeout: {}s, health interval: {}s, repair interval: {}s",
            config.bureau_timeout_secs,
            config.health_check_interval_secs,
            config.repair_interval_secs
        );

        Ok(config)
    }
}

fn parse_env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer", name)),
        Err(_) => Ok(default),
    }
}

fn parse_env_chance(name: &str, default: f64) -> anyhow::Result<f64> {
    let value = match std::env::var(name) {
        Ok(raw) => raw
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("{} must be a number between 0 and 1", name))?,
        Err(_) => default,
    };
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be between 0 and 1", name);
    }
    Ok(value)
}
