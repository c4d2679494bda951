//! Runtime configuration.
//!
//! Loaded from `.env` + environment per the teacher's
//! `env::var(...).unwrap_or_else(...).parse().unwrap_or(default)` idiom,
//! then optionally overridden by CLI flags.

use clap::Parser;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub http_port: u16,
    pub pairs: Vec<String>,
    pub durations_secs: Vec<i64>,
    pub min_bet_qu: i64,
    pub max_bet_qu: i64,
    pub platform_fee_bps: i64,
    pub lock_before_close_secs: i64,
    pub cron_interval_ms: u64,
    pub price_cache_ttl_ms: i64,
    pub min_oracle_sources: usize,
    pub max_resolution_delay_ms: i64,
    pub round_pipeline_ahead_secs: i64,
    pub max_entries_per_user_per_round: i64,
    pub max_bets_per_minute: u32,
    pub house_enabled: bool,
    pub house_initial_balance_qu: i64,
    pub house_max_exposure_per_round_qu: i64,
    pub house_max_total_exposure_qu: i64,
    pub house_match_ratio: f64,
    pub attestation_key: String,
    pub log_level: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path = env_string("QFLASH_DB_PATH", "./qflash.db");
        let http_port = env_parse("QFLASH_HTTP_PORT", 8080u16);

        let pairs = env_string("QFLASH_PAIRS", "BTC-USD,ETH-USD,SOL-USD")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let durations_secs = env_string("QFLASH_DURATIONS_SECS", "30,60,120")
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .collect();

        Ok(Self {
            database_path,
            http_port,
            pairs,
            durations_secs,
            min_bet_qu: env_parse("QFLASH_MIN_BET_QU", 10_000i64),
            max_bet_qu: env_parse("QFLASH_MAX_BET_QU", 10_000_000i64),
            platform_fee_bps: env_parse("QFLASH_PLATFORM_FEE_BPS", 300i64),
            lock_before_close_secs: env_parse("QFLASH_LOCK_BEFORE_CLOSE_SECS", 5i64),
            cron_interval_ms: env_parse("QFLASH_CRON_INTERVAL_MS", 5_000u64),
            price_cache_ttl_ms: env_parse("QFLASH_PRICE_CACHE_TTL_MS", 5_000i64),
            min_oracle_sources: env_parse("QFLASH_MIN_ORACLE_SOURCES", 2usize),
            max_resolution_delay_ms: env_parse("QFLASH_MAX_RESOLUTION_DELAY_MS", 120_000i64),
            round_pipeline_ahead_secs: env_parse("QFLASH_ROUND_PIPELINE_AHEAD_SECS", 90i64),
            max_entries_per_user_per_round: env_parse("QFLASH_MAX_ENTRIES_PER_USER_PER_ROUND", 1i64),
            max_bets_per_minute: env_parse("QFLASH_MAX_BETS_PER_MINUTE", 10u32),
            house_enabled: env_parse("QFLASH_HOUSE_ENABLED", true),
            house_initial_balance_qu: env_parse("QFLASH_HOUSE_INITIAL_BALANCE_QU", 1_000_000_000i64),
            house_max_exposure_per_round_qu: env_parse(
                "QFLASH_HOUSE_MAX_EXPOSURE_PER_ROUND_QU",
                50_000_000i64,
            ),
            house_max_total_exposure_qu: env_parse(
                "QFLASH_HOUSE_MAX_TOTAL_EXPOSURE_QU",
                500_000_000i64,
            ),
            house_match_ratio: env_parse("QFLASH_HOUSE_MATCH_RATIO", 1.0f64),
            attestation_key: env_string("QFLASH_ATTESTATION_KEY", "qflash-dev-attestation-key"),
            log_level: env_string("QFLASH_LOG_LEVEL", "info"),
        })
    }
}

/// CLI overrides layered on top of `Config::from_env`.
#[derive(Debug, Parser)]
#[command(name = "qflash", about = "QFlash price-prediction round engine")]
pub struct Cli {
    #[arg(long, env = "QFLASH_DB_PATH")]
    pub db_path: Option<String>,

    #[arg(long, env = "QFLASH_HTTP_PORT")]
    pub http_port: Option<u16>,

    #[arg(long, env = "QFLASH_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(db_path) = self.db_path {
            config.database_path = db_path;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config
    }
}
