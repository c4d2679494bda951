//! QFlash — binary price-prediction round engine.
//!
//! Wires the durable store, multi-oracle price feed, house bank,
//! account manager, round engine, and settlement engine together,
//! then runs the cron driver alongside the HTTP server until shutdown.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qflash_engine::accounts::AccountManager;
use qflash_engine::api::{self, AppState};
use qflash_engine::config::{Cli, Config};
use qflash_engine::cron::CronDriver;
use qflash_engine::domain::Duration as RoundDuration;
use qflash_engine::house::HouseBank;
use qflash_engine::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use qflash_engine::price_feed::{HttpOracleSource, PriceFeed};
use qflash_engine::round_engine::RoundEngine;
use qflash_engine::settlement::SettlementEngine;
use qflash_engine::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().apply(Config::from_env()?);
    init_tracing(&config.log_level);

    info!(db = %config.database_path, port = config.http_port, "starting qflash engine");

    let store = Arc::new(SqliteStore::new(&config.database_path)?);

    let oracle_endpoints = vec![
        ("binance".to_string(), "https://api.binance.com/api/v3/ticker/price?symbol={pair}".to_string()),
        ("coinbase".to_string(), "https://api.coinbase.com/v2/prices/{pair}/spot".to_string()),
    ];
    let fetcher = Box::new(HttpOracleSource::new(oracle_endpoints, StdDuration::from_secs(3)));
    let feed = Arc::new(PriceFeed::new(
        fetcher,
        config.price_cache_ttl_ms,
        config.min_oracle_sources,
        config.attestation_key.clone(),
    ));

    let durations: Vec<RoundDuration> = config
        .durations_secs
        .iter()
        .filter_map(|s| RoundDuration::from_seconds(*s))
        .collect();

    let round_engine = Arc::new(RoundEngine {
        pairs: config.pairs.clone(),
        durations,
        pipeline_ahead_secs: config.round_pipeline_ahead_secs,
        lock_before_close_secs: config.lock_before_close_secs,
        platform_fee_bps: config.platform_fee_bps,
        max_resolution_delay_secs: config.max_resolution_delay_ms / 1000,
        attestation_key: config.attestation_key.clone(),
    });

    let settlement = Arc::new(SettlementEngine);

    let house = Arc::new(HouseBank {
        enabled: config.house_enabled,
        match_ratio: config.house_match_ratio,
        max_exposure_per_round_qu: config.house_max_exposure_per_round_qu,
        max_total_exposure_qu: config.house_max_total_exposure_qu,
    });

    let accounts = Arc::new(AccountManager {
        min_bet_qu: config.min_bet_qu,
        max_bet_qu: config.max_bet_qu,
        rate_limiter: RateLimiter::new(RateLimitConfig {
            max_requests: config.max_bets_per_minute,
            window: StdDuration::from_secs(60),
        }),
    });

    let cron = CronDriver::new(config.cron_interval_ms, config.house_initial_balance_qu);
    let shutdown = cron.shutdown_handle();

    let cron_store = store.clone();
    let cron_feed = feed.clone();
    let cron_round_engine = round_engine.clone();
    let cron_settlement = settlement.clone();
    let cron_house = house.clone();
    tokio::spawn(async move {
        cron.run(cron_store, cron_feed, cron_round_engine, cron_settlement, cron_house)
            .await;
    });

    let state = Arc::new(AppState {
        store,
        feed,
        accounts,
        house,
    });
    let app = api::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "http server listening");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
