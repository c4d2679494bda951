//! C7 — cron driver. A single-threaded cooperative loop that acquires
//! the cross-process named lock and runs the pipeline phases in fixed
//! order, capturing per-phase failures without skipping the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::house::HouseBank;
use crate::price_feed::PriceFeed;
use crate::round_engine::RoundEngine;
use crate::settlement::SettlementEngine;
use crate::store::SqliteStore;

const LOCK_NAME: &str = "qflash_cron";
const LOCK_TTL_SECS: i64 = 30;

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub lock_acquired: bool,
    pub rounds_created: u32,
    pub rounds_opened: u32,
    pub rounds_locked: u32,
    pub rounds_resolved: u32,
    pub rounds_cancelled: u32,
    pub stale_recovered: u32,
    pub balance_mismatches: u32,
    pub withdrawals_pending: u32,
    pub errors: Vec<String>,
}

pub struct CronDriver {
    owner_id: String,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    house_initial_balance_qu: i64,
}

impl CronDriver {
    pub fn new(interval_ms: u64, house_initial_balance_qu: i64) -> Self {
        Self {
            owner_id: format!("qflash-{}", Uuid::new_v4()),
            interval: Duration::from_millis(interval_ms),
            shutdown: Arc::new(AtomicBool::new(false)),
            house_initial_balance_qu,
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Idempotent in the sense that a process only ever owns one
    /// running loop; calling `run` again here would just spawn a
    /// second task, so `main.rs` guards that with a single `spawn`.
    pub async fn run(
        &self,
        store: Arc<SqliteStore>,
        feed: Arc<PriceFeed>,
        round_engine: Arc<RoundEngine>,
        settlement: Arc<SettlementEngine>,
        house: Arc<HouseBank>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("cron shutdown flag set, stopping");
                return;
            }
            ticker.tick().await;

            let summary = self
                .run_cycle(&store, &feed, &round_engine, &settlement, &house)
                .await;

            if !summary.errors.is_empty() {
                warn!(errors = ?summary.errors, "cron cycle completed with phase errors");
            } else {
                info!(
                    created = summary.rounds_created,
                    opened = summary.rounds_opened,
                    locked = summary.rounds_locked,
                    resolved = summary.rounds_resolved,
                    cancelled = summary.rounds_cancelled,
                    "cron cycle complete"
                );
            }
        }
    }

    pub async fn run_cycle(
        &self,
        store: &SqliteStore,
        feed: &PriceFeed,
        round_engine: &RoundEngine,
        settlement: &SettlementEngine,
        house: &HouseBank,
    ) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let acquired = match store.acquire_lock(LOCK_NAME, &self.owner_id, LOCK_TTL_SECS).await {
            Ok(ok) => ok,
            Err(e) => {
                summary.errors.push(format!("lock acquire failed: {e}"));
                return summary;
            }
        };
        summary.lock_acquired = acquired;
        if !acquired {
            return summary;
        }

        let now = store.now().await.unwrap_or(0);
        if let Err(e) = house.ensure_house_account(store, self.house_initial_balance_qu, now).await {
            summary.errors.push(format!("house init failed: {e}"));
        }

        match round_engine.ensure_upcoming_rounds(store).await {
            Ok(n) => summary.rounds_created = n,
            Err(e) => summary.errors.push(format!("ensure_upcoming_rounds: {e}")),
        }

        match round_engine.open_ready_rounds(store, feed).await {
            Ok((opened, cancelled)) => {
                summary.rounds_opened = opened;
                summary.rounds_cancelled += cancelled;
            }
            Err(e) => summary.errors.push(format!("open_ready_rounds: {e}")),
        }

        match round_engine.lock_ready_rounds(store).await {
            Ok(n) => summary.rounds_locked = n,
            Err(e) => summary.errors.push(format!("lock_ready_rounds: {e}")),
        }

        match round_engine.resolve_ready_rounds(store, feed, settlement).await {
            Ok((resolved, cancelled)) => {
                summary.rounds_resolved = resolved;
                summary.rounds_cancelled += cancelled;
            }
            Err(e) => summary.errors.push(format!("resolve_ready_rounds: {e}")),
        }

        match round_engine.handle_stale_resolving_rounds(store, settlement).await {
            Ok(n) => summary.stale_recovered = n,
            Err(e) => summary.errors.push(format!("handle_stale_resolving_rounds: {e}")),
        }

        match store.balance_invariant_mismatches().await {
            Ok(mismatches) => {
                summary.balance_mismatches = mismatches.len() as u32;
                if !mismatches.is_empty() {
                    warn!(addresses = ?mismatches, "platform balance invariant violated");
                }
            }
            Err(e) => summary.errors.push(format!("balance sanity check: {e}")),
        }

        match store.pending_withdrawals().await {
            Ok(pending) => {
                summary.withdrawals_pending = pending.len() as u32;
                if !pending.is_empty() {
                    info!(count = pending.len(), "withdrawals awaiting external relayer");
                }
            }
            Err(e) => summary.errors.push(format!("pending withdrawal scan: {e}")),
        }

        if let Err(e) = store.release_lock(LOCK_NAME, &self.owner_id).await {
            error!(error = %e, "failed to release cron lock");
            summary.errors.push(format!("lock release failed: {e}"));
        }

        summary
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Duration as RoundDuration;
    use crate::price_feed::{HttpOracleSource, PriceFeed};
    use crate::store::test_store;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn run_cycle_is_idempotent_when_lock_held_by_other_owner() {
        let (store, _dir) = test_store();
        store.acquire_lock("qflash_cron", "someone-else", 30).await.unwrap();

        let driver = CronDriver::new(1000, 0);
        let round_engine = RoundEngine {
            pairs: vec!["BTC-USD".into()],
            durations: vec![RoundDuration::D30],
            pipeline_ahead_secs: 300,
            lock_before_close_secs: 5,
            platform_fee_bps: 300,
            max_resolution_delay_secs: 120,
            attestation_key: "key".into(),
        };
        let feed = PriceFeed::new(
            Box::new(HttpOracleSource::new(vec![], StdDuration::from_secs(1))),
            5000,
            2,
            "key".into(),
        );
        let settlement = SettlementEngine;
        let house = HouseBank {
            enabled: false,
            match_ratio: 1.0,
            max_exposure_per_round_qu: 0,
            max_total_exposure_qu: 0,
        };

        let summary = driver
            .run_cycle(&store, &feed, &round_engine, &settlement, &house)
            .await;
        assert!(!summary.lock_acquired);
        assert_eq!(summary.rounds_created, 0);
    }
}
