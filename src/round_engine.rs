//! C5 — round engine: pipeline creation and the open/lock/resolve
//! phase transitions. Every transition is triggered exclusively by the
//! cron driver; nothing here runs on a timer of its own.

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::hmac_hash;
use crate::domain::{Duration, Outcome, PriceSnapshot, Round, RoundStatus, SnapshotKind};
use crate::error::QFlashError;
use crate::price_feed::PriceFeed;
use crate::settlement::SettlementEngine;
use crate::store::SqliteStore;

pub struct RoundEngine {
    pub pairs: Vec<String>,
    pub durations: Vec<Duration>,
    pub pipeline_ahead_secs: i64,
    pub lock_before_close_secs: i64,
    pub platform_fee_bps: i64,
    pub max_resolution_delay_secs: i64,
    pub attestation_key: String,
}

impl RoundEngine {
    /// Maintains at least two upcoming/open rounds per (pair, duration),
    /// appending end-to-end from the last known close-at, or from the
    /// next clean duration-aligned boundary if no round exists yet.
    pub async fn ensure_upcoming_rounds(&self, store: &SqliteStore) -> Result<u32, QFlashError> {
        let mut created = 0u32;
        let now = store.now().await?;

        for pair in &self.pairs {
            for &duration in &self.durations {
                loop {
                    let count = store.upcoming_count(pair, duration).await?;
                    if count >= 2 {
                        break;
                    }

                    let open_at = match store.last_close_at(pair, duration).await? {
                        Some(close_at) => close_at,
                        None => {
                            let secs = duration.seconds();
                            ((now + secs - 1) / secs) * secs
                        }
                    };

                    if open_at > now + self.pipeline_ahead_secs && count >= 1 {
                        break;
                    }

                    let close_at = open_at + duration.seconds();
                    let lock_at = close_at - self.lock_before_close_secs;

                    let round = Round {
                        id: Uuid::new_v4().to_string(),
                        pair: pair.clone(),
                        duration,
                        status: RoundStatus::Upcoming,
                        open_at,
                        lock_at,
                        close_at,
                        opening_price: None,
                        closing_price: None,
                        outcome: None,
                        up_pool_qu: 0,
                        down_pool_qu: 0,
                        entry_count: 0,
                        platform_fee_qu: 0,
                        commitment_hash: None,
                        resolved_at: None,
                    };
                    store.create_round(&round).await?;
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    pub async fn open_ready_rounds(&self, store: &SqliteStore, feed: &PriceFeed) -> Result<(u32, u32), QFlashError> {
        let mut opened = 0u32;
        let mut cancelled = 0u32;
        let now_ms = store.now().await? * 1000;

        for round in store.rounds_ready_to_open().await? {
            match feed.price_for(&round.pair, true, now_ms).await {
                Err(_) => {
                    store.mark_round_cancelled(&round.id).await?;
                    cancelled += 1;
                }
                Ok(quote) => {
                    let commitment_hash = hmac_hash(
                        &self.attestation_key,
                        &json!({
                            "roundId": round.id,
                            "pair": round.pair,
                            "openingPrice": quote.median_price,
                            "openAt": round.open_at,
                        }),
                    );

                    let ok = store.mark_round_open(&round.id, quote.median_price, &commitment_hash).await?;
                    if ok {
                        store
                            .insert_snapshot(&PriceSnapshot {
                                id: Uuid::new_v4().to_string(),
                                round_id: round.id.clone(),
                                kind: SnapshotKind::Opening,
                                pair: round.pair.clone(),
                                median_price: quote.median_price,
                                sources: quote.sources.clone(),
                                attestation_hash: quote.attestation_hash.clone(),
                                fetched_at: quote.fetched_at,
                            })
                            .await?;
                        opened += 1;
                        info!(round_id = %round.id, pair = %round.pair, price = quote.median_price, "round opened");
                    }
                }
            }
        }
        Ok((opened, cancelled))
    }

    pub async fn lock_ready_rounds(&self, store: &SqliteStore) -> Result<u32, QFlashError> {
        let mut locked = 0u32;
        for round in store.rounds_ready_to_lock().await? {
            if store.mark_round_locked(&round.id).await? {
                locked += 1;
            }
        }
        Ok(locked)
    }

    pub async fn resolve_ready_rounds(
        &self,
        store: &SqliteStore,
        feed: &PriceFeed,
        settlement: &SettlementEngine,
    ) -> Result<(u32, u32), QFlashError> {
        let mut resolved = 0u32;
        let mut cancelled = 0u32;

        for round in store.rounds_ready_to_resolve().await? {
            let cas_ok = store
                .cas_round_status(&round.id, RoundStatus::Locked, RoundStatus::Resolving)
                .await?;
            if !cas_ok {
                continue;
            }

            feed.invalidate(&round.pair);
            let now_ms = store.now().await? * 1000;

            match feed.price_for(&round.pair, true, now_ms).await {
                Err(_) => {
                    warn!(round_id = %round.id, "closing price unavailable, cancelling and refunding");
                    settlement.refund_all_entries(store, &round.id, now_ms / 1000).await?;
                    cancelled += 1;
                }
                Ok(quote) => {
                    let opening_price = round.opening_price.unwrap_or(quote.median_price);
                    let outcome = Outcome::from_prices(opening_price, quote.median_price);

                    store
                        .insert_snapshot(&PriceSnapshot {
                            id: Uuid::new_v4().to_string(),
                            round_id: round.id.clone(),
                            kind: SnapshotKind::Closing,
                            pair: round.pair.clone(),
                            median_price: quote.median_price,
                            sources: quote.sources.clone(),
                            attestation_hash: quote.attestation_hash.clone(),
                            fetched_at: quote.fetched_at,
                        })
                        .await?;

                    let now = store.now().await?;
                    settlement
                        .settle_round(store, &round.id, quote.median_price, outcome, self.platform_fee_bps, now)
                        .await?;
                    resolved += 1;
                    info!(round_id = %round.id, outcome = outcome.as_str(), "round resolved");
                }
            }
        }
        Ok((resolved, cancelled))
    }

    pub async fn handle_stale_resolving_rounds(
        &self,
        store: &SqliteStore,
        settlement: &SettlementEngine,
    ) -> Result<u32, QFlashError> {
        let mut recovered = 0u32;
        let now = store.now().await?;
        for round in store.stale_resolving_rounds(self.max_resolution_delay_secs).await? {
            warn!(round_id = %round.id, "round stuck in resolving past cutoff, cancelling and refunding");
            settlement.refund_all_entries(store, &round.id, now).await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn ensure_upcoming_rounds_creates_two_per_pair_duration() {
        let (store, _dir) = test_store();
        let engine = RoundEngine {
            pairs: vec!["BTC-USD".to_string()],
            durations: vec![Duration::D30],
            pipeline_ahead_secs: 300,
            lock_before_close_secs: 5,
            platform_fee_bps: 300,
            max_resolution_delay_secs: 120,
            attestation_key: "key".into(),
        };
        let created = engine.ensure_upcoming_rounds(&store).await.unwrap();
        assert_eq!(created, 2);

        let count = store.upcoming_count("BTC-USD", Duration::D30).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn second_call_does_not_duplicate() {
        let (store, _dir) = test_store();
        let engine = RoundEngine {
            pairs: vec!["BTC-USD".to_string()],
            durations: vec![Duration::D30],
            pipeline_ahead_secs: 300,
            lock_before_close_secs: 5,
            platform_fee_bps: 300,
            max_resolution_delay_secs: 120,
            attestation_key: "key".into(),
        };
        engine.ensure_upcoming_rounds(&store).await.unwrap();
        let second = engine.ensure_upcoming_rounds(&store).await.unwrap();
        assert_eq!(second, 0);
    }
}
