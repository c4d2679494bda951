//! C3 — house bank. Opposite-side liquidity with per-round and total
//! exposure caps. Matching is best-effort: failure never rolls back
//! the user's own wager.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Entry, EntryStatus, HouseLedgerKind, Side, HOUSE_ADDRESS};
use crate::error::QFlashError;
use crate::store::SqliteStore;

pub struct HouseBank {
    pub enabled: bool,
    pub match_ratio: f64,
    pub max_exposure_per_round_qu: i64,
    pub max_total_exposure_qu: i64,
}

pub struct MatchResult {
    pub matched: bool,
    pub entry_id: Option<String>,
    pub reason: Option<&'static str>,
}

impl HouseBank {
    /// Ensures the reserved house account exists with its configured
    /// opening balance. Idempotent — a second call is a no-op.
    pub async fn ensure_house_account(&self, store: &SqliteStore, initial_balance_qu: i64, now: i64) -> Result<(), QFlashError> {
        let account = store.ensure_account(HOUSE_ADDRESS, now).await?;
        if account.balance_qu == 0 && initial_balance_qu > 0 {
            store.credit_balance(HOUSE_ADDRESS, initial_balance_qu).await?;
        }
        Ok(())
    }

    pub async fn match_bet(
        &self,
        store: &SqliteStore,
        round_id: &str,
        user_side: Side,
        user_amount_qu: i64,
        now: i64,
    ) -> Result<MatchResult, QFlashError> {
        if !self.enabled {
            return Ok(MatchResult { matched: false, entry_id: None, reason: Some("house_disabled") });
        }

        let match_amount = ((user_amount_qu as f64) * self.match_ratio).floor() as i64;
        if match_amount <= 0 {
            return Ok(MatchResult { matched: false, entry_id: None, reason: Some("zero_match_amount") });
        }

        let house = match store.get_account(HOUSE_ADDRESS).await? {
            Some(a) => a,
            None => return Ok(MatchResult { matched: false, entry_id: None, reason: Some("house_uninitialized") }),
        };
        if house.balance_qu < match_amount {
            warn!(round_id, match_amount, balance = house.balance_qu, "house balance insufficient to match");
            return Ok(MatchResult { matched: false, entry_id: None, reason: Some("insufficient_house_balance") });
        }

        let round_exposure = store.house_exposure_for_round(round_id).await?;
        if round_exposure + match_amount > self.max_exposure_per_round_qu {
            return Ok(MatchResult { matched: false, entry_id: None, reason: Some("per_round_cap_exceeded") });
        }

        let total_exposure = store.total_house_exposure().await?;
        if total_exposure + match_amount > self.max_total_exposure_qu {
            return Ok(MatchResult { matched: false, entry_id: None, reason: Some("total_cap_exceeded") });
        }

        let entry = Entry {
            id: Uuid::new_v4().to_string(),
            round_id: round_id.to_string(),
            user_address: HOUSE_ADDRESS.to_string(),
            side: user_side.opposite(),
            amount_qu: match_amount,
            payout_qu: None,
            status: EntryStatus::Active,
            is_house: true,
            created_at: now,
        };

        if let Err(e) = store.place_wager(&entry, now).await {
            warn!(round_id, error = %e, "house match insert failed");
            return Ok(MatchResult { matched: false, entry_id: None, reason: Some("insert_failed") });
        }

        if !store.debit_balance_checked(HOUSE_ADDRESS, match_amount).await? {
            warn!(round_id, "house balance race lost after exposure check passed");
            return Ok(MatchResult { matched: false, entry_id: Some(entry.id), reason: Some("debit_race") });
        }

        store
            .append_house_ledger(
                &Uuid::new_v4().to_string(),
                Some(round_id),
                Some(&entry.id),
                HouseLedgerKind::MatchBet,
                match_amount,
                now,
            )
            .await?;

        info!(round_id, match_amount, side = entry.side.as_str(), "house matched bet");
        Ok(MatchResult { matched: true, entry_id: Some(entry.id), reason: None })
    }
}
