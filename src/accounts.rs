//! C4 — account/balance manager. Wraps the durable store with the
//! domain rules: bet bounds, per-address rate limiting, best-effort
//! house matching, and auth-token binding.

use uuid::Uuid;

use crate::domain::{Account, Entry, EntryStatus, Side, Transaction, TxKind, TxStatus};
use crate::error::QFlashError;
use crate::house::HouseBank;
use crate::middleware::rate_limit::RateLimiter;
use crate::store::SqliteStore;

pub struct AccountManager {
    pub min_bet_qu: i64,
    pub max_bet_qu: i64,
    pub rate_limiter: RateLimiter,
}

fn is_valid_qubic_identifier(address: &str) -> bool {
    address.len() == 60 && address.chars().all(|c| c.is_ascii_uppercase())
}

impl AccountManager {
    pub async fn ensure_account(&self, store: &SqliteStore, address: &str) -> Result<Account, QFlashError> {
        if !is_valid_qubic_identifier(address) {
            return Err(QFlashError::InvalidIdentifier(address.to_string()));
        }
        let now = store.now().await?;
        store.ensure_account(address, now).await
    }

    pub async fn rotate_token(&self, store: &SqliteStore, address: &str) -> Result<Account, QFlashError> {
        store.rotate_token(address).await
    }

    /// Expects `Bearer <token>`; returns `None` rather than erroring so
    /// callers can distinguish "no header" from a malformed one if needed.
    pub async fn authenticate(&self, store: &SqliteStore, bearer_header: &str) -> Result<Option<Account>, QFlashError> {
        let token = match bearer_header.strip_prefix("Bearer ") {
            Some(t) => t,
            None => return Ok(None),
        };
        store.get_account_by_token(token).await
    }

    pub async fn credit_deposit(
        &self,
        store: &SqliteStore,
        address: &str,
        amount_qu: i64,
        external_tx_hash: &str,
    ) -> Result<(), QFlashError> {
        if !is_valid_qubic_identifier(address) {
            return Err(QFlashError::InvalidIdentifier(address.to_string()));
        }
        let now = store.now().await?;
        store.ensure_account(address, now).await?;
        store
            .credit_deposit(address, amount_qu, external_tx_hash, &Uuid::new_v4().to_string(), now)
            .await
    }

    pub async fn place_wager(
        &self,
        store: &SqliteStore,
        house: &HouseBank,
        address: &str,
        round_id: &str,
        side: Side,
        amount_qu: i64,
    ) -> Result<Entry, QFlashError> {
        if amount_qu < self.min_bet_qu || amount_qu > self.max_bet_qu {
            return Err(QFlashError::InsufficientBounds);
        }
        if !self.rate_limiter.check(address) {
            return Err(QFlashError::RateLimited);
        }

        let now = store.now().await?;

        if !store.debit_balance_checked(address, amount_qu).await? {
            return Err(QFlashError::InsufficientBalance);
        }

        let entry = Entry {
            id: Uuid::new_v4().to_string(),
            round_id: round_id.to_string(),
            user_address: address.to_string(),
            side,
            amount_qu,
            payout_qu: None,
            status: EntryStatus::Active,
            is_house: false,
            created_at: now,
        };

        if let Err(e) = store.place_wager(&entry, now).await {
            // Roll back the debit: the atomic wager insert failed (round
            // not open, duplicate entry), so the user never actually bet.
            store.credit_balance(address, amount_qu).await?;
            return Err(e);
        }

        store.record_wager_stats(address, amount_qu).await?;

        store
            .insert_transaction(&Transaction {
                id: Uuid::new_v4().to_string(),
                address: address.to_string(),
                kind: TxKind::Wager,
                amount_qu,
                round_id: Some(round_id.to_string()),
                external_tx_hash: None,
                status: TxStatus::Confirmed,
                created_at: now,
            })
            .await?;

        // Best-effort: a failed house match never unwinds the user's wager.
        let _ = house.match_bet(store, round_id, side, amount_qu, now).await;

        Ok(entry)
    }

    pub async fn request_withdrawal(
        &self,
        store: &SqliteStore,
        address: &str,
        destination: &str,
        amount_qu: i64,
    ) -> Result<Transaction, QFlashError> {
        if !is_valid_qubic_identifier(address) || !is_valid_qubic_identifier(destination) {
            return Err(QFlashError::InvalidIdentifier(destination.to_string()));
        }
        if !store.debit_balance_checked(address, amount_qu).await? {
            return Err(QFlashError::InsufficientBalance);
        }
        let now = store.now().await?;
        store.record_withdrawal_stats(address, amount_qu).await?;

        let tx = Transaction {
            id: Uuid::new_v4().to_string(),
            address: address.to_string(),
            kind: TxKind::Withdrawal,
            amount_qu,
            round_id: None,
            external_tx_hash: None,
            status: TxStatus::Pending,
            created_at: now,
        };
        store.insert_transaction(&tx).await?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use std::time::Duration as StdDuration;

    fn manager() -> AccountManager {
        AccountManager {
            min_bet_qu: 1_000,
            max_bet_qu: 10_000_000,
            rate_limiter: RateLimiter::new(crate::middleware::rate_limit::RateLimitConfig {
                max_requests: 10,
                window: StdDuration::from_secs(60),
            }),
        }
    }

    fn valid_address(n: u8) -> String {
        let mut s = "A".repeat(59);
        s.push((b'A' + (n % 26)) as char);
        s
    }

    #[tokio::test]
    async fn wager_bounds_are_enforced() {
        let (store, _dir) = test_store();
        let mgr = manager();
        let addr = valid_address(1);
        store.ensure_account(&addr, 0).await.unwrap();
        store.credit_balance(&addr, 1_000_000).await.unwrap();

        let house = HouseBank {
            enabled: false,
            match_ratio: 1.0,
            max_exposure_per_round_qu: 0,
            max_total_exposure_qu: 0,
        };

        let too_small = mgr.place_wager(&store, &house, &addr, "nonexistent", Side::Up, 1).await;
        assert!(matches!(too_small, Err(QFlashError::InsufficientBounds)));
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected_before_touching_round() {
        let (store, _dir) = test_store();
        let mgr = manager();
        let addr = valid_address(2);
        store.ensure_account(&addr, 0).await.unwrap();

        let house = HouseBank {
            enabled: false,
            match_ratio: 1.0,
            max_exposure_per_round_qu: 0,
            max_total_exposure_qu: 0,
        };

        let result = mgr.place_wager(&store, &house, &addr, "r1", Side::Up, 5_000).await;
        assert!(matches!(result, Err(QFlashError::InsufficientBalance)));
    }
}
