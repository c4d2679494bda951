//! C6 — settlement engine. Computes the parimutuel payout and applies
//! it to every entry and account in one durable-store transaction.

use rusqlite::params;
use uuid::Uuid;

use crate::domain::{Entry, EntryStatus, HouseLedgerKind, Outcome, Side, HOUSE_ADDRESS};
use crate::error::QFlashError;
use crate::store::SqliteStore;

pub const DEFAULT_FEE_BPS: i64 = 300;

pub fn compute_fee(loser_pool_qu: i64, winner_pool_qu: i64, fee_bps: i64) -> i64 {
    if loser_pool_qu == 0 || winner_pool_qu == 0 {
        return 0;
    }
    (loser_pool_qu * fee_bps) / 10_000
}

pub struct SettlementEngine;

impl SettlementEngine {
    /// Applies the full payout algorithm for one round inside a single
    /// transaction. Only entries still `active` are touched, which is
    /// what makes a retried settlement a no-op the second time.
    pub async fn settle_round(
        &self,
        store: &SqliteStore,
        round_id: &str,
        closing_price: f64,
        outcome: Outcome,
        fee_bps: i64,
        now: i64,
    ) -> Result<i64, QFlashError> {
        let mut conn = store.conn.lock().await;
        let tx = conn.transaction()?;

        let entries = {
            let mut stmt = tx.prepare(
                "SELECT id, round_id, user_address, side, amount_qu, payout_qu, status, is_house, created_at
                 FROM entries WHERE round_id = ?1 AND status = 'active'",
            )?;
            let rows = stmt.query_map(params![round_id], |row| {
                let side: String = row.get(3)?;
                let status: String = row.get(6)?;
                let is_house: i64 = row.get(7)?;
                Ok(Entry {
                    id: row.get(0)?,
                    round_id: row.get(1)?,
                    user_address: row.get(2)?,
                    side: Side::parse(&side).unwrap_or(Side::Up),
                    amount_qu: row.get(4)?,
                    payout_qu: row.get(5)?,
                    status: EntryStatus::parse(&status).unwrap_or(EntryStatus::Active),
                    is_house: is_house != 0,
                    created_at: row.get(8)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if entries.is_empty() {
            tx.commit()?;
            return Ok(0);
        }

        let mut fee_qu = 0i64;

        if matches!(outcome, Outcome::Push) {
            for entry in &entries {
                Self::credit_entry(&tx, entry, entry.amount_qu, EntryStatus::Push, now)?;
                if entry.is_house {
                    Self::house_ledger_row(&tx, round_id, &entry.id, HouseLedgerKind::Refund, entry.amount_qu, now)?;
                }
            }
        } else {
            let winners: Vec<&Entry> = entries.iter().filter(|e| outcome.matches_side(e.side)).collect();
            let losers: Vec<&Entry> = entries.iter().filter(|e| !outcome.matches_side(e.side)).collect();

            if winners.is_empty() || losers.is_empty() {
                for entry in &entries {
                    Self::credit_entry(&tx, entry, entry.amount_qu, EntryStatus::Refunded, now)?;
                    if entry.is_house {
                        Self::house_ledger_row(&tx, round_id, &entry.id, HouseLedgerKind::Refund, entry.amount_qu, now)?;
                    }
                }
            } else {
                let winner_pool: i64 = winners.iter().map(|e| e.amount_qu).sum();
                let loser_pool: i64 = losers.iter().map(|e| e.amount_qu).sum();
                fee_qu = compute_fee(loser_pool, winner_pool, fee_bps);
                let net_loser_pool = loser_pool - fee_qu;

                for winner in winners.iter().copied() {
                    let share_payout = ((net_loser_pool as i128 * winner.amount_qu as i128) / winner_pool as i128) as i64;
                    let payout = winner.amount_qu + share_payout;
                    Self::credit_entry(&tx, winner, payout, EntryStatus::Won, now)?;
                    if winner.is_house {
                        Self::house_ledger_row(&tx, round_id, &winner.id, HouseLedgerKind::Win, payout, now)?;
                    }
                }
                for loser in losers.iter().copied() {
                    Self::mark_lost(&tx, loser, now)?;
                    if loser.is_house {
                        Self::house_ledger_row(&tx, round_id, &loser.id, HouseLedgerKind::Loss, 0, now)?;
                    }
                }
            }
        }

        tx.execute(
            "UPDATE rounds SET status = 'resolved', closing_price = ?1, outcome = ?2,
                platform_fee_qu = ?3, resolved_at = ?4 WHERE id = ?5",
            params![closing_price, outcome.as_str(), fee_qu, now, round_id],
        )?;

        tx.commit()?;
        Ok(fee_qu)
    }

    fn credit_entry(
        tx: &rusqlite::Transaction,
        entry: &Entry,
        payout_qu: i64,
        status: EntryStatus,
        now: i64,
    ) -> Result<(), QFlashError> {
        tx.execute(
            "UPDATE entries SET payout_qu = ?1, status = ?2 WHERE id = ?3",
            params![payout_qu, status.as_str(), entry.id],
        )?;

        if matches!(status, EntryStatus::Refunded) {
            tx.execute(
                "UPDATE accounts SET balance_qu = balance_qu + ?1, total_refunded_qu = total_refunded_qu + ?1
                 WHERE address = ?2",
                params![payout_qu, entry.user_address],
            )?;
        } else if matches!(status, EntryStatus::Push) {
            tx.execute(
                "UPDATE accounts SET balance_qu = balance_qu + ?1 WHERE address = ?2",
                params![payout_qu, entry.user_address],
            )?;
            tx.execute(
                "UPDATE accounts SET push_count = push_count + 1 WHERE address = ?1",
                params![entry.user_address],
            )?;
        } else {
            tx.execute(
                "UPDATE accounts SET
                    balance_qu = balance_qu + ?1,
                    total_won_qu = total_won_qu + ?1,
                    win_count = win_count + 1,
                    current_streak = CASE WHEN current_streak >= 0 THEN current_streak + 1 ELSE 1 END,
                    best_streak = MAX(best_streak, CASE WHEN current_streak >= 0 THEN current_streak + 1 ELSE 1 END)
                 WHERE address = ?2",
                params![payout_qu, entry.user_address],
            )?;
        }
        let _ = now;
        Ok(())
    }

    fn mark_lost(tx: &rusqlite::Transaction, entry: &Entry, _now: i64) -> Result<(), QFlashError> {
        tx.execute(
            "UPDATE entries SET payout_qu = 0, status = 'lost' WHERE id = ?1",
            params![entry.id],
        )?;
        tx.execute(
            "UPDATE accounts SET
                total_lost_qu = total_lost_qu + ?1,
                loss_count = loss_count + 1,
                current_streak = CASE WHEN current_streak <= 0 THEN current_streak - 1 ELSE -1 END
             WHERE address = ?2",
            params![entry.amount_qu, entry.user_address],
        )?;
        Ok(())
    }

    fn house_ledger_row(
        tx: &rusqlite::Transaction,
        round_id: &str,
        entry_id: &str,
        kind: HouseLedgerKind,
        amount_qu: i64,
        now: i64,
    ) -> Result<(), QFlashError> {
        let balance_after: i64 = tx.query_row(
            "SELECT balance_qu FROM accounts WHERE address = ?1",
            params![HOUSE_ADDRESS],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO house_ledger (id, round_id, entry_id, kind, amount_qu, balance_after_qu, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![Uuid::new_v4().to_string(), round_id, entry_id, kind.as_str(), amount_qu, balance_after, now],
        )?;
        Ok(())
    }

    /// Cancels a round and refunds every active entry in one
    /// transaction: the oracle-unavailable and stale-resolving paths.
    pub async fn refund_all_entries(&self, store: &SqliteStore, round_id: &str, now: i64) -> Result<(), QFlashError> {
        let mut conn = store.conn.lock().await;
        let tx = conn.transaction()?;

        let entries = {
            let mut stmt = tx.prepare(
                "SELECT id, round_id, user_address, side, amount_qu, payout_qu, status, is_house, created_at
                 FROM entries WHERE round_id = ?1 AND status = 'active'",
            )?;
            let rows = stmt.query_map(params![round_id], |row| {
                let side: String = row.get(3)?;
                let status: String = row.get(6)?;
                let is_house: i64 = row.get(7)?;
                Ok(Entry {
                    id: row.get(0)?,
                    round_id: row.get(1)?,
                    user_address: row.get(2)?,
                    side: Side::parse(&side).unwrap_or(Side::Up),
                    amount_qu: row.get(4)?,
                    payout_qu: row.get(5)?,
                    status: EntryStatus::parse(&status).unwrap_or(EntryStatus::Active),
                    is_house: is_house != 0,
                    created_at: row.get(8)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for entry in &entries {
            Self::credit_entry(&tx, entry, entry.amount_qu, EntryStatus::Refunded, now)?;
            if entry.is_house {
                Self::house_ledger_row(&tx, round_id, &entry.id, HouseLedgerKind::Refund, entry.amount_qu, now)?;
            }
        }

        tx.execute(
            "UPDATE rounds SET status = 'cancelled' WHERE id = ?1",
            params![round_id],
        )?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Duration, Round, RoundStatus};
    use crate::store::test_store;

    async fn setup_round_with_entries(
        store: &SqliteStore,
        entries: &[(&str, Side, i64, bool)],
    ) -> String {
        let round_id = "r1".to_string();
        store
            .create_round(&Round {
                id: round_id.clone(),
                pair: "BTC-USD".into(),
                duration: Duration::D30,
                status: RoundStatus::Upcoming,
                open_at: 0,
                lock_at: 25,
                close_at: 30,
                opening_price: None,
                closing_price: None,
                outcome: None,
                up_pool_qu: 0,
                down_pool_qu: 0,
                entry_count: 0,
                platform_fee_qu: 0,
                commitment_hash: None,
                resolved_at: None,
            })
            .await
            .unwrap();
        store.mark_round_open(&round_id, 100.0, "hash").await.unwrap();

        for (address, side, amount, is_house) in entries {
            store.ensure_account(address, 0).await.unwrap();
            store.credit_balance(address, *amount).await.unwrap();
            store.debit_balance_checked(address, *amount).await.unwrap();
            store
                .place_wager(
                    &Entry {
                        id: Uuid::new_v4().to_string(),
                        round_id: round_id.clone(),
                        user_address: address.to_string(),
                        side: *side,
                        amount_qu: *amount,
                        payout_qu: None,
                        status: EntryStatus::Active,
                        is_house: *is_house,
                        created_at: 0,
                    },
                    0,
                )
                .await
                .unwrap();
        }
        round_id
    }

    #[tokio::test]
    async fn two_sided_up_win_matches_worked_example() {
        let (store, _dir) = test_store();
        store.ensure_account(HOUSE_ADDRESS, 0).await.unwrap();
        let round_id = setup_round_with_entries(
            &store,
            &[("userA", Side::Up, 100_000, false), ("userB", Side::Down, 200_000, false)],
        )
        .await;

        let engine = SettlementEngine;
        let fee = engine.settle_round(&store, &round_id, 110.0, Outcome::Up, 300, 0).await.unwrap();
        assert_eq!(fee, 6_000);

        let entries = store.entries_for_round(&round_id).await.unwrap();
        let a = entries.iter().find(|e| e.user_address == "userA").unwrap();
        let b = entries.iter().find(|e| e.user_address == "userB").unwrap();
        assert_eq!(a.payout_qu, Some(294_000));
        assert_eq!(a.status, EntryStatus::Won);
        assert_eq!(b.payout_qu, Some(0));
        assert_eq!(b.status, EntryStatus::Lost);

        let round = store.get_round(&round_id).await.unwrap().unwrap();
        assert_eq!(round.closing_price, Some(110.0));
        assert_eq!(round.outcome, Some(Outcome::Up));
        assert_eq!(round.status, RoundStatus::Resolved);
    }

    #[tokio::test]
    async fn push_refunds_both_sides() {
        let (store, _dir) = test_store();
        store.ensure_account(HOUSE_ADDRESS, 0).await.unwrap();
        let round_id = setup_round_with_entries(
            &store,
            &[("userA", Side::Up, 50_000, false), ("userB", Side::Down, 50_000, false)],
        )
        .await;

        let engine = SettlementEngine;
        let fee = engine.settle_round(&store, &round_id, 100.0, Outcome::Push, 300, 0).await.unwrap();
        assert_eq!(fee, 0);

        for e in store.entries_for_round(&round_id).await.unwrap() {
            assert_eq!(e.payout_qu, Some(50_000));
            assert_eq!(e.status, EntryStatus::Push);
        }
    }

    #[tokio::test]
    async fn one_sided_with_no_counterparty_refunds() {
        let (store, _dir) = test_store();
        store.ensure_account(HOUSE_ADDRESS, 0).await.unwrap();
        let round_id = setup_round_with_entries(&store, &[("userA", Side::Up, 100_000, false)]).await;

        let engine = SettlementEngine;
        let fee = engine.settle_round(&store, &round_id, 110.0, Outcome::Up, 300, 0).await.unwrap();
        assert_eq!(fee, 0);

        let entries = store.entries_for_round(&round_id).await.unwrap();
        assert_eq!(entries[0].status, EntryStatus::Refunded);
        assert_eq!(entries[0].payout_qu, Some(100_000));
    }

    #[tokio::test]
    async fn house_matched_one_sided_worked_example() {
        let (store, _dir) = test_store();
        store.ensure_account(HOUSE_ADDRESS, 0).await.unwrap();
        let round_id = setup_round_with_entries(
            &store,
            &[("userA", Side::Up, 100_000, false), (HOUSE_ADDRESS, Side::Down, 100_000, true)],
        )
        .await;

        let engine = SettlementEngine;
        let fee = engine.settle_round(&store, &round_id, 110.0, Outcome::Up, 300, 0).await.unwrap();
        assert_eq!(fee, 3_000);

        let entries = store.entries_for_round(&round_id).await.unwrap();
        let a = entries.iter().find(|e| e.user_address == "userA").unwrap();
        assert_eq!(a.payout_qu, Some(197_000));
    }

    #[tokio::test]
    async fn settling_twice_is_a_no_op() {
        let (store, _dir) = test_store();
        store.ensure_account(HOUSE_ADDRESS, 0).await.unwrap();
        let round_id = setup_round_with_entries(
            &store,
            &[("userA", Side::Up, 100_000, false), ("userB", Side::Down, 200_000, false)],
        )
        .await;

        let engine = SettlementEngine;
        engine.settle_round(&store, &round_id, 110.0, Outcome::Up, 300, 0).await.unwrap();
        let second_fee = engine.settle_round(&store, &round_id, 110.0, Outcome::Up, 300, 1).await.unwrap();
        assert_eq!(second_fee, 0);
    }
}
