use rusqlite::{params, Row};

use crate::domain::{Entry, EntryStatus, Side, HOUSE_ADDRESS};
use crate::error::QFlashError;

use super::SqliteStore;

fn row_to_entry(row: &Row) -> rusqlite::Result<Entry> {
    let side: String = row.get("side")?;
    let status: String = row.get("status")?;
    let is_house: i64 = row.get("is_house")?;
    Ok(Entry {
        id: row.get("id")?,
        round_id: row.get("round_id")?,
        user_address: row.get("user_address")?,
        side: Side::parse(&side).unwrap_or(Side::Up),
        amount_qu: row.get("amount_qu")?,
        payout_qu: row.get("payout_qu")?,
        status: EntryStatus::parse(&status).unwrap_or(EntryStatus::Active),
        is_house: is_house != 0,
        created_at: row.get("created_at")?,
    })
}

impl SqliteStore {
    /// Atomically checks the round is `open`, inserts the entry, and
    /// bumps the round's pool — all three effects observed together or
    /// not at all. The partial unique index on `(round_id, user_address)`
    /// (excluding the reserved house address) is what actually
    /// arbitrates concurrent same-address races; this just surfaces
    /// that as a typed error. House entries are exempt so the house
    /// can hold more than one matched entry per round.
    pub async fn place_wager(
        &self,
        entry: &Entry,
        now: i64,
    ) -> Result<(), QFlashError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let status: String = tx.query_row(
            "SELECT status FROM rounds WHERE id = ?1",
            params![entry.round_id],
            |row| row.get(0),
        )?;
        if status != "open" {
            return Err(QFlashError::RoundNotOpen);
        }

        let inserted = if entry.is_house {
            tx.execute(
                "INSERT INTO entries (id, round_id, user_address, side, amount_qu, payout_qu, status, is_house, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)",
                params![
                    entry.id,
                    entry.round_id,
                    entry.user_address,
                    entry.side.as_str(),
                    entry.amount_qu,
                    entry.status.as_str(),
                    entry.is_house as i64,
                    now,
                ],
            )?
        } else {
            tx.execute(
                "INSERT INTO entries (id, round_id, user_address, side, amount_qu, payout_qu, status, is_house, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)
                 ON CONFLICT(round_id, user_address) WHERE user_address != 'HOUSE' DO NOTHING",
                params![
                    entry.id,
                    entry.round_id,
                    entry.user_address,
                    entry.side.as_str(),
                    entry.amount_qu,
                    entry.status.as_str(),
                    entry.is_house as i64,
                    now,
                ],
            )?
        };
        if inserted == 0 {
            return Err(QFlashError::DuplicateUserEntry);
        }

        let column = if matches!(entry.side, Side::Up) {
            "up_pool_qu"
        } else {
            "down_pool_qu"
        };
        tx.execute(
            &format!(
                "UPDATE rounds SET {column} = {column} + ?1, entry_count = entry_count + 1 WHERE id = ?2"
            ),
            params![entry.amount_qu, entry.round_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub async fn entries_for_round(&self, round_id: &str) -> Result<Vec<Entry>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM entries WHERE round_id = ?1")?;
        let rows = stmt
            .query_map(params![round_id], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn active_entries_for_round(&self, round_id: &str) -> Result<Vec<Entry>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM entries WHERE round_id = ?1 AND status = 'active'",
        )?;
        let rows = stmt
            .query_map(params![round_id], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn entries_for_address(&self, address: &str, limit: i64) -> Result<Vec<Entry>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM entries WHERE user_address = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![address, limit], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Duration, Round, RoundStatus};
    use crate::store::test_store;
    use uuid::Uuid;

    async fn open_round(store: &SqliteStore, id: &str) {
        store
            .create_round(&Round {
                id: id.to_string(),
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
        store.mark_round_open(id, 100.0, "hash").await.unwrap();
    }

    fn entry(round_id: &str, address: &str, side: Side, amount: i64) -> Entry {
        Entry {
            id: Uuid::new_v4().to_string(),
            round_id: round_id.to_string(),
            user_address: address.to_string(),
            side,
            amount_qu: amount,
            payout_qu: None,
            status: EntryStatus::Active,
            is_house: false,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_address_rejected() {
        let (store, _dir) = test_store();
        open_round(&store, "r1").await;
        store
            .place_wager(&entry("r1", "addrA", Side::Up, 1000), 0)
            .await
            .unwrap();
        let second = store
            .place_wager(&entry("r1", "addrA", Side::Down, 2000), 0)
            .await;
        assert!(matches!(second, Err(QFlashError::DuplicateUserEntry)));

        let round = store.get_round("r1").await.unwrap().unwrap();
        assert_eq!(round.up_pool_qu, 1000);
        assert_eq!(round.entry_count, 1);
    }

    #[tokio::test]
    async fn house_can_hold_more_than_one_entry_per_round() {
        let (store, _dir) = test_store();
        open_round(&store, "r1").await;
        store
            .place_wager(&entry("r1", HOUSE_ADDRESS, Side::Up, 1000), 0)
            .await
            .unwrap();
        store
            .place_wager(&entry("r1", HOUSE_ADDRESS, Side::Down, 2000), 0)
            .await
            .unwrap();

        let entries = store.entries_for_round("r1").await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn wager_on_non_open_round_rejected() {
        let (store, _dir) = test_store();
        store
            .create_round(&Round {
                id: "r2".into(),
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
        let result = store.place_wager(&entry("r2", "addrA", Side::Up, 1000), 0).await;
        assert!(matches!(result, Err(QFlashError::RoundNotOpen)));
    }
}
