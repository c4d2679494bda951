use rusqlite::params;

use crate::domain::{HouseLedgerKind, HOUSE_ADDRESS};
use crate::error::QFlashError;

use super::SqliteStore;

impl SqliteStore {
    /// Appends a house ledger row carrying the house account's
    /// post-balance, so the ledger alone is an auditable replay of the
    /// house account's balance history.
    pub async fn append_house_ledger(
        &self,
        id: &str,
        round_id: Option<&str>,
        entry_id: Option<&str>,
        kind: HouseLedgerKind,
        amount_qu: i64,
        now: i64,
    ) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        let balance_after: i64 = conn.query_row(
            "SELECT balance_qu FROM accounts WHERE address = ?1",
            params![HOUSE_ADDRESS],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO house_ledger (id, round_id, entry_id, kind, amount_qu, balance_after_qu, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, round_id, entry_id, kind.as_str(), amount_qu, balance_after, now],
        )?;
        Ok(())
    }

    pub async fn total_house_exposure(&self) -> Result<i64, QFlashError> {
        let conn = self.conn.lock().await;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_qu), 0) FROM entries
             WHERE is_house = 1 AND status = 'active'",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub async fn house_exposure_for_round(&self, round_id: &str) -> Result<i64, QFlashError> {
        let conn = self.conn.lock().await;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_qu), 0) FROM entries
             WHERE is_house = 1 AND status = 'active' AND round_id = ?1",
            params![round_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}
