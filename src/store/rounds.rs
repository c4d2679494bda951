use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Duration, Outcome, Round, RoundStatus};
use crate::error::QFlashError;

use super::SqliteStore;

fn row_to_round(row: &Row) -> rusqlite::Result<Round> {
    let duration_secs: i64 = row.get("duration_secs")?;
    let status: String = row.get("status")?;
    let outcome: Option<String> = row.get("outcome")?;
    Ok(Round {
        id: row.get("id")?,
        pair: row.get("pair")?,
        duration: Duration::from_seconds(duration_secs).unwrap_or(Duration::D30),
        status: RoundStatus::parse(&status).unwrap_or(RoundStatus::Cancelled),
        open_at: row.get("open_at")?,
        lock_at: row.get("lock_at")?,
        close_at: row.get("close_at")?,
        opening_price: row.get("opening_price")?,
        closing_price: row.get("closing_price")?,
        outcome: outcome.and_then(|o| Outcome::parse(&o)),
        up_pool_qu: row.get("up_pool_qu")?,
        down_pool_qu: row.get("down_pool_qu")?,
        entry_count: row.get("entry_count")?,
        platform_fee_qu: row.get("platform_fee_qu")?,
        commitment_hash: row.get("commitment_hash")?,
        resolved_at: row.get("resolved_at")?,
    })
}

impl SqliteStore {
    pub async fn create_round(&self, round: &Round) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO rounds (id, pair, duration_secs, status, open_at, lock_at, close_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                round.id,
                round.pair,
                round.duration.seconds(),
                round.status.as_str(),
                round.open_at,
                round.lock_at,
                round.close_at,
            ],
        )?;
        Ok(())
    }

    pub async fn get_round(&self, id: &str) -> Result<Option<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let round = conn
            .query_row("SELECT * FROM rounds WHERE id = ?1", params![id], row_to_round)
            .optional()?;
        Ok(round)
    }

    /// Atomic compare-and-swap: succeeds only if the row's current
    /// status matches `expected`. Callers rely on this to make sure
    /// exactly one cron worker drives a given transition.
    pub async fn cas_round_status(
        &self,
        id: &str,
        expected: RoundStatus,
        new_status: RoundStatus,
    ) -> Result<bool, QFlashError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE rounds SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![new_status.as_str(), id, expected.as_str()],
        )?;
        Ok(changed == 1)
    }

    pub async fn mark_round_open(
        &self,
        id: &str,
        opening_price: f64,
        commitment_hash: &str,
    ) -> Result<bool, QFlashError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE rounds SET status = ?1, opening_price = ?2, commitment_hash = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                RoundStatus::Open.as_str(),
                opening_price,
                commitment_hash,
                id,
                RoundStatus::Upcoming.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub async fn mark_round_locked(&self, id: &str) -> Result<bool, QFlashError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE rounds SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![
                RoundStatus::Locked.as_str(),
                id,
                RoundStatus::Open.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub async fn mark_round_cancelled(&self, id: &str) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE rounds SET status = ?1 WHERE id = ?2",
            params![RoundStatus::Cancelled.as_str(), id],
        )?;
        Ok(())
    }

    pub async fn increment_pool(&self, id: &str, side_is_up: bool, amount_qu: i64) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        let column = if side_is_up { "up_pool_qu" } else { "down_pool_qu" };
        conn.execute(
            &format!(
                "UPDATE rounds SET {column} = {column} + ?1, entry_count = entry_count + 1 WHERE id = ?2"
            ),
            params![amount_qu, id],
        )?;
        Ok(())
    }

    pub async fn rounds_ready_to_open(&self) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM rounds WHERE status = ?1 AND open_at <= strftime('%s','now')",
        )?;
        let rows = stmt
            .query_map(params![RoundStatus::Upcoming.as_str()], row_to_round)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn rounds_ready_to_lock(&self) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM rounds WHERE status = ?1 AND lock_at <= strftime('%s','now')",
        )?;
        let rows = stmt
            .query_map(params![RoundStatus::Open.as_str()], row_to_round)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn rounds_ready_to_resolve(&self) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM rounds WHERE status = ?1 AND close_at <= strftime('%s','now')",
        )?;
        let rows = stmt
            .query_map(params![RoundStatus::Locked.as_str()], row_to_round)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn stale_resolving_rounds(&self, max_resolution_delay_secs: i64) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM rounds WHERE status = ?1 AND close_at <= strftime('%s','now') - ?2",
        )?;
        let rows = stmt
            .query_map(
                params![RoundStatus::Resolving.as_str(), max_resolution_delay_secs],
                row_to_round,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn upcoming_count(&self, pair: &str, duration: Duration) -> Result<i64, QFlashError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rounds WHERE pair = ?1 AND duration_secs = ?2 AND status IN ('upcoming','open')",
            params![pair, duration.seconds()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub async fn last_close_at(&self, pair: &str, duration: Duration) -> Result<Option<i64>, QFlashError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT MAX(close_at) FROM rounds WHERE pair = ?1 AND duration_secs = ?2",
                params![pair, duration.seconds()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(result)
    }

    pub async fn active_rounds(
        &self,
        pair: Option<&str>,
        duration: Option<Duration>,
    ) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM rounds WHERE status IN ('upcoming','open','locked','resolving')".to_string();
        if pair.is_some() {
            sql.push_str(" AND pair = ?1");
        }
        if duration.is_some() {
            sql.push_str(if pair.is_some() { " AND duration_secs = ?2" } else { " AND duration_secs = ?1" });
        }
        sql.push_str(" ORDER BY open_at ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match (pair, duration) {
            (Some(p), Some(d)) => stmt
                .query_map(params![p, d.seconds()], row_to_round)?
                .collect::<Result<Vec<_>, _>>()?,
            (Some(p), None) => stmt
                .query_map(params![p], row_to_round)?
                .collect::<Result<Vec<_>, _>>()?,
            (None, Some(d)) => stmt
                .query_map(params![d.seconds()], row_to_round)?
                .collect::<Result<Vec<_>, _>>()?,
            (None, None) => stmt
                .query_map([], row_to_round)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    pub async fn recent_resolved(&self, n: i64) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM rounds WHERE status = 'resolved' ORDER BY resolved_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![n], row_to_round)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_rounds(
        &self,
        pair: Option<&str>,
        duration: Option<Duration>,
        status: Option<RoundStatus>,
    ) -> Result<Vec<Round>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut sql = "SELECT * FROM rounds WHERE 1=1".to_string();
        let mut clauses = Vec::new();
        if pair.is_some() {
            clauses.push("pair = ?".to_string());
        }
        if duration.is_some() {
            clauses.push("duration_secs = ?".to_string());
        }
        if status.is_some() {
            clauses.push("status = ?".to_string());
        }
        for clause in &clauses {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
        sql.push_str(" ORDER BY open_at DESC LIMIT 200");

        let mut stmt = conn.prepare(&sql)?;
        let mut idx = 1;
        if let Some(p) = pair {
            stmt.raw_bind_parameter(idx, p)?;
            idx += 1;
        }
        if let Some(d) = duration {
            stmt.raw_bind_parameter(idx, d.seconds())?;
            idx += 1;
        }
        if let Some(s) = status {
            stmt.raw_bind_parameter(idx, s.as_str())?;
        }
        let mut rows_iter = stmt.raw_query();
        let mut rounds = Vec::new();
        while let Some(row) = rows_iter.next()? {
            rounds.push(row_to_round(row)?);
        }
        Ok(rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    fn sample_round(id: &str) -> Round {
        Round {
            id: id.to_string(),
            pair: "BTC-USD".to_string(),
            duration: Duration::D30,
            status: RoundStatus::Upcoming,
            open_at: 100,
            lock_at: 125,
            close_at: 130,
            opening_price: None,
            closing_price: None,
            outcome: None,
            up_pool_qu: 0,
            down_pool_qu: 0,
            entry_count: 0,
            platform_fee_qu: 0,
            commitment_hash: None,
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn cas_only_succeeds_once() {
        let (store, _dir) = test_store();
        store.create_round(&sample_round("r1")).await.unwrap();
        let first = store
            .cas_round_status("r1", RoundStatus::Upcoming, RoundStatus::Cancelled)
            .await
            .unwrap();
        let second = store
            .cas_round_status("r1", RoundStatus::Upcoming, RoundStatus::Cancelled)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn mark_open_sets_fields_atomically() {
        let (store, _dir) = test_store();
        store.create_round(&sample_round("r1")).await.unwrap();
        let ok = store.mark_round_open("r1", 100.0, "hash").await.unwrap();
        assert!(ok);
        let round = store.get_round("r1").await.unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Open);
        assert_eq!(round.opening_price, Some(100.0));
        assert_eq!(round.commitment_hash.as_deref(), Some("hash"));
    }
}
