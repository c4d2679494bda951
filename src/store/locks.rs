use rusqlite::{params, OptionalExtension};

use crate::error::QFlashError;

use super::SqliteStore;

impl SqliteStore {
    /// Succeeds if no live lock exists for `name`, the lock already
    /// belongs to `owner` (re-entrant), or the existing lock has
    /// expired. Expiry and "now" are both evaluated by sqlite's own
    /// clock so two processes never disagree about who holds the lock.
    pub async fn acquire_lock(&self, name: &str, owner: &str, ttl_secs: i64) -> Result<bool, QFlashError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner, expires_at FROM named_locks WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let now: i64 = tx.query_row("SELECT CAST(strftime('%s','now') AS INTEGER)", [], |row| row.get(0))?;

        let can_acquire = match &existing {
            None => true,
            Some((held_owner, expires_at)) => held_owner == owner || *expires_at <= now,
        };

        if !can_acquire {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO named_locks (name, owner, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?3 + ?4)
             ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, acquired_at = excluded.acquired_at, expires_at = excluded.expires_at",
            params![name, owner, now, ttl_secs],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub async fn release_lock(&self, name: &str, owner: &str) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM named_locks WHERE name = ?1 AND owner = ?2",
            params![name, owner],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn non_owner_blocked_owner_reenters() {
        let (store, _dir) = test_store();
        assert!(store.acquire_lock("qflash_cron", "worker-a", 30).await.unwrap());
        assert!(!store.acquire_lock("qflash_cron", "worker-b", 30).await.unwrap());
        assert!(store.acquire_lock("qflash_cron", "worker-a", 30).await.unwrap());
    }

    #[tokio::test]
    async fn release_only_removes_owners_lock() {
        let (store, _dir) = test_store();
        store.acquire_lock("qflash_cron", "worker-a", 30).await.unwrap();
        store.release_lock("qflash_cron", "worker-b").await.unwrap();
        assert!(!store.acquire_lock("qflash_cron", "worker-b", 30).await.unwrap());
        store.release_lock("qflash_cron", "worker-a").await.unwrap();
        assert!(store.acquire_lock("qflash_cron", "worker-b", 30).await.unwrap());
    }
}
