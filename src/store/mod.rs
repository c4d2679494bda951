//! C2 — durable store. One `SqliteStore` owns one connection behind a
//! `tokio::sync::Mutex`, mirroring the teacher's one-struct-per-database
//! convention. Each entity gets its own `impl SqliteStore` block in its
//! own file; all of the CAS/transaction primitives the engine needs
//! live alongside the entity they operate on.

pub mod accounts;
pub mod entries;
pub mod house_ledger;
pub mod locks;
pub mod rounds;
pub mod snapshots;
pub mod transactions;

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::QFlashError;

pub struct SqliteStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, QFlashError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), QFlashError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rounds (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                status TEXT NOT NULL,
                open_at INTEGER NOT NULL,
                lock_at INTEGER NOT NULL,
                close_at INTEGER NOT NULL,
                opening_price REAL,
                closing_price REAL,
                outcome TEXT,
                up_pool_qu INTEGER NOT NULL DEFAULT 0,
                down_pool_qu INTEGER NOT NULL DEFAULT 0,
                entry_count INTEGER NOT NULL DEFAULT 0,
                platform_fee_qu INTEGER NOT NULL DEFAULT 0,
                commitment_hash TEXT,
                resolved_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_rounds_pair_duration ON rounds(pair, duration_secs);
            CREATE INDEX IF NOT EXISTS idx_rounds_status ON rounds(status);
            CREATE INDEX IF NOT EXISTS idx_rounds_close_at ON rounds(close_at);

            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                round_id TEXT NOT NULL REFERENCES rounds(id),
                user_address TEXT NOT NULL,
                side TEXT NOT NULL,
                amount_qu INTEGER NOT NULL,
                payout_qu INTEGER,
                status TEXT NOT NULL,
                is_house INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_round ON entries(round_id);
            CREATE INDEX IF NOT EXISTS idx_entries_address ON entries(user_address);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_round_address
                ON entries(round_id, user_address)
                WHERE user_address != 'HOUSE';

            CREATE TABLE IF NOT EXISTS accounts (
                address TEXT PRIMARY KEY,
                balance_qu INTEGER NOT NULL DEFAULT 0,
                total_deposited_qu INTEGER NOT NULL DEFAULT 0,
                total_withdrawn_qu INTEGER NOT NULL DEFAULT 0,
                total_wagered_qu INTEGER NOT NULL DEFAULT 0,
                total_won_qu INTEGER NOT NULL DEFAULT 0,
                total_lost_qu INTEGER NOT NULL DEFAULT 0,
                total_refunded_qu INTEGER NOT NULL DEFAULT 0,
                win_count INTEGER NOT NULL DEFAULT 0,
                loss_count INTEGER NOT NULL DEFAULT 0,
                push_count INTEGER NOT NULL DEFAULT 0,
                current_streak INTEGER NOT NULL DEFAULT 0,
                best_streak INTEGER NOT NULL DEFAULT 0,
                auth_token TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount_qu INTEGER NOT NULL,
                round_id TEXT,
                external_tx_hash TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_address ON transactions(address);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_deposit_hash
                ON transactions(address, external_tx_hash)
                WHERE kind = 'deposit' AND status = 'confirmed' AND external_tx_hash IS NOT NULL;

            CREATE TABLE IF NOT EXISTS price_snapshots (
                id TEXT PRIMARY KEY,
                round_id TEXT NOT NULL REFERENCES rounds(id),
                kind TEXT NOT NULL,
                pair TEXT NOT NULL,
                median_price REAL NOT NULL,
                sources TEXT NOT NULL,
                attestation_hash TEXT NOT NULL,
                fetched_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_round ON price_snapshots(round_id);

            CREATE TABLE IF NOT EXISTS house_ledger (
                id TEXT PRIMARY KEY,
                round_id TEXT,
                entry_id TEXT,
                kind TEXT NOT NULL,
                amount_qu INTEGER NOT NULL,
                balance_after_qu INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS named_locks (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// The store's own clock, so every "now" comparison — readiness
    /// queries, lock expiry — is evaluated by sqlite itself rather
    /// than by whichever process happens to be calling in, which
    /// would otherwise let wall-clock skew between engine processes
    /// produce inconsistent readiness decisions.
    pub async fn now(&self) -> Result<i64, QFlashError> {
        let conn = self.conn.lock().await;
        let now: i64 = conn.query_row("SELECT CAST(strftime('%s','now') AS INTEGER)", [], |row| row.get(0))?;
        Ok(now)
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("qflash-test.db");
    let store = SqliteStore::new(path.to_str().unwrap()).expect("store opens");
    (store, dir)
}
