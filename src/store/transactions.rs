use rusqlite::{params, Row};

use crate::domain::{Transaction, TxKind, TxStatus};
use crate::error::QFlashError;

use super::SqliteStore;

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    Ok(Transaction {
        id: row.get("id")?,
        address: row.get("address")?,
        kind: TxKind::parse(&kind).unwrap_or(TxKind::Wager),
        amount_qu: row.get("amount_qu")?,
        round_id: row.get("round_id")?,
        external_tx_hash: row.get("external_tx_hash")?,
        status: TxStatus::parse(&status).unwrap_or(TxStatus::Pending),
        created_at: row.get("created_at")?,
    })
}

impl SqliteStore {
    pub async fn insert_transaction(&self, tx: &Transaction) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO transactions (id, address, kind, amount_qu, round_id, external_tx_hash, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.id,
                tx.address,
                tx.kind.as_str(),
                tx.amount_qu,
                tx.round_id,
                tx.external_tx_hash,
                tx.status.as_str(),
                tx.created_at,
            ],
        )?;
        Ok(())
    }

    /// Credits a deposit and records its transaction in one step,
    /// relying on the partial unique index over confirmed deposit
    /// hashes to make the whole operation idempotent: a duplicate
    /// hash fails the insert and the balance is left untouched.
    pub async fn credit_deposit(
        &self,
        address: &str,
        amount_qu: i64,
        external_tx_hash: &str,
        tx_id: &str,
        now: i64,
    ) -> Result<(), QFlashError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO transactions (id, address, kind, amount_qu, round_id, external_tx_hash, status, created_at)
             VALUES (?1, ?2, 'deposit', ?3, NULL, ?4, 'confirmed', ?5)",
            params![tx_id, address, amount_qu, external_tx_hash, now],
        );
        if let Err(rusqlite::Error::SqliteFailure(e, _)) = &inserted {
            if e.code == rusqlite::ErrorCode::ConstraintViolation {
                return Err(QFlashError::DuplicateDepositHash);
            }
        }
        inserted?;

        tx.execute(
            "UPDATE accounts SET balance_qu = balance_qu + ?1, total_deposited_qu = total_deposited_qu + ?1
             WHERE address = ?2",
            params![amount_qu, address],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub async fn transactions_for_address(&self, address: &str, limit: i64) -> Result<Vec<Transaction>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM transactions WHERE address = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![address, limit], row_to_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Withdrawals recorded but not yet confirmed by the external
    /// relayer that signs and broadcasts them on-chain.
    pub async fn pending_withdrawals(&self) -> Result<Vec<Transaction>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM transactions WHERE kind = 'withdrawal' AND status = 'pending' ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use uuid::Uuid;

    #[tokio::test]
    async fn duplicate_deposit_hash_rejected() {
        let (store, _dir) = test_store();
        store.ensure_account("addrA", 0).await.unwrap();
        store
            .credit_deposit("addrA", 1000, "0xhash1", &Uuid::new_v4().to_string(), 0)
            .await
            .unwrap();
        let second = store
            .credit_deposit("addrA", 1000, "0xhash1", &Uuid::new_v4().to_string(), 0)
            .await;
        assert!(matches!(second, Err(QFlashError::DuplicateDepositHash)));

        let account = store.get_account("addrA").await.unwrap().unwrap();
        assert_eq!(account.balance_qu, 1000);
    }
}
