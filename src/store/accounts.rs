use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::domain::Account;
use crate::error::QFlashError;

use super::SqliteStore;

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        address: row.get("address")?,
        balance_qu: row.get("balance_qu")?,
        total_deposited_qu: row.get("total_deposited_qu")?,
        total_withdrawn_qu: row.get("total_withdrawn_qu")?,
        total_wagered_qu: row.get("total_wagered_qu")?,
        total_won_qu: row.get("total_won_qu")?,
        total_lost_qu: row.get("total_lost_qu")?,
        total_refunded_qu: row.get("total_refunded_qu")?,
        win_count: row.get("win_count")?,
        loss_count: row.get("loss_count")?,
        push_count: row.get("push_count")?,
        current_streak: row.get("current_streak")?,
        best_streak: row.get("best_streak")?,
        auth_token: row.get("auth_token")?,
        created_at: row.get("created_at")?,
    })
}

fn generate_token() -> String {
    format!("qflash_{}", Uuid::new_v4().simple())
}

impl SqliteStore {
    pub async fn get_account(&self, address: &str) -> Result<Option<Account>, QFlashError> {
        let conn = self.conn.lock().await;
        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE address = ?1",
                params![address],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub async fn get_account_by_token(&self, token: &str) -> Result<Option<Account>, QFlashError> {
        let conn = self.conn.lock().await;
        let account = conn
            .query_row(
                "SELECT * FROM accounts WHERE auth_token = ?1",
                params![token],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Idempotent create: returns the existing row if `address` already
    /// has an account, otherwise seeds a fresh opaque auth token.
    pub async fn ensure_account(&self, address: &str, now: i64) -> Result<Account, QFlashError> {
        if let Some(existing) = self.get_account(address).await? {
            return Ok(existing);
        }
        let token = generate_token();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO accounts (address, balance_qu, auth_token, created_at)
             VALUES (?1, 0, ?2, ?3)
             ON CONFLICT(address) DO NOTHING",
            params![address, token, now],
        )?;
        drop(conn);
        self.get_account(address)
            .await?
            .ok_or_else(|| QFlashError::Storage("account vanished after insert".to_string()))
    }

    pub async fn rotate_token(&self, address: &str) -> Result<Account, QFlashError> {
        let token = generate_token();
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE accounts SET auth_token = ?1 WHERE address = ?2",
            params![token, address],
        )?;
        if changed == 0 {
            return Err(QFlashError::AccountNotFound);
        }
        drop(conn);
        self.get_account(address)
            .await?
            .ok_or(QFlashError::AccountNotFound)
    }

    pub async fn credit_balance(&self, address: &str, amount_qu: i64) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE accounts SET balance_qu = balance_qu + ?1 WHERE address = ?2",
            params![amount_qu, address],
        )?;
        Ok(())
    }

    /// Debits only if the account has sufficient balance; returns
    /// `false` (no mutation) rather than allowing a negative balance.
    pub async fn debit_balance_checked(&self, address: &str, amount_qu: i64) -> Result<bool, QFlashError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE accounts SET balance_qu = balance_qu - ?1 WHERE address = ?2 AND balance_qu >= ?1",
            params![amount_qu, address],
        )?;
        Ok(changed == 1)
    }

    /// Addresses whose stored balance disagrees with the identity
    /// `balance = deposited + won + refunded - withdrawn - wagered - lost`.
    /// A non-empty result means bookkeeping drifted somewhere and needs
    /// investigation; it never auto-corrects the balance.
    pub async fn balance_invariant_mismatches(&self) -> Result<Vec<String>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT address FROM accounts WHERE balance_qu != (
                total_deposited_qu + total_won_qu + total_refunded_qu
                - total_withdrawn_qu - total_wagered_qu - total_lost_qu
            )",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn record_withdrawal_stats(&self, address: &str, amount_qu: i64) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE accounts SET total_withdrawn_qu = total_withdrawn_qu + ?1 WHERE address = ?2",
            params![amount_qu, address],
        )?;
        Ok(())
    }

    pub async fn record_wager_stats(&self, address: &str, amount_qu: i64) -> Result<(), QFlashError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE accounts SET total_wagered_qu = total_wagered_qu + ?1 WHERE address = ?2",
            params![amount_qu, address],
        )?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn ensure_account_is_idempotent() {
        let (store, _dir) = test_store();
        let a = store.ensure_account("addrA", 0).await.unwrap();
        let b = store.ensure_account("addrA", 0).await.unwrap();
        assert_eq!(a.auth_token, b.auth_token);
    }

    #[tokio::test]
    async fn debit_checked_refuses_overdraft() {
        let (store, _dir) = test_store();
        store.ensure_account("addrA", 0).await.unwrap();
        store.credit_balance("addrA", 100).await.unwrap();
        let ok = store.debit_balance_checked("addrA", 50).await.unwrap();
        let fail = store.debit_balance_checked("addrA", 1000).await.unwrap();
        assert!(ok);
        assert!(!fail);
        let account = store.get_account("addrA").await.unwrap().unwrap();
        assert_eq!(account.balance_qu, 50);
    }
}
