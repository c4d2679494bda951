use rusqlite::{params, Row};

use crate::domain::{PriceSnapshot, PriceSource, SnapshotKind};
use crate::error::QFlashError;

use super::SqliteStore;

fn row_to_snapshot(row: &Row) -> rusqlite::Result<PriceSnapshot> {
    let kind: String = row.get("kind")?;
    let sources_json: String = row.get("sources")?;
    let sources: Vec<PriceSource> = serde_json::from_str(&sources_json).unwrap_or_default();
    Ok(PriceSnapshot {
        id: row.get("id")?,
        round_id: row.get("round_id")?,
        kind: SnapshotKind::parse(&kind).unwrap_or(SnapshotKind::Opening),
        pair: row.get("pair")?,
        median_price: row.get("median_price")?,
        sources,
        attestation_hash: row.get("attestation_hash")?,
        fetched_at: row.get("fetched_at")?,
    })
}

impl SqliteStore {
    pub async fn insert_snapshot(&self, snapshot: &PriceSnapshot) -> Result<(), QFlashError> {
        let sources_json = crate::crypto::canonical_json(&serde_json::to_value(&snapshot.sources)
            .map_err(|e| QFlashError::Storage(e.to_string()))?);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO price_snapshots (id, round_id, kind, pair, median_price, sources, attestation_hash, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.id,
                snapshot.round_id,
                snapshot.kind.as_str(),
                snapshot.pair,
                snapshot.median_price,
                sources_json,
                snapshot.attestation_hash,
                snapshot.fetched_at,
            ],
        )?;
        Ok(())
    }

    pub async fn snapshots_for_round(&self, round_id: &str) -> Result<Vec<PriceSnapshot>, QFlashError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM price_snapshots WHERE round_id = ?1")?;
        let rows = stmt
            .query_map(params![round_id], row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
