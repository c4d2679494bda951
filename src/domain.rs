//! Core domain types shared by every component of the round engine.
//!
//! Mirrors the entities in the data model: rounds, entries, accounts,
//! ledger transactions, price snapshots, and house ledger rows. Every
//! enumerated field is a real Rust sum type — nothing crosses a
//! component boundary as a free-form string.

use serde::{Deserialize, Serialize};

pub const HOUSE_ADDRESS: &str = "HOUSE";

/// Trading pair duration, in seconds. Only these three windows exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Duration {
    D30,
    D60,
    D120,
}

impl Duration {
    pub fn seconds(&self) -> i64 {
        match self {
            Duration::D30 => 30,
            Duration::D60 => 60,
            Duration::D120 => 120,
        }
    }

    pub fn from_seconds(secs: i64) -> Option<Self> {
        match secs {
            30 => Some(Duration::D30),
            60 => Some(Duration::D60),
            120 => Some(Duration::D120),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Duration::D30 => "30",
            Duration::D60 => "60",
            Duration::D120 => "120",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Upcoming,
    Open,
    Locked,
    Resolving,
    Resolved,
    Cancelled,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Upcoming => "upcoming",
            RoundStatus::Open => "open",
            RoundStatus::Locked => "locked",
            RoundStatus::Resolving => "resolving",
            RoundStatus::Resolved => "resolved",
            RoundStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(RoundStatus::Upcoming),
            "open" => Some(RoundStatus::Open),
            "locked" => Some(RoundStatus::Locked),
            "resolving" => Some(RoundStatus::Resolving),
            "resolved" => Some(RoundStatus::Resolved),
            "cancelled" => Some(RoundStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundStatus::Resolved | RoundStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Up => "up",
            Side::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Side::Up),
            "down" => Some(Side::Down),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Up,
    Down,
    Push,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Up => "up",
            Outcome::Down => "down",
            Outcome::Push => "push",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Outcome::Up),
            "down" => Some(Outcome::Down),
            "push" => Some(Outcome::Push),
            _ => None,
        }
    }

    /// Strict inequality per spec: a bit-for-bit tie is always a push.
    pub fn from_prices(opening: f64, closing: f64) -> Outcome {
        if closing > opening {
            Outcome::Up
        } else if closing < opening {
            Outcome::Down
        } else {
            Outcome::Push
        }
    }

    pub fn matches_side(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (Outcome::Up, Side::Up) | (Outcome::Down, Side::Down)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Won,
    Lost,
    Push,
    Refunded,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Won => "won",
            EntryStatus::Lost => "lost",
            EntryStatus::Push => "push",
            EntryStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EntryStatus::Active),
            "won" => Some(EntryStatus::Won),
            "lost" => Some(EntryStatus::Lost),
            "push" => Some(EntryStatus::Push),
            "refunded" => Some(EntryStatus::Refunded),
            _ => None,
        }
    }
}

/// A round: one prediction window for a (pair, duration) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub pair: String,
    pub duration: Duration,
    pub status: RoundStatus,
    pub open_at: i64,
    pub lock_at: i64,
    pub close_at: i64,
    pub opening_price: Option<f64>,
    pub closing_price: Option<f64>,
    pub outcome: Option<Outcome>,
    pub up_pool_qu: i64,
    pub down_pool_qu: i64,
    pub entry_count: i64,
    pub platform_fee_qu: i64,
    pub commitment_hash: Option<String>,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub round_id: String,
    pub user_address: String,
    pub side: Side,
    pub amount_qu: i64,
    pub payout_qu: Option<i64>,
    pub status: EntryStatus,
    pub is_house: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub balance_qu: i64,
    pub total_deposited_qu: i64,
    pub total_withdrawn_qu: i64,
    pub total_wagered_qu: i64,
    pub total_won_qu: i64,
    pub total_lost_qu: i64,
    pub total_refunded_qu: i64,
    pub win_count: i64,
    pub loss_count: i64,
    pub push_count: i64,
    pub current_streak: i64,
    pub best_streak: i64,
    pub auth_token: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdrawal,
    Wager,
    Payout,
    Refund,
    PlatformFee,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdrawal => "withdrawal",
            TxKind::Wager => "wager",
            TxKind::Payout => "payout",
            TxKind::Refund => "refund",
            TxKind::PlatformFee => "platform_fee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TxKind::Deposit),
            "withdrawal" => Some(TxKind::Withdrawal),
            "wager" => Some(TxKind::Wager),
            "payout" => Some(TxKind::Payout),
            "refund" => Some(TxKind::Refund),
            "platform_fee" => Some(TxKind::PlatformFee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "confirmed" => Some(TxStatus::Confirmed),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub address: String,
    pub kind: TxKind,
    pub amount_qu: i64,
    pub round_id: Option<String>,
    pub external_tx_hash: Option<String>,
    pub status: TxStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Opening,
    Closing,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Opening => "opening",
            SnapshotKind::Closing => "closing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opening" => Some(SnapshotKind::Opening),
            "closing" => Some(SnapshotKind::Closing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSource {
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub id: String,
    pub round_id: String,
    pub kind: SnapshotKind,
    pub pair: String,
    pub median_price: f64,
    pub sources: Vec<PriceSource>,
    pub attestation_hash: String,
    pub fetched_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HouseLedgerKind {
    MatchBet,
    Win,
    Loss,
    Refund,
    FeeIncome,
}

impl HouseLedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HouseLedgerKind::MatchBet => "match_bet",
            HouseLedgerKind::Win => "win",
            HouseLedgerKind::Loss => "loss",
            HouseLedgerKind::Refund => "refund",
            HouseLedgerKind::FeeIncome => "fee_income",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "match_bet" => Some(HouseLedgerKind::MatchBet),
            "win" => Some(HouseLedgerKind::Win),
            "loss" => Some(HouseLedgerKind::Loss),
            "refund" => Some(HouseLedgerKind::Refund),
            "fee_income" => Some(HouseLedgerKind::FeeIncome),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseLedgerEntry {
    pub id: String,
    pub round_id: Option<String>,
    pub entry_id: Option<String>,
    pub kind: HouseLedgerKind,
    pub amount_qu: i64,
    pub balance_after_qu: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_prices_is_strict() {
        assert_eq!(Outcome::from_prices(100.0, 101.0), Outcome::Up);
        assert_eq!(Outcome::from_prices(100.0, 99.0), Outcome::Down);
        assert_eq!(Outcome::from_prices(100.0, 100.0), Outcome::Push);
    }

    #[test]
    fn duration_round_trips() {
        for secs in [30, 60, 120] {
            let d = Duration::from_seconds(secs).unwrap();
            assert_eq!(d.seconds(), secs);
        }
        assert!(Duration::from_seconds(45).is_none());
    }

    #[test]
    fn status_parse_round_trips() {
        for s in [
            RoundStatus::Upcoming,
            RoundStatus::Open,
            RoundStatus::Locked,
            RoundStatus::Resolving,
            RoundStatus::Resolved,
            RoundStatus::Cancelled,
        ] {
            assert_eq!(RoundStatus::parse(s.as_str()), Some(s));
        }
    }
}
