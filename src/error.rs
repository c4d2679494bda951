//! Error taxonomy.
//!
//! Internal plumbing returns `anyhow::Result` throughout (store, price
//! feed, settlement math); `QFlashError` exists at the edges where a
//! failure needs a stable identity — the HTTP API and the cron driver's
//! per-phase error capture.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum QFlashError {
    #[error("oracle unavailable for pair {0}")]
    OracleUnavailable(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("wager amount outside the configured min/max bounds")]
    InsufficientBounds,

    #[error("round is not open")]
    RoundNotOpen,

    #[error("account already has an active entry in this round")]
    DuplicateUserEntry,

    #[error("rate limited")]
    RateLimited,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("deposit with this transaction hash was already credited")]
    DuplicateDepositHash,

    #[error("could not acquire lock {0}")]
    LockNotAcquired(String),

    #[error("round stuck in resolving past the maximum delay")]
    StaleResolving,

    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    #[error("house exposure cap exceeded")]
    HouseCapacityExceeded,

    #[error("round not found")]
    RoundNotFound,

    #[error("account not found")]
    AccountNotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for QFlashError {
    fn from(e: rusqlite::Error) -> Self {
        QFlashError::Storage(e.to_string())
    }
}

impl QFlashError {
    fn status(&self) -> StatusCode {
        match self {
            QFlashError::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QFlashError::InsufficientBalance => StatusCode::BAD_REQUEST,
            QFlashError::InsufficientBounds => StatusCode::BAD_REQUEST,
            QFlashError::RoundNotOpen => StatusCode::BAD_REQUEST,
            QFlashError::DuplicateUserEntry => StatusCode::BAD_REQUEST,
            QFlashError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            QFlashError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            QFlashError::DuplicateDepositHash => StatusCode::BAD_REQUEST,
            QFlashError::LockNotAcquired(_) => StatusCode::SERVICE_UNAVAILABLE,
            QFlashError::StaleResolving => StatusCode::INTERNAL_SERVER_ERROR,
            QFlashError::SettlementFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QFlashError::HouseCapacityExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            QFlashError::RoundNotFound => StatusCode::NOT_FOUND,
            QFlashError::AccountNotFound => StatusCode::NOT_FOUND,
            QFlashError::Unauthorized => StatusCode::UNAUTHORIZED,
            QFlashError::Forbidden => StatusCode::FORBIDDEN,
            QFlashError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            QFlashError::OracleUnavailable(_) => "oracle_unavailable",
            QFlashError::InsufficientBalance => "insufficient_balance",
            QFlashError::InsufficientBounds => "insufficient_bounds",
            QFlashError::RoundNotOpen => "round_not_open",
            QFlashError::DuplicateUserEntry => "duplicate_user_entry",
            QFlashError::RateLimited => "rate_limited",
            QFlashError::InvalidIdentifier(_) => "invalid_identifier",
            QFlashError::DuplicateDepositHash => "duplicate_deposit_hash",
            QFlashError::LockNotAcquired(_) => "lock_not_acquired",
            QFlashError::StaleResolving => "stale_resolving",
            QFlashError::SettlementFailed(_) => "settlement_failed",
            QFlashError::HouseCapacityExceeded => "house_capacity_exceeded",
            QFlashError::RoundNotFound => "round_not_found",
            QFlashError::AccountNotFound => "account_not_found",
            QFlashError::Unauthorized => "unauthorized",
            QFlashError::Forbidden => "forbidden",
            QFlashError::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for QFlashError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
