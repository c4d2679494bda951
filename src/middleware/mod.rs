//! HTTP-facing middleware: request logging and wager rate limiting.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging_simple;
pub use rate_limit::{RateLimitConfig, RateLimiter};
