//! Signed HTTP exchange adapter.

mod client;
mod rate_limit;
mod sign;
mod types;

pub use client::{HttpExchange, HttpExchangeConfig};
pub use rate_limit::RateLimiter;
pub use sign::{canonical_query, sign_request};
