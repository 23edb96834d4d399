//! Shared helpers.

pub mod breaker;
pub mod cache;
pub mod json;
pub mod retry;
pub mod text;
pub mod timeout;

pub use breaker::CooldownBreaker;
pub use cache::TtlLruCache;
pub use retry::RetryPolicy;
pub use timeout::with_timeout;
