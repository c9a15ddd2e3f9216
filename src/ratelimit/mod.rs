//! Fixed-window limiting and counter stores.

mod key;
mod limiter;
mod rules;
mod window;

pub mod store;

pub use key::CounterKey;
pub use limiter::{Decision, FailurePolicy, LimiterGate, RateLimiter, DEFAULT_PREFIX};
pub use rules::LimitRule;
pub use store::{CounterStore, MemoryStore, RestStore, WindowCount};
pub use window::{LimitConfig, TimeWindow};
