//! Counter stores backing the limiters.
//!
//! A store owns the counter records. Limiters only reach them through
//! [`CounterStore::increment`], which must add the cost and compare it to
//! the limit as one atomic step per key.

mod memory;
mod rest;

use async_trait::async_trait;
use std::time::Duration;

use super::key::CounterKey;
use super::window::LimitConfig;
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use rest::{RestStore, DEFAULT_TIMEOUT, INCREMENT_SCRIPT};

/// State of one counter after an increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Units recorded in the current window after this call
    pub count: u64,
    /// Whether the cost fit and was recorded
    pub allowed: bool,
    /// Time left until the current window ends
    pub reset_after: Duration,
}

/// Trait for counter store implementations.
///
/// This trait abstracts over the in-process `MemoryStore` and the remote
/// `RestStore` so limiters can work with either.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `cost` to the key's current window if the total stays within
    /// `limit.max_count`. A cost that does not fit is not recorded.
    async fn increment(
        &self,
        key: &CounterKey,
        cost: u64,
        limit: &LimitConfig,
    ) -> Result<WindowCount, StoreError>;

    /// Units recorded in the key's current window.
    async fn peek(&self, key: &CounterKey, limit: &LimitConfig) -> Result<u64, StoreError>;

    /// Drop the key's current window.
    async fn reset(&self, key: &CounterKey, limit: &LimitConfig) -> Result<(), StoreError>;
}
