//! The limiter gate: allow or deny a cost for an identifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::key::CounterKey;
use super::store::CounterStore;
use super::window::LimitConfig;
use crate::error::{LimitKind, Result, TollgateError};

/// Default namespace for counter keys.
pub const DEFAULT_PREFIX: &str = "tollgate";

/// What a limiter does when its counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Surface `BackendUnavailable` to the caller
    #[default]
    FailClosed,
    /// Allow the call and log a warning
    FailOpen,
}

/// Result of a limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the cost fit in the current window
    pub allowed: bool,
    /// Maximum units per window
    pub limit: u64,
    /// Units still available in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
    /// Set when the store was unreachable and the limiter failed open
    pub fail_open: bool,
}

/// Capability interface for anything that can gate a cost.
///
/// The interceptor only sees this trait, so any counter backend can stand
/// behind it.
#[async_trait]
pub trait LimiterGate: Send + Sync {
    /// Consume `cost` units for `identifier` if they fit.
    ///
    /// On an allowed decision the units are recorded before this returns.
    async fn check(&self, identifier: &str, cost: u64) -> Result<Decision>;

    /// The limit this gate enforces.
    fn limit(&self) -> LimitConfig;
}

/// A fixed-window limiter over a shared counter store.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    kind: LimitKind,
    prefix: String,
    limit: RwLock<LimitConfig>,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    /// Create a new limiter that fails closed.
    pub fn new(store: Arc<dyn CounterStore>, kind: LimitKind, limit: LimitConfig) -> Self {
        Self {
            store,
            kind,
            prefix: DEFAULT_PREFIX.to_string(),
            limit: RwLock::new(limit),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Use a different key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Choose what happens when the store is unreachable.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Replace the limit for subsequent checks.
    pub fn set_limit(&self, limit: LimitConfig) {
        *self.limit.write() = limit;
    }

    /// The configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    fn key(&self, identifier: &str) -> CounterKey {
        CounterKey::new(&self.prefix, self.kind, identifier)
    }

    /// Units still available for `identifier` in the current window.
    pub async fn remaining(&self, identifier: &str) -> Result<u64> {
        let limit = self.limit();
        let used = self.store.peek(&self.key(identifier), &limit).await?;
        Ok(limit.max_count.saturating_sub(used))
    }

    /// Drop the current window for `identifier`.
    pub async fn reset(&self, identifier: &str) -> Result<()> {
        let limit = self.limit();
        self.store.reset(&self.key(identifier), &limit).await?;
        Ok(())
    }
}

#[async_trait]
impl LimiterGate for RateLimiter {
    async fn check(&self, identifier: &str, cost: u64) -> Result<Decision> {
        let key = self.key(identifier);
        let limit = self.limit();

        trace!(key = %key, cost = cost, "Checking rate limit");

        let count = match self.store.increment(&key, cost, &limit).await {
            Ok(count) => count,
            Err(err) => match self.failure_policy {
                FailurePolicy::FailClosed => {
                    debug!(key = %key, error = %err, "Counter store unavailable");
                    return Err(TollgateError::BackendUnavailable(err));
                }
                FailurePolicy::FailOpen => {
                    warn!(
                        key = %key,
                        error = %err,
                        "Counter store unavailable, allowing call"
                    );
                    return Ok(Decision {
                        allowed: true,
                        limit: limit.max_count,
                        remaining: limit.max_count,
                        reset_at: Utc::now(),
                        fail_open: true,
                    });
                }
            },
        };

        let remaining = limit.max_count.saturating_sub(count.count);
        let reset_at = Utc::now()
            + chrono::Duration::from_std(count.reset_after).unwrap_or(chrono::Duration::zero());

        if !count.allowed {
            debug!(
                key = %key,
                count = count.count,
                limit = limit.max_count,
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            allowed: count.allowed,
            limit: limit.max_count,
            remaining,
            reset_at,
            fail_open: false,
        })
    }

    fn limit(&self) -> LimitConfig {
        self.limit.read().clone()
    }
}
