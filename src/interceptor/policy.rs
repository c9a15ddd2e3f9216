//! Reusable quota settings that hand out one interceptor per invocation.

use std::future::Future;
use std::sync::Arc;
use tracing::info;

use super::handler::{InterceptorOptions, InvocationInterceptor};
use crate::config::TollgateConfig;
use crate::error::{InvokeError, LimitKind, Result};
use crate::pipeline::LlmResult;
use crate::ratelimit::{CounterStore, RateLimiter};

/// Quota settings shared across invocations.
///
/// Interceptors hold per-invocation state and must not be reused; the
/// policy is the long-lived part. Call [`InterceptorPolicy::interceptor`]
/// (or [`InterceptorPolicy::invoke`]) once per invocation.
#[derive(Debug, Clone, Default)]
pub struct InterceptorPolicy {
    options: InterceptorOptions,
}

impl InterceptorPolicy {
    /// Wrap options built by hand.
    pub fn new(options: InterceptorOptions) -> Self {
        Self { options }
    }

    /// Build limiters for every configured quota on top of `store`.
    pub fn from_config(config: &TollgateConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        config.validate()?;

        let limiter = |kind: LimitKind, rule: &crate::ratelimit::LimitRule| {
            let limit = rule.to_limit();
            info!(
                kind = %kind,
                max_count = limit.max_count,
                window_secs = limit.window.as_secs(),
                "Configured limiter"
            );
            Arc::new(
                RateLimiter::new(store.clone(), kind, limit)
                    .with_prefix(config.store.prefix.clone())
                    .with_failure_policy(config.store.failure_policy),
            )
        };

        let mut options = InterceptorOptions::new()
            .include_output_tokens(config.limits.include_output_tokens)
            .with_fields(config.limits.fields.clone());
        if let Some(rule) = &config.limits.request {
            options = options.with_request_limiter(limiter(LimitKind::Request, rule));
        }
        if let Some(rule) = &config.limits.token {
            options = options.with_token_limiter(limiter(LimitKind::Token, rule));
        }

        Ok(Self { options })
    }

    /// Options every interceptor from this policy starts with.
    pub fn options(&self) -> &InterceptorOptions {
        &self.options
    }

    /// A fresh interceptor for one invocation by `identifier`.
    pub fn interceptor(&self, identifier: &str) -> InvocationInterceptor {
        InvocationInterceptor::new(identifier, self.options.clone())
    }

    /// Run `pipeline` for `identifier` under a fresh interceptor.
    pub async fn invoke<F, Fut, T, E>(
        &self,
        identifier: &str,
        pipeline: F,
    ) -> std::result::Result<T, InvokeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: LlmResult,
    {
        self.interceptor(identifier).invoke(pipeline).await
    }
}
