//! Per-invocation request and token gating.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::hook::{InvocationHook, RunInfo};
use super::usage::UsageFields;
use crate::error::{InvokeError, LimitKind, QuotaExceeded, Result};
use crate::pipeline::LlmResult;
use crate::ratelimit::{Decision, LimiterGate};

/// Where an interceptor is in its single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    /// Constructed, not yet attached
    Idle,
    /// Checking request quota
    PreCheck,
    /// The pipeline is running
    Running,
    /// Checking token quota against a result
    PostCheck,
    /// The invocation finished
    Completed,
    /// A quota denied the invocation
    Denied,
}

impl InterceptorState {
    /// Whether the invocation has finished, allowed or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InterceptorState::Completed | InterceptorState::Denied)
    }
}

/// Options shared by every interceptor built from them.
#[derive(Clone, Default)]
pub struct InterceptorOptions {
    /// Charged one unit when the invocation starts
    pub request_limiter: Option<Arc<dyn LimiterGate>>,
    /// Charged the tokens reported by each result
    pub token_limiter: Option<Arc<dyn LimiterGate>>,
    /// Count completion tokens as well as prompt tokens
    pub include_output_tokens: bool,
    /// Where token usage lives in result metadata
    pub fields: UsageFields,
}

impl InterceptorOptions {
    /// Options with no limiters and the default usage fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate each invocation on one request unit.
    pub fn with_request_limiter(mut self, limiter: Arc<dyn LimiterGate>) -> Self {
        self.request_limiter = Some(limiter);
        self
    }

    /// Gate each result on the tokens it reports.
    pub fn with_token_limiter(mut self, limiter: Arc<dyn LimiterGate>) -> Self {
        self.token_limiter = Some(limiter);
        self
    }

    /// Charge total tokens instead of prompt tokens.
    pub fn include_output_tokens(mut self, include: bool) -> Self {
        self.include_output_tokens = include;
        self
    }

    /// Override where token usage is read from.
    pub fn with_fields(mut self, fields: UsageFields) -> Self {
        self.fields = fields;
        self
    }
}

impl std::fmt::Debug for InterceptorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorOptions")
            .field("request_limiter", &self.request_limiter.as_ref().map(|l| l.limit()))
            .field("token_limiter", &self.token_limiter.as_ref().map(|l| l.limit()))
            .field("include_output_tokens", &self.include_output_tokens)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Gates one pipeline invocation on request and token quotas.
///
/// Request quota is checked when the top-level run starts, before any
/// pipeline work. Token quota is checked for each result once it exists;
/// by then the pipeline has already run, so a token denial reports usage
/// rather than preventing it.
///
/// An interceptor covers exactly one invocation. Build a new one per call,
/// usually through [`InterceptorPolicy`](super::InterceptorPolicy).
#[derive(Debug)]
pub struct InvocationInterceptor {
    identifier: String,
    options: InterceptorOptions,
    state: InterceptorState,
    root_run: Option<Uuid>,
    tokens_counted: u64,
}

impl InvocationInterceptor {
    /// Create an idle interceptor charging quotas to `identifier`.
    pub fn new(identifier: impl Into<String>, options: InterceptorOptions) -> Self {
        Self {
            identifier: identifier.into(),
            options,
            state: InterceptorState::Idle,
            root_run: None,
            tokens_counted: 0,
        }
    }

    /// The identifier quotas are charged to.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Current state of the invocation.
    pub fn state(&self) -> InterceptorState {
        self.state
    }

    /// Tokens charged to the token limiter so far.
    pub fn tokens_counted(&self) -> u64 {
        self.tokens_counted
    }

    /// Run `pipeline` under this interceptor's quotas.
    ///
    /// Consumes the interceptor. Pipeline errors come back unchanged as
    /// [`InvokeError::Pipeline`] and skip the token check.
    #[instrument(skip(self, pipeline), fields(identifier = %self.identifier))]
    pub async fn invoke<F, Fut, T, E>(mut self, pipeline: F) -> std::result::Result<T, InvokeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: LlmResult,
    {
        let run = RunInfo::root();
        self.on_invocation_start(&run).await?;

        let output = match pipeline().await {
            Ok(output) => output,
            Err(err) => {
                debug!(identifier = %self.identifier, "Pipeline failed, skipping token check");
                return Err(InvokeError::Pipeline(err));
            }
        };

        self.on_result(&run, output.llm_output()).await?;
        self.on_invocation_end(&run).await?;
        Ok(output)
    }

    fn quota_exceeded(&self, kind: LimitKind, decision: &Decision) -> QuotaExceeded {
        QuotaExceeded {
            kind,
            identifier: self.identifier.clone(),
            limit: decision.limit,
            reset_at: decision.reset_at,
        }
    }

    /// Run `check` against `limiter`, moving to `Denied` on any failure.
    ///
    /// `kind` names the quota slot being checked, whatever the gate is.
    async fn gate(
        &mut self,
        limiter: &Arc<dyn LimiterGate>,
        kind: LimitKind,
        cost: u64,
    ) -> Result<()> {
        let decision = match limiter.check(&self.identifier, cost).await {
            Ok(decision) => decision,
            Err(err) => {
                self.state = InterceptorState::Denied;
                return Err(err);
            }
        };

        trace!(
            identifier = %self.identifier,
            kind = ?kind,
            cost = cost,
            remaining = decision.remaining,
            "Quota checked"
        );

        if !decision.allowed {
            debug!(identifier = %self.identifier, kind = ?kind, "Quota exceeded");
            self.state = InterceptorState::Denied;
            return Err(self.quota_exceeded(kind, &decision).into());
        }
        Ok(())
    }
}

#[async_trait]
impl InvocationHook for InvocationInterceptor {
    async fn on_invocation_start(&mut self, run: &RunInfo) -> Result<()> {
        if !run.is_root() {
            trace!(run_id = %run.run_id, "Ignoring nested run start");
            return Ok(());
        }
        if self.state != InterceptorState::Idle {
            debug!(
                identifier = %self.identifier,
                state = ?self.state,
                "Invocation already started, not checking request quota again"
            );
            return Ok(());
        }

        self.state = InterceptorState::PreCheck;
        if let Some(limiter) = self.options.request_limiter.clone() {
            self.gate(&limiter, LimitKind::Request, 1).await?;
        }

        self.root_run = Some(run.run_id);
        self.state = InterceptorState::Running;
        Ok(())
    }

    async fn on_result(&mut self, _run: &RunInfo, llm_output: Option<&Value>) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.state = InterceptorState::PostCheck;

        let Some(limiter) = self.options.token_limiter.clone() else {
            return Ok(());
        };

        let cost = llm_output
            .and_then(|output| {
                self.options
                    .fields
                    .token_count(output, self.options.include_output_tokens)
            })
            .unwrap_or_else(|| {
                debug!(
                    identifier = %self.identifier,
                    fields = ?self.options.fields,
                    "Token usage not found in result, counting zero tokens"
                );
                0
            });

        if cost == 0 {
            return Ok(());
        }

        self.gate(&limiter, LimitKind::Token, cost).await?;
        self.tokens_counted = self.tokens_counted.saturating_add(cost);
        Ok(())
    }

    async fn on_invocation_end(&mut self, run: &RunInfo) -> Result<()> {
        if self.root_run == Some(run.run_id) && !self.state.is_terminal() {
            self.state = InterceptorState::Completed;
        }
        Ok(())
    }
}
