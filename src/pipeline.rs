//! Pipeline results and a demo chain.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// A pipeline result that may carry model metadata.
pub trait LlmResult {
    /// Metadata emitted by the model call, such as token usage.
    fn llm_output(&self) -> Option<&Value>;
}

impl LlmResult for Value {
    fn llm_output(&self) -> Option<&Value> {
        Some(self)
    }
}

/// Output of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// What the pipeline produced
    pub output: Value,
    /// Model metadata, when the backend reports any
    #[serde(default)]
    pub llm_output: Option<Value>,
}

impl LlmResult for PipelineOutput {
    fn llm_output(&self) -> Option<&Value> {
        self.llm_output.as_ref()
    }
}

/// Token usage in the shape most chat backends report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Error raised by [`MockChain`] when configured to fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("chain failed: {0}")]
pub struct MockChainError(pub String);

/// A chain that echoes its input and reports fixed token usage.
#[derive(Debug, Clone)]
pub struct MockChain {
    usage: TokenUsage,
    latency: Option<Duration>,
    failure: Option<String>,
}

impl MockChain {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
            latency: None,
            failure: None,
        }
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub async fn invoke(&self, input: &str) -> Result<PipelineOutput, MockChainError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = &self.failure {
            return Err(MockChainError(message.clone()));
        }

        trace!(input = %input, "Mock chain answering");

        Ok(PipelineOutput {
            output: json!({ "text": input }),
            llm_output: Some(json!({ "tokenUsage": self.usage })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_chain_reports_usage() {
        let chain = MockChain::new(10, 20);
        let output = chain.invoke("hello").await.unwrap();

        assert_eq!(output.output["text"], "hello");
        let usage = &output.llm_output().unwrap()["tokenUsage"];
        assert_eq!(usage["promptTokens"], 10);
        assert_eq!(usage["completionTokens"], 20);
        assert_eq!(usage["totalTokens"], 30);
    }

    #[tokio::test]
    async fn test_failing_chain() {
        let chain = MockChain::new(1, 1).failing("model overloaded");
        let err = chain.invoke("hello").await.unwrap_err();
        assert_eq!(err, MockChainError("model overloaded".to_string()));
    }

    #[test]
    fn test_value_is_its_own_metadata() {
        let value = json!({ "tokenUsage": { "promptTokens": 1 } });
        assert_eq!(value.llm_output(), Some(&value));
    }
}
