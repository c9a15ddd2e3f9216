//! Counter store behind a Redis-compatible REST endpoint.
//!
//! Commands are sent as a JSON array (`["EVAL", script, "1", key, ...]`)
//! with a bearer token, and replies come back as `{"result": ...}` or
//! `{"error": "..."}`. Windows are aligned to the epoch so every process
//! sharing the endpoint agrees on boundaries.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

use super::{CounterStore, WindowCount};
use crate::error::StoreError;
use crate::ratelimit::key::CounterKey;
use crate::ratelimit::window::LimitConfig;

/// Atomic increment-if-within-limit.
///
/// KEYS[1] is the window key; ARGV is cost, limit, window length in ms.
/// Returns `{count, allowed}`. A cost that does not fit is not recorded.
pub const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local cost = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local current = tonumber(redis.call("GET", key) or "0")
if cost == 0 then
  return {current, 1}
end
if current + cost > limit then
  return {current, 0}
end
local updated = redis.call("INCRBY", key, cost)
if updated == cost then
  redis.call("PEXPIRE", key, window)
end
return {updated, 1}
"#;

/// Default timeout for a single store command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// A counter store reached over HTTP.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl RestStore {
    /// Create a store for the given endpoint and token.
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// The endpoint this store talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one command and return its `result`.
    async fn command(&self, args: Value) -> Result<Value, StoreError> {
        trace!(url = %self.url, command = %args, "Sending store command");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Error replies usually still carry an envelope
            if let Ok(Envelope {
                error: Some(message),
                ..
            }) = serde_json::from_str::<Envelope>(&body)
            {
                return Err(StoreError::Response(message));
            }
            return Err(StoreError::Status {
                code: status.as_u16(),
                body,
            });
        }

        decode_envelope(&body)
    }
}

/// Extract `result` from a reply body.
pub(crate) fn decode_envelope(body: &str) -> Result<Value, StoreError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))?;

    if let Some(message) = envelope.error {
        return Err(StoreError::Response(message));
    }
    Ok(envelope.result.unwrap_or(Value::Null))
}

/// Decode the `{count, allowed}` pair returned by [`INCREMENT_SCRIPT`].
pub(crate) fn decode_increment(result: &Value) -> Result<(u64, bool), StoreError> {
    let items = result
        .as_array()
        .filter(|items| items.len() == 2)
        .ok_or_else(|| StoreError::Decode(format!("expected [count, allowed], got {}", result)))?;

    let count = as_count(&items[0])?;
    let allowed = as_count(&items[1])? == 1;
    Ok((count, allowed))
}

/// Read a counter value that may be a number, a numeric string or null.
pub(crate) fn as_count(value: &Value) -> Result<u64, StoreError> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| StoreError::Decode(format!("not a counter: {}", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| StoreError::Decode(format!("not a counter: {}", s))),
        other => Err(StoreError::Decode(format!("not a counter: {}", other))),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl CounterStore for RestStore {
    async fn increment(
        &self,
        key: &CounterKey,
        cost: u64,
        limit: &LimitConfig,
    ) -> Result<WindowCount, StoreError> {
        let now = now_millis();
        let window_start = limit.window_start_millis(now);
        let window_key = key.to_window_key(window_start);

        let result = self
            .command(json!([
                "EVAL",
                INCREMENT_SCRIPT,
                "1",
                window_key,
                cost.to_string(),
                limit.max_count.to_string(),
                limit.window_millis().to_string(),
            ]))
            .await?;
        let (count, allowed) = decode_increment(&result)?;

        debug!(
            key = %window_key,
            count = count,
            allowed = allowed,
            "Incremented remote counter"
        );

        let window_end = window_start + limit.window_millis();
        Ok(WindowCount {
            count,
            allowed,
            reset_after: Duration::from_millis(window_end.saturating_sub(now)),
        })
    }

    async fn peek(&self, key: &CounterKey, limit: &LimitConfig) -> Result<u64, StoreError> {
        let window_key = key.to_window_key(limit.window_start_millis(now_millis()));
        let result = self.command(json!(["GET", window_key])).await?;
        as_count(&result)
    }

    async fn reset(&self, key: &CounterKey, limit: &LimitConfig) -> Result<(), StoreError> {
        let window_key = key.to_window_key(limit.window_start_millis(now_millis()));
        self.command(json!(["DEL", window_key])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitKind;
    use crate::ratelimit::window::TimeWindow;

    #[test]
    fn test_decode_envelope_result() {
        let result = decode_envelope(r#"{"result":[3,1]}"#).unwrap();
        assert_eq!(decode_increment(&result).unwrap(), (3, true));

        let result = decode_envelope(r#"{"result":[10,0]}"#).unwrap();
        assert_eq!(decode_increment(&result).unwrap(), (10, false));
    }

    #[test]
    fn test_decode_envelope_error() {
        let err = decode_envelope(r#"{"error":"WRONGPASS invalid token"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Response(ref m) if m.contains("WRONGPASS")));
    }

    #[test]
    fn test_decode_malformed_replies() {
        assert!(matches!(
            decode_envelope("<html>bad gateway</html>"),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            decode_increment(&json!([1])),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            decode_increment(&json!({"count": 1})),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn test_as_count_accepts_store_shapes() {
        assert_eq!(as_count(&Value::Null).unwrap(), 0);
        assert_eq!(as_count(&json!(7)).unwrap(), 7);
        assert_eq!(as_count(&json!("12")).unwrap(), 12);
        assert!(as_count(&json!("twelve")).is_err());
        assert!(as_count(&json!(-1)).is_err());
    }

    #[test]
    fn test_url_trailing_slash_trimmed() {
        let store = RestStore::new("https://example.test/", "token", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(store.url(), "https://example.test");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let store = RestStore::new("http://127.0.0.1:1", "token", Duration::from_secs(2)).unwrap();
        let key = CounterKey::new("test", LimitKind::Request, "u1");
        let limit = LimitConfig::per(10, TimeWindow::Minute);

        let err = store.increment(&key, 1, &limit).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }
}
