//! Counter key generation and parsing.

use crate::error::LimitKind;

/// A key that uniquely identifies one counter in the store.
///
/// Request and token counters for the same identifier never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Namespace shared by every limiter of one application
    pub prefix: String,
    /// Which quota this counter tracks
    pub kind: LimitKind,
    /// The subject being limited
    pub identifier: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(prefix: &str, kind: LimitKind, identifier: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            kind,
            identifier: identifier.to_string(),
        }
    }

    /// Key without a window component.
    /// Format: "{prefix}:{kind}:{identifier}"
    pub fn to_string_key(&self) -> String {
        format!("{}:{}:{}", self.prefix, self.kind, self.identifier)
    }

    /// Key for one epoch-aligned window.
    /// Format: "{prefix}:{kind}:{identifier}:{window_start_millis}"
    pub fn to_window_key(&self, window_start_millis: u64) -> String {
        format!("{}:{}", self.to_string_key(), window_start_millis)
    }

    /// Parse a window key back into its key and window start (milliseconds).
    pub fn from_window_key(key: &str) -> Option<(Self, u64)> {
        // The prefix has no ':' and the identifier may, so split the
        // fixed fields off both ends.
        let (prefix, rest) = key.split_once(':')?;
        let (kind, rest) = rest.split_once(':')?;
        let (identifier, window) = rest.rsplit_once(':')?;

        let kind = LimitKind::parse(kind)?;
        let window: u64 = window.parse().ok()?;
        if prefix.is_empty() {
            return None;
        }

        Some((Self::new(prefix, kind, identifier), window))
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::window::LimitConfig;
    use std::time::Duration;

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new("tollgate", LimitKind::Request, "u1");
        assert_eq!(key.to_string_key(), "tollgate:request:u1");
        assert_eq!(key.to_string(), "tollgate:request:u1");
    }

    #[test]
    fn test_window_key_round_trip_with_colon_identifier() {
        let key = CounterKey::new("tollgate", LimitKind::Token, "user:123");
        let window_key = key.to_window_key(1_704_067_200_000);
        assert_eq!(window_key, "tollgate:token:user:123:1704067200000");

        let (parsed, window) = CounterKey::from_window_key(&window_key).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(window, 1_704_067_200_000);
    }

    #[test]
    fn test_sub_second_windows_get_distinct_keys() {
        let key = CounterKey::new("tollgate", LimitKind::Request, "u1");
        let limit = LimitConfig::new(5, Duration::from_millis(500));

        let first = key.to_window_key(limit.window_start_millis(1_000));
        let second = key.to_window_key(limit.window_start_millis(1_600));
        let same = key.to_window_key(limit.window_start_millis(1_400));

        assert_ne!(first, second);
        assert_eq!(first, same);
        assert_eq!(second, "tollgate:request:u1:1500");
    }

    #[test]
    fn test_window_key_parsing_invalid() {
        assert!(CounterKey::from_window_key("invalid").is_none());
        assert!(CounterKey::from_window_key("tollgate:request:u1").is_none());
        assert!(CounterKey::from_window_key("tollgate:bytes:u1:100").is_none());
        assert!(CounterKey::from_window_key(":request:u1:100").is_none());
    }

    #[test]
    fn test_kinds_have_separate_keys() {
        let request = CounterKey::new("app", LimitKind::Request, "u1");
        let token = CounterKey::new("app", LimitKind::Token, "u1");
        assert_ne!(request, token);
        assert_ne!(request.to_window_key(0), token.to_window_key(0));
    }
}
