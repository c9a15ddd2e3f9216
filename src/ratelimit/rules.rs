//! Limit rules as written in configuration.

use serde::{Deserialize, Serialize};

use super::window::{LimitConfig, TimeWindow};
use crate::error::{Result, TollgateError};

/// A limit rule specifying the count and time window.
///
/// ```yaml
/// requests_per_unit: 10
/// unit: minute
/// units: 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Number of units allowed per window
    pub requests_per_unit: u64,
    /// The time unit
    pub unit: TimeWindow,
    /// How many time units one window spans
    #[serde(default = "default_units")]
    pub units: u32,
    /// Optional name/description for this limit
    #[serde(default)]
    pub name: Option<String>,
}

fn default_units() -> u32 {
    1
}

impl LimitRule {
    /// Parse a single rule from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rule: LimitRule = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse limit rule: {}", e)))?;
        rule.validate()?;
        Ok(rule)
    }

    /// Reject rules that could never allow anything.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_unit == 0 {
            return Err(TollgateError::Config(
                "requests_per_unit must be greater than zero".to_string(),
            ));
        }
        if self.units == 0 {
            return Err(TollgateError::Config(
                "units must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert into the limit bound to a limiter.
    pub fn to_limit(&self) -> LimitConfig {
        let limit = LimitConfig::new(self.requests_per_unit, self.unit.duration() * self.units);
        match &self.name {
            Some(name) => limit.with_name(name.clone()),
            None => limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_simple_rule() {
        let yaml = r#"
requests_per_unit: 10
unit: minute
"#;
        let rule = LimitRule::from_yaml(yaml).unwrap();
        assert_eq!(rule.requests_per_unit, 10);
        assert_eq!(rule.unit, TimeWindow::Minute);
        assert_eq!(rule.units, 1);

        let limit = rule.to_limit();
        assert_eq!(limit.max_count, 10);
        assert_eq!(limit.window, Duration::from_secs(60));
        assert!(limit.name.is_none());
    }

    #[test]
    fn test_multi_unit_window() {
        let yaml = r#"
requests_per_unit: 5000
unit: hour
units: 6
name: daily-ish tokens
"#;
        let limit = LimitRule::from_yaml(yaml).unwrap().to_limit();
        assert_eq!(limit.window, Duration::from_secs(6 * 3600));
        assert_eq!(limit.name.as_deref(), Some("daily-ish tokens"));
    }

    #[test]
    fn test_zero_count_rejected() {
        let yaml = r#"
requests_per_unit: 0
unit: second
"#;
        assert!(matches!(
            LimitRule::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_zero_units_rejected() {
        let yaml = r#"
requests_per_unit: 1
unit: second
units: 0
"#;
        assert!(LimitRule::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_unit_rejected() {
        let yaml = r#"
requests_per_unit: 1
unit: fortnight
"#;
        assert!(matches!(
            LimitRule::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }
}
