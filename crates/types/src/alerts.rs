//! Alert records emitted by the pattern matcher

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

/// Source tag written on every alert record
pub const ALERT_SOURCE: &str = "stream_cep_processor";

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(TypesError::UnknownSeverity(s.to_string())),
        }
    }
}

/// A detected pattern occurrence
///
/// `alert_id` is derived from the predicate, the key and the interval start,
/// so replays produce the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub alert_id: String,
    /// Event time of the alert (end of the evaluated interval)
    pub timestamp: i64,
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub pattern_matched: String,
    pub affected_keys: Vec<String>,
    #[serde(default)]
    pub evidence: BTreeMap<String, f64>,
    pub evidence_count: u64,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub window_start: i64,
    pub window_end: i64,
    pub recommended_action: String,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!("medium".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
        assert!(Severity::Low < Severity::High);
    }

    #[test]
    fn test_alert_record_json() {
        let alert = AlertRecord {
            alert_id: "high_bounce_u1_0".to_string(),
            timestamp: 300_000,
            alert_type: "HIGH_BOUNCE_RATE".to_string(),
            severity: Severity::Medium,
            title: "High Bounce Rate Detected".to_string(),
            description: "User u1 viewed only one page".to_string(),
            pattern_matched: "SINGLE_PAGE_VIEW_WITHIN_WINDOW".to_string(),
            affected_keys: vec!["u1".to_string()],
            evidence: BTreeMap::from([("page_views".to_string(), 1.0)]),
            evidence_count: 1,
            context: BTreeMap::new(),
            window_start: 0,
            window_end: 300_000,
            recommended_action: "Review page content and user experience".to_string(),
            source: ALERT_SOURCE.to_string(),
        };

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["alertId"], "high_bounce_u1_0");
        assert_eq!(json["severity"], "MEDIUM");
        assert_eq!(json["affectedKeys"][0], "u1");
    }
}
