//! Analytics event types
//!
//! [`EventEnvelope`] mirrors the JSON produced by the website trackers. The
//! engine decodes it into an [`AnalyticsEvent`], which carries a typed payload
//! and a partitioning key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

/// Type of analytics event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A page was rendered
    PageView,
    /// A visitor session started
    SessionStart,
    /// A visitor session ended
    SessionEnd,
    /// A goal conversion (purchase, signup, ...)
    Conversion,
}

impl EventType {
    /// All known event types
    pub const ALL: [EventType; 4] = [
        EventType::PageView,
        EventType::SessionStart,
        EventType::SessionEnd,
        EventType::Conversion,
    ];

    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "PAGE_VIEW",
            EventType::SessionStart => "SESSION_START",
            EventType::SessionEnd => "SESSION_END",
            EventType::Conversion => "CONVERSION",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypesError::UnknownEventType(s.to_string()))
    }
}

/// Page view details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    /// Page load time in milliseconds
    #[serde(default)]
    pub page_load_time: Option<u32>,
}

/// Session and device details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

/// Conversion details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionData {
    #[serde(default)]
    pub conversion_type: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Producer metadata attached to every event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Raw event as it appears on the wire
///
/// Every field is optional here; validation happens in the engine's decoder so
/// that a malformed record can be reported with its offset instead of failing
/// deserialization wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(default)]
    pub event_id: Option<String>,
    /// Event time in milliseconds since epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub page_view_data: Option<PageViewData>,
    #[serde(default)]
    pub session_data: Option<SessionData>,
    #[serde(default)]
    pub conversion_data: Option<ConversionData>,
    #[serde(default)]
    pub custom_data: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub metadata: Option<EventMetadata>,
}

/// Type-specific event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    PageView(PageViewData),
    Session(SessionData),
    Conversion(ConversionData),
    /// The type-specific block was absent
    Empty,
}

/// A decoded, validated analytics event
///
/// Immutable once decoded. `key` is the user identifier and determines
/// partitioning for both windowing and pattern matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: String,
    /// Event time in milliseconds since epoch
    pub event_time: i64,
    pub key: String,
    pub event_type: EventType,
    pub user_id: String,
    pub session_id: Option<String>,
    pub payload: EventPayload,
    pub custom_data: BTreeMap<String, String>,
    pub metadata: Option<EventMetadata>,
}

impl AnalyticsEvent {
    /// Create an event with an empty payload
    pub fn new(
        id: impl Into<String>,
        event_time: i64,
        user_id: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: id.into(),
            event_time,
            key: user_id.clone(),
            event_type,
            user_id,
            session_id: None,
            payload: EventPayload::Empty,
            custom_data: BTreeMap::new(),
            metadata: None,
        }
    }

    /// Attach a session identifier
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a typed payload
    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Conversion value, if this is a conversion carrying one
    pub fn conversion_value(&self) -> Option<f64> {
        match &self.payload {
            EventPayload::Conversion(data) => data.value,
            _ => None,
        }
    }

    /// Page load time in milliseconds, if this is a page view carrying one
    pub fn page_load_time(&self) -> Option<f64> {
        match &self.payload {
            EventPayload::PageView(data) => data.page_load_time.map(f64::from),
            _ => None,
        }
    }

    /// Convert back to the wire representation
    pub fn to_envelope(&self) -> EventEnvelope {
        let mut envelope = EventEnvelope {
            event_id: Some(self.id.clone()),
            timestamp: Some(self.event_time),
            event_type: Some(self.event_type.as_str().to_string()),
            user_id: Some(self.user_id.clone()),
            session_id: self.session_id.clone(),
            custom_data: if self.custom_data.is_empty() {
                None
            } else {
                Some(self.custom_data.clone())
            },
            metadata: self.metadata.clone(),
            ..Default::default()
        };

        match &self.payload {
            EventPayload::PageView(data) => envelope.page_view_data = Some(data.clone()),
            EventPayload::Session(data) => envelope.session_data = Some(data.clone()),
            EventPayload::Conversion(data) => envelope.conversion_data = Some(data.clone()),
            EventPayload::Empty => {}
        }

        envelope
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable partition assignment for a key
///
/// Uses 64-bit FNV-1a so the mapping is identical across processes and
/// releases. Producers partition by this function so that every worker owns a
/// disjoint set of keys.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }

    let hash = key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });

    (hash % u64::from(partitions)) as u32
}
