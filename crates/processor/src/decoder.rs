//! Event decoding
//!
//! Turns raw source payloads into validated [`AnalyticsEvent`]s. Malformed
//! records never fail the pipeline: they are reported as [`DecodeError`]s
//! carrying the record position and a snippet of the payload.

use analytics_types::{AnalyticsEvent, EventEnvelope, EventPayload, EventType};
use chrono::DateTime;
use tracing::trace;

use crate::error::DecodeError;

/// Number of payload characters kept in a [`DecodeError`]
pub const RAW_SNIPPET_LEN: usize = 128;

/// Decoder for tracker JSON records
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one record
    ///
    /// A missing `eventId` is replaced by `"{partition}-{offset}"` so that
    /// replays of the same record yield the same id.
    pub fn decode(
        &self,
        partition: u32,
        offset: i64,
        payload: &[u8],
    ) -> Result<AnalyticsEvent, DecodeError> {
        let fail = |reason: String| DecodeError {
            partition,
            offset,
            reason,
            raw_snippet: snippet(payload),
        };

        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| fail(format!("invalid JSON: {}", e)))?;

        let event_time = envelope
            .timestamp
            .ok_or_else(|| fail("missing timestamp".to_string()))?;
        if DateTime::from_timestamp_millis(event_time).is_none() {
            return Err(fail(format!("timestamp {} out of range", event_time)));
        }

        let event_type = envelope
            .event_type
            .as_deref()
            .ok_or_else(|| fail("missing eventType".to_string()))?
            .parse::<EventType>()
            .map_err(|e| fail(e.to_string()))?;

        let user_id = envelope
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| fail("missing userId".to_string()))?;

        let id = envelope
            .event_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-{}", partition, offset));

        let payload = match event_type {
            EventType::PageView => envelope.page_view_data.map(EventPayload::PageView),
            EventType::SessionStart | EventType::SessionEnd => {
                envelope.session_data.map(EventPayload::Session)
            }
            EventType::Conversion => envelope.conversion_data.map(EventPayload::Conversion),
        }
        .unwrap_or(EventPayload::Empty);

        let mut event = AnalyticsEvent::new(id, event_time, user_id, event_type).with_payload(payload);
        event.session_id = envelope.session_id.filter(|s| !s.is_empty());
        event.custom_data = envelope.custom_data.unwrap_or_default();
        event.metadata = envelope.metadata;

        trace!(
            partition = partition,
            offset = offset,
            event_id = %event.id,
            event_type = %event.event_type,
            "Decoded event"
        );

        Ok(event)
    }
}

/// First [`RAW_SNIPPET_LEN`] characters of a payload, lossily decoded
fn snippet(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .chars()
        .take(RAW_SNIPPET_LEN)
        .collect()
}
