use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Position of a record in the outbox.
///
/// Sequences are assigned by storage, start at 1 and form a gap-free total order
/// over committed records. `EventSequence::BEGINNING` (0) is the cursor of a
/// consumer that has seen nothing yet.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSequence(u64);

impl EventSequence {
    pub const BEGINNING: Self = Self(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl core::fmt::Display for EventSequence {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for EventSequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Envelope for an outbox record.
///
/// This is the unit storage appends and consumers read back.
///
/// Notes:
/// - **Append-only**: `sequence` is strictly increasing across the whole outbox.
/// - `event_type`/`event_version` are captured at append time so consumers can
///   route on them without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent<P> {
    id: Uuid,
    sequence: EventSequence,
    event_type: String,
    event_version: u32,
    recorded_at: DateTime<Utc>,
    payload: P,
}

impl<P> OutboxEvent<P> {
    pub fn new(
        id: Uuid,
        sequence: EventSequence,
        event_type: impl Into<String>,
        event_version: u32,
        recorded_at: DateTime<Utc>,
        payload: P,
    ) -> Self {
        Self {
            id,
            sequence,
            event_type: event_type.into(),
            event_version,
            recorded_at,
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sequence(&self) -> EventSequence {
        self.sequence
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl<P: Event> OutboxEvent<P> {
    /// Wrap a typed event, taking type/version/time from the event itself.
    pub fn record(sequence: EventSequence, payload: P) -> Self {
        Self {
            id: Uuid::now_v7(),
            sequence,
            event_type: payload.event_type().to_string(),
            event_version: payload.version(),
            recorded_at: payload.occurred_at(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Ping {
        at: DateTime<Utc>,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn record_captures_event_metadata() {
        let at = Utc::now();
        let e = OutboxEvent::record(EventSequence::new(7), Ping { at });
        assert_eq!(e.sequence().value(), 7);
        assert_eq!(e.event_type(), "test.ping");
        assert_eq!(e.event_version(), 2);
        assert_eq!(e.recorded_at(), at);
    }

    #[test]
    fn beginning_precedes_first_record() {
        assert!(EventSequence::BEGINNING < EventSequence::new(1));
        assert_eq!(EventSequence::BEGINNING.next(), EventSequence::new(1));
    }
}
