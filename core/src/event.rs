//! Structured events pushed through the event pipeline (spec.md §3, §4.5).
//!
//! Envelope fields are common to every kind; `payload` carries the
//! kind-specific schema. The envelope's `v` field versions the schema so
//! consumers (Redis, NATS, the Unix-socket reader) can evolve
//! independently of producers.

use serde::{Deserialize, Serialize};

pub const EVENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Connect {
        session_id: u64,
        remote_addr: String,
    },
    Disconnect {
        session_id: u64,
        worker_name: Option<String>,
    },
    Authorize {
        session_id: u64,
        username: String,
        worker_name: String,
        accepted: bool,
    },
    ShareAccepted {
        username: String,
        worker_name: String,
        workbase_id: u64,
        share_diff: f64,
    },
    ShareRejected {
        username: Option<String>,
        worker_name: Option<String>,
        workbase_id: Option<u64>,
        reason: String,
        code: i32,
    },
    ShareBest {
        username: String,
        worker_name: String,
        share_diff: f64,
    },
    BlockFound {
        username: String,
        worker_name: String,
        height: u64,
        workbase_id: u64,
    },
    DifficultyChanged {
        session_id: u64,
        worker_name: Option<String>,
        old_difficulty: f64,
        new_difficulty: f64,
    },
    /// Synthetic event emitted when the ring buffer's drop-oldest policy
    /// fires (spec.md §4.5); not one of the eight user-facing kinds but
    /// shares the same envelope and wire format.
    EventsDropped {
        count: u64,
    },
}

impl EventPayload {
    /// The `<kind>` component of the NATS subject `tbg.mining.<region>.<kind>`
    /// (spec.md §4.6 sink fanout table).
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Connect { .. } => "connect",
            EventPayload::Disconnect { .. } => "disconnect",
            EventPayload::Authorize { .. } => "authorize",
            EventPayload::ShareAccepted { .. } => "share_accepted",
            EventPayload::ShareRejected { .. } => "share_rejected",
            EventPayload::ShareBest { .. } => "share_best",
            EventPayload::BlockFound { .. } => "block_found",
            EventPayload::DifficultyChanged { .. } => "difficulty_changed",
            EventPayload::EventsDropped { .. } => "events_dropped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub v: u32,
    pub ts_ns: u128,
    pub region: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(ts_ns: u128, region: impl Into<String>, payload: EventPayload) -> Self {
        Event {
            v: EVENT_SCHEMA_VERSION,
            ts_ns,
            region: region.into(),
            payload,
        }
    }

    /// Encodes this event as the compact single-line JSON the socket
    /// writer and Redis/NATS fanout both use (spec.md §4.5).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let ev = Event::new(
            123_456_789,
            "us-east",
            EventPayload::ShareAccepted {
                username: "bc1q...".into(),
                worker_name: "rig01".into(),
                workbase_id: 7,
                share_diff: 2.0,
            },
        );
        let line = ev.to_json_line().unwrap();
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn envelope_carries_schema_version() {
        let ev = Event::new(0, "us-east", EventPayload::EventsDropped { count: 5 });
        assert_eq!(ev.v, EVENT_SCHEMA_VERSION);
        let line = ev.to_json_line().unwrap();
        assert!(line.contains("\"v\":1"));
    }
}
