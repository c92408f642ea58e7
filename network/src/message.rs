//! Relay bus wire protocol (spec.md §4.6): 4-byte big-endian length prefix
//! followed by that many bytes of compact JSON, carrying one of five
//! message kinds.

use gantry_core::{Event, Workbase};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("JSON encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One frame on the relay bus. `HELLO` identifies the sender's region;
/// `TEMPLATE` carries a fresh workbase; `EVENT` lets a relay forward its
/// own mining events upstream to the primary; `PING`/`PONG` are the
/// keepalive pair exchanged every 5s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayMessage {
    Hello { region: String },
    Template { workbase: Box<Workbase> },
    Event { event: Box<Event> },
    Ping,
    Pong,
}

impl RelayMessage {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_json() {
        let msg = RelayMessage::Hello {
            region: "us-east".into(),
        };
        let bytes = msg.encode().unwrap();
        let back = RelayMessage::decode(&bytes).unwrap();
        matches!(back, RelayMessage::Hello { region } if region == "us-east");
    }

    #[test]
    fn ping_and_pong_are_distinct_on_the_wire() {
        let ping = RelayMessage::Ping.encode().unwrap();
        let pong = RelayMessage::Pong.encode().unwrap();
        assert_ne!(ping, pong);
    }
}
