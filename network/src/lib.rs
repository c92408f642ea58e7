//! Gantry Network: the relay replication bus that propagates block
//! templates from a primary region to its relays and carries mining events
//! back upstream (spec.md §4.6).

use thiserror::Error;

pub mod frame;
pub mod message;
pub mod relay;

pub use frame::{Bus, BusError};
pub use message::{MessageError, RelayMessage};
pub use relay::{PrimaryHub, RelayClient, RelayMode};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
