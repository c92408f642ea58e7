//! Gantry Core: the data model shared across the mining pool engine —
//! workbases, sessions, users and events (spec.md §3).

use thiserror::Error;

pub mod event;
pub mod session;
pub mod user;
pub mod workbase;

pub use event::{Event, EventPayload, EVENT_SCHEMA_VERSION};
pub use session::{Session, SessionState, ShareKey};
pub use user::User;
pub use workbase::Workbase;

pub use gantry_util::BtcNetwork;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown workbase id {0}")]
    UnknownWorkbase(u64),
    #[error("unknown session id {0}")]
    UnknownSession(u64),
    #[error("session {0} is not authorized")]
    NotAuthorized(u64),
}
