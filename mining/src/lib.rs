//! Gantry Mining: the Stratum V1 server, Work Generator, and Share
//! Validator that make up the pool's hot path (spec.md §4.1-§4.3).

use thiserror::Error;

pub mod merkle;
pub mod protocol;
pub mod server;
pub mod session;
pub mod validator;
pub mod workgen;

pub use server::{BlockSubmitter, EventSender, ServerError, StratumServer};
pub use session::StratumSession;
pub use validator::{validate_share, Accepted, RejectReason, ShareOutcome, ShareSubmission};
pub use workgen::{BlockTemplateSource, RawTemplate, RawTx, WorkGenError, WorkbaseRegistry};

#[derive(Debug, Error)]
pub enum MiningError {
    #[error("work generator error: {0}")]
    WorkGen(#[from] WorkGenError),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
}
