//! Gantry Consensus: the variance difficulty engine (spec.md §4.4).

pub mod difficulty;

pub use difficulty::{on_share_accepted, Adjustment, VardiffState};
