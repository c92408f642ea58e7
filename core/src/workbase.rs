//! Workbase: one pending/active block template (spec.md §3).

use gantry_util::time::unix_secs;
use serde::{Deserialize, Serialize};

/// A block template prepared for distribution to miners.
///
/// Exactly one workbase is "current" at any time (enforced by the
/// registry that owns these, see `gantry_mining::workgen::WorkbaseRegistry`);
/// stale-but-retained workbases are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbase {
    /// Monotonically increasing identifier.
    pub id: u64,
    pub height: u64,
    pub prev_hash: [u8; 32],
    /// Coinbase bytes before the extranonce placeholder.
    pub coinb1: Vec<u8>,
    /// Coinbase bytes after the extranonce placeholder.
    pub coinb2: Vec<u8>,
    /// Merkle branch: the authentication path from the coinbase hash to the
    /// merkle root.
    pub merkle_branch: Vec<[u8; 32]>,
    pub version: u32,
    pub bits: u32,
    pub curtime: u32,
    /// Network target difficulty implied by `bits`, used for the
    /// block-found check (spec.md §4.3 step 9) and the signet/testnet/
    /// regtest clamp bypass (spec.md §4.3 trailing paragraph).
    pub network_diff: f64,
    /// Whether the previous block hash changed from the prior current
    /// workbase, i.e. whether `mining.notify` must carry `clean_jobs=true`
    /// (spec.md §4.1).
    pub clean_jobs: bool,
    /// Wall-clock seconds at which this workbase was constructed, used for
    /// grace-period expiry (spec.md §4.1).
    pub created_at: u64,
    /// Serialized non-coinbase transactions, in block order, retained so a
    /// winning share can be assembled into a full block for `submitblock`
    /// (spec.md §4.3 step 9).
    pub other_tx_data: Vec<Vec<u8>>,
}

impl Workbase {
    pub fn is_stale(&self, now: u64, grace_s: u64) -> bool {
        now.saturating_sub(self.created_at) > grace_s
    }

    pub fn age_s(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    pub fn now_created() -> u64 {
        unix_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wb(created_at: u64) -> Workbase {
        Workbase {
            id: 1,
            height: 100,
            prev_hash: [0u8; 32],
            coinb1: vec![],
            coinb2: vec![],
            merkle_branch: vec![],
            version: 0x20000000,
            bits: 0x1d00ffff,
            curtime: 0,
            network_diff: 1.0,
            clean_jobs: true,
            created_at,
            other_tx_data: vec![],
        }
    }

    #[test]
    fn boundary_age_equals_grace_is_not_stale() {
        let w = wb(1000);
        assert!(!w.is_stale(1060, 60));
    }

    #[test]
    fn one_second_past_grace_is_stale() {
        let w = wb(1000);
        assert!(w.is_stale(1061, 60));
    }
}
