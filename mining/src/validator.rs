//! Share Validator (spec.md §4.3): the authoritative accept/reject pipeline.
//! Order matters — the first failing step returns.

use std::sync::Arc;

use gantry_core::session::Session;
use gantry_core::workbase::Workbase;
use gantry_crypto::{sha256d, share_difficulty};

use crate::merkle::fold_branch;
use crate::protocol::{RpcError, ERR_DUPLICATE, ERR_INVALID_PARAMS, ERR_LOW_DIFFICULTY, ERR_STALE_SHARE};

const NTIME_PAST_WINDOW_S: u32 = 600;
const NTIME_FUTURE_WINDOW_S: u32 = 7200;
const LOW_DIFF_TOLERANCE: f64 = 0.999;

#[derive(Debug, Clone)]
pub struct ShareSubmission {
    pub workbase_id: u64,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Stale,
    Duplicate,
    BadNtime,
    LowDifficulty,
}

impl RejectReason {
    pub fn code(&self) -> i32 {
        match self {
            RejectReason::Stale => ERR_STALE_SHARE,
            RejectReason::Duplicate => ERR_DUPLICATE,
            RejectReason::BadNtime => ERR_INVALID_PARAMS,
            RejectReason::LowDifficulty => ERR_LOW_DIFFICULTY,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::Stale => "stale share",
            RejectReason::Duplicate => "duplicate share",
            RejectReason::BadNtime => "ntime out of range",
            RejectReason::LowDifficulty => "share below session difficulty",
        }
    }

    pub fn to_rpc_error(self) -> RpcError {
        RpcError::new(self.code(), self.message())
    }
}

#[derive(Debug, Clone)]
pub struct Accepted {
    pub share_diff: f64,
    pub is_new_best: bool,
    /// `share_diff >= workbase.network_diff` (spec.md §4.3 step 9).
    pub is_block: bool,
    /// Full serialized coinbase transaction, kept so a winning share can be
    /// assembled into a full block without recomputing it.
    pub coinbase_tx: Vec<u8>,
    pub header: [u8; 80],
}

#[derive(Debug, Clone)]
pub enum ShareOutcome {
    Accepted(Accepted),
    Rejected(RejectReason),
}

/// Workbase lookup the validator depends on, so it isn't coupled to
/// `WorkbaseRegistry`'s concrete locking strategy.
pub trait WorkbaseLookup {
    fn get(&self, id: u64) -> Option<Arc<Workbase>>;
}

impl WorkbaseLookup for crate::workgen::WorkbaseRegistry {
    fn get(&self, id: u64) -> Option<Arc<Workbase>> {
        crate::workgen::WorkbaseRegistry::get(self, id)
    }
}

/// Validates one submitted share against `session` and its workbase
/// (spec.md §4.3 steps 1-9). Step 10, handing the session off to the
/// variance engine, is the caller's responsibility — it lives in
/// `gantry-consensus` which this crate already depends on, but keeping the
/// call at the session layer keeps this function free of vardiff config.
pub fn validate_share(
    registry: &impl WorkbaseLookup,
    session: &mut Session,
    submission: &ShareSubmission,
    now: u64,
) -> ShareOutcome {
    let workbase = match registry.get(submission.workbase_id) {
        Some(w) => w,
        None => return ShareOutcome::Rejected(RejectReason::Stale),
    };

    let key = (
        submission.workbase_id,
        hex::encode(&submission.extranonce2),
        submission.ntime,
        submission.nonce,
    );
    if session.seen_shares.contains(&key) {
        return ShareOutcome::Rejected(RejectReason::Duplicate);
    }
    session.seen_shares.insert(key);

    let earliest = workbase.curtime.saturating_sub(NTIME_PAST_WINDOW_S);
    let latest = (now as u32).saturating_add(NTIME_FUTURE_WINDOW_S);
    if submission.ntime < earliest || submission.ntime > latest {
        return ShareOutcome::Rejected(RejectReason::BadNtime);
    }

    let mut coinbase = Vec::with_capacity(
        workbase.coinb1.len()
            + session.extranonce1.len()
            + submission.extranonce2.len()
            + workbase.coinb2.len(),
    );
    coinbase.extend_from_slice(&workbase.coinb1);
    coinbase.extend_from_slice(&session.extranonce1);
    coinbase.extend_from_slice(&submission.extranonce2);
    coinbase.extend_from_slice(&workbase.coinb2);
    let coinbase_hash = sha256d(&coinbase);
    let merkle_root = fold_branch(coinbase_hash, &workbase.merkle_branch);

    let mut header = [0u8; 80];
    header[0..4].copy_from_slice(&workbase.version.to_le_bytes());
    header[4..36].copy_from_slice(&workbase.prev_hash);
    header[36..68].copy_from_slice(&merkle_root);
    header[68..72].copy_from_slice(&submission.ntime.to_le_bytes());
    header[72..76].copy_from_slice(&workbase.bits.to_le_bytes());
    header[76..80].copy_from_slice(&submission.nonce.to_le_bytes());
    let header_hash = sha256d(&header);
    let share_diff = share_difficulty(&header_hash);

    if share_diff < session.difficulty * LOW_DIFF_TOLERANCE {
        return ShareOutcome::Rejected(RejectReason::LowDifficulty);
    }

    let is_new_best = share_diff > session.best_difficulty;
    session.record_accept(share_diff);
    let is_block = share_diff >= workbase.network_diff;

    ShareOutcome::Accepted(Accepted {
        share_diff,
        is_new_best,
        is_block,
        coinbase_tx: coinbase,
        header,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    struct StubRegistry(HashMap<u64, Arc<Workbase>>);

    impl WorkbaseLookup for StubRegistry {
        fn get(&self, id: u64) -> Option<Arc<Workbase>> {
            self.0.get(&id).cloned()
        }
    }

    fn workbase(curtime: u32) -> Arc<Workbase> {
        Arc::new(Workbase {
            id: 1,
            height: 100,
            prev_hash: [0u8; 32],
            coinb1: vec![0xaa, 0xbb],
            coinb2: vec![0xcc, 0xdd],
            merkle_branch: vec![],
            version: 0x20000000,
            bits: 0x1d00ffff,
            curtime,
            network_diff: 1.0,
            clean_jobs: true,
            created_at: curtime as u64,
            other_tx_data: vec![],
        })
    }

    fn registry(curtime: u32) -> StubRegistry {
        let mut m = HashMap::new();
        m.insert(1, workbase(curtime));
        StubRegistry(m)
    }

    fn session(difficulty: f64) -> Session {
        let addr: SocketAddr = "127.0.0.1:3333".parse().unwrap();
        let mut s = Session::new(1, addr, 1_700_000_000);
        s.extranonce1 = vec![1, 2, 3, 4];
        s.difficulty = difficulty;
        s
    }

    fn submission() -> ShareSubmission {
        ShareSubmission {
            workbase_id: 1,
            extranonce2: vec![0, 0, 0, 1],
            ntime: 1_700_000_000,
            nonce: 42,
        }
    }

    #[test]
    fn unknown_workbase_is_stale() {
        let reg = StubRegistry(HashMap::new());
        let mut s = session(0.0);
        let outcome = validate_share(&reg, &mut s, &submission(), 1_700_000_000);
        assert!(matches!(outcome, ShareOutcome::Rejected(RejectReason::Stale)));
    }

    #[test]
    fn zero_difficulty_session_accepts_any_share() {
        let reg = registry(1_700_000_000);
        let mut s = session(0.0);
        let outcome = validate_share(&reg, &mut s, &submission(), 1_700_000_000);
        match outcome {
            ShareOutcome::Accepted(a) => assert!(a.share_diff >= 0.0),
            ShareOutcome::Rejected(r) => panic!("expected accept, got {r:?}"),
        }
    }

    #[test]
    fn resubmitting_the_same_tuple_is_a_duplicate() {
        let reg = registry(1_700_000_000);
        let mut s = session(0.0);
        let sub = submission();
        let _ = validate_share(&reg, &mut s, &sub, 1_700_000_000);
        let outcome = validate_share(&reg, &mut s, &sub, 1_700_000_000);
        assert!(matches!(outcome, ShareOutcome::Rejected(RejectReason::Duplicate)));
    }

    #[test]
    fn ntime_too_far_in_the_past_is_rejected() {
        let reg = registry(1_700_000_000);
        let mut s = session(0.0);
        let mut sub = submission();
        sub.ntime = 1_700_000_000 - 601;
        let outcome = validate_share(&reg, &mut s, &sub, 1_700_000_000);
        assert!(matches!(outcome, ShareOutcome::Rejected(RejectReason::BadNtime)));
    }

    #[test]
    fn ntime_too_far_in_the_future_is_rejected() {
        let reg = registry(1_700_000_000);
        let mut s = session(0.0);
        let mut sub = submission();
        sub.ntime = 1_700_000_000 + 7201;
        let outcome = validate_share(&reg, &mut s, &sub, 1_700_000_000);
        assert!(matches!(outcome, ShareOutcome::Rejected(RejectReason::BadNtime)));
    }

    #[test]
    fn impossibly_high_difficulty_requirement_rejects_as_low_difficulty() {
        let reg = registry(1_700_000_000);
        let mut s = session(f64::MAX / 2.0);
        let outcome = validate_share(&reg, &mut s, &submission(), 1_700_000_000);
        assert!(matches!(outcome, ShareOutcome::Rejected(RejectReason::LowDifficulty)));
    }

    #[test]
    fn rejected_shares_are_still_counted_against_duplicate_detection() {
        let reg = registry(1_700_000_000);
        let mut s = session(f64::MAX / 2.0);
        let sub = submission();
        let _ = validate_share(&reg, &mut s, &sub, 1_700_000_000);
        let outcome = validate_share(&reg, &mut s, &sub, 1_700_000_000);
        assert!(matches!(outcome, ShareOutcome::Rejected(RejectReason::Duplicate)));
    }
}
