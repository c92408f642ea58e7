//! Work Generator (spec.md §4.1): turns Bitcoin Core block templates into
//! `Workbase`s ready to hand to the Stratum server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::info;
use thiserror::Error;

use gantry_core::workbase::Workbase;
use gantry_crypto::{network_difficulty, sha256d};

use crate::merkle;

pub const EXTRANONCE1_SIZE: usize = 4;
pub const EXTRANONCE2_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum WorkGenError {
    #[error("getblocktemplate RPC failed: {0}")]
    Rpc(String),
    #[error("malformed block template: {0}")]
    Malformed(String),
}

/// One transaction from a `getblocktemplate` response.
#[derive(Debug, Clone)]
pub struct RawTx {
    pub txid: [u8; 32],
    pub wtxid: [u8; 32],
    pub data: Vec<u8>,
}

/// The subset of a `getblocktemplate` response the Work Generator needs
/// (spec.md §4.1 "Inputs consumed from the Bitcoin node").
#[derive(Debug, Clone)]
pub struct RawTemplate {
    pub height: u64,
    pub prev_hash: [u8; 32],
    pub version: u32,
    pub bits: u32,
    pub curtime: u32,
    pub coinbase_value: u64,
    pub transactions: Vec<RawTx>,
}

/// Source of block templates, implemented against the Bitcoin Core RPC
/// client (`gantry_rpc`). Kept as a trait here so the Work Generator is
/// testable without a live node.
#[async_trait]
pub trait BlockTemplateSource: Send + Sync {
    async fn get_template(&self, rules: &[&str]) -> Result<RawTemplate, WorkGenError>;
}

fn varint(n: u64) -> Vec<u8> {
    let mut out = Vec::new();
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
    out
}

/// BIP34 minimal-encoding push of the block height.
fn push_height(height: u64) -> Vec<u8> {
    let mut n = height;
    let mut bytes = Vec::new();
    while n > 0 {
        bytes.push((n & 0xff) as u8);
        n >>= 8;
    }
    if bytes.last().map_or(true, |&b| b & 0x80 != 0) {
        bytes.push(0x00);
    }
    let mut out = vec![bytes.len() as u8];
    out.extend(bytes);
    out
}

fn push_bytes(data: &[u8]) -> Vec<u8> {
    assert!(data.len() <= 75, "pool signature must fit a single-byte push");
    let mut out = vec![data.len() as u8];
    out.extend_from_slice(data);
    out
}

/// BIP141 witness commitment: `SHA256d(witness_merkle_root || reserved_value)`.
fn witness_commitment(wtxids: &[[u8; 32]]) -> [u8; 32] {
    let branch = merkle::branch_for_coinbase(wtxids);
    let witness_root = merkle::fold_branch([0u8; 32], &branch);
    let mut buf = [0u8; 64];
    buf[0..32].copy_from_slice(&witness_root);
    sha256d(&buf)
}

/// Splits the assembled coinbase at the extranonce placeholder so a
/// session only ever needs to insert its extranonce1/extranonce2 between
/// `coinb1` and `coinb2` (spec.md §4.1 step 3).
fn build_coinbase(
    height: u64,
    pool_signature: &str,
    payout_script: &[u8],
    coinbase_value: u64,
    commitment: Option<[u8; 32]>,
) -> (Vec<u8>, Vec<u8>) {
    let height_push = push_height(height);
    let sig_push = push_bytes(pool_signature.as_bytes());
    let script_len = height_push.len() + sig_push.len() + EXTRANONCE1_SIZE + EXTRANONCE2_SIZE;

    let mut outputs: Vec<(u64, Vec<u8>)> = vec![(coinbase_value, payout_script.to_vec())];
    if let Some(commitment) = commitment {
        let mut script = Vec::with_capacity(38);
        script.push(0x6a); // OP_RETURN
        script.push(0x24); // push 36 bytes
        script.extend_from_slice(&[0xaa, 0x21, 0xa9, 0xed]);
        script.extend_from_slice(&commitment);
        outputs.push((0, script));
    }

    let mut coinb1 = Vec::new();
    coinb1.extend_from_slice(&1u32.to_le_bytes()); // version
    coinb1.push(0x00); // segwit marker
    coinb1.push(0x01); // segwit flag
    coinb1.extend_from_slice(&varint(1)); // input count
    coinb1.extend_from_slice(&[0u8; 32]); // prevout hash
    coinb1.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // prevout index
    coinb1.extend_from_slice(&varint(script_len as u64));
    coinb1.extend_from_slice(&height_push);
    coinb1.extend_from_slice(&sig_push);
    // coinb1 ends here; the session inserts extranonce1 next.

    let mut coinb2 = Vec::new();
    // The session inserts extranonce2 before coinb2 begins.
    coinb2.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
    coinb2.extend_from_slice(&varint(outputs.len() as u64));
    for (value, script) in &outputs {
        coinb2.extend_from_slice(&value.to_le_bytes());
        coinb2.extend_from_slice(&varint(script.len() as u64));
        coinb2.extend_from_slice(script);
    }
    // Witness: one stack item, the 32-byte reserved value.
    coinb2.push(0x01);
    coinb2.push(0x20);
    coinb2.extend_from_slice(&[0u8; 32]);
    coinb2.extend_from_slice(&0u32.to_le_bytes()); // locktime

    (coinb1, coinb2)
}

/// Assembles a full serialized block from a winning share's header and
/// coinbase transaction, for submission via Bitcoin RPC `submitblock`
/// (spec.md §4.3 step 9).
pub fn assemble_block(workbase: &Workbase, coinbase_tx: &[u8], header: &[u8; 80]) -> Vec<u8> {
    let mut block = Vec::with_capacity(
        80 + 9 + coinbase_tx.len() + workbase.other_tx_data.iter().map(Vec::len).sum::<usize>(),
    );
    block.extend_from_slice(header);
    block.extend_from_slice(&varint(1 + workbase.other_tx_data.len() as u64));
    block.extend_from_slice(coinbase_tx);
    for tx in &workbase.other_tx_data {
        block.extend_from_slice(tx);
    }
    block
}

/// Owns the current workbase and a bounded window of recently-retired ones
/// (spec.md §3, §4.1, §5 "atomic pointer swap").
pub struct WorkbaseRegistry {
    current: RwLock<Arc<Workbase>>,
    recent: RwLock<VecDeque<Arc<Workbase>>>,
    max_retained: usize,
    next_id: AtomicU64,
}

impl WorkbaseRegistry {
    pub fn new(max_retained: usize) -> Self {
        let placeholder = Arc::new(Workbase {
            id: 0,
            height: 0,
            prev_hash: [0u8; 32],
            coinb1: Vec::new(),
            coinb2: Vec::new(),
            merkle_branch: Vec::new(),
            version: 0,
            bits: 0,
            curtime: 0,
            network_diff: 0.0,
            clean_jobs: true,
            created_at: 0,
            other_tx_data: Vec::new(),
        });
        WorkbaseRegistry {
            current: RwLock::new(placeholder),
            recent: RwLock::new(VecDeque::new()),
            max_retained,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> Arc<Workbase> {
        self.current.read().unwrap().clone()
    }

    pub fn get(&self, id: u64) -> Option<Arc<Workbase>> {
        let cur = self.current.read().unwrap();
        if cur.id == id {
            return Some(cur.clone());
        }
        drop(cur);
        self.recent.read().unwrap().iter().find(|w| w.id == id).cloned()
    }

    /// Ids of every workbase a share may still legally be submitted against.
    pub fn live_ids(&self) -> std::collections::HashSet<u64> {
        let mut ids = std::collections::HashSet::new();
        ids.insert(self.current.read().unwrap().id);
        for w in self.recent.read().unwrap().iter() {
            ids.insert(w.id);
        }
        ids
    }

    /// Builds a workbase from `tpl` and makes it current, retiring the old
    /// current into the retained window (spec.md §4.1).
    pub fn publish(
        &self,
        tpl: &RawTemplate,
        pool_signature: &str,
        payout_script: &[u8],
        now: u64,
    ) -> Arc<Workbase> {
        let other_txids: Vec<[u8; 32]> = tpl.transactions.iter().map(|t| t.txid).collect();
        let other_wtxids: Vec<[u8; 32]> = tpl.transactions.iter().map(|t| t.wtxid).collect();
        let merkle_branch = merkle::branch_for_coinbase(&other_txids);
        let commitment = witness_commitment(&other_wtxids);

        let (coinb1, coinb2) = build_coinbase(
            tpl.height,
            pool_signature,
            payout_script,
            tpl.coinbase_value,
            Some(commitment),
        );

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let prev_changed = self.current.read().unwrap().prev_hash != tpl.prev_hash;

        let other_tx_data: Vec<Vec<u8>> = tpl.transactions.iter().map(|t| t.data.clone()).collect();

        let workbase = Arc::new(Workbase {
            id,
            height: tpl.height,
            prev_hash: tpl.prev_hash,
            coinb1,
            coinb2,
            merkle_branch,
            version: tpl.version,
            bits: tpl.bits,
            curtime: tpl.curtime,
            network_diff: network_difficulty(tpl.bits),
            clean_jobs: prev_changed,
            created_at: now,
            other_tx_data,
        });

        let old = {
            let mut cur = self.current.write().unwrap();
            std::mem::replace(&mut *cur, workbase.clone())
        };
        if old.id != 0 {
            let mut recent = self.recent.write().unwrap();
            recent.push_back(old);
            while recent.len() > self.max_retained {
                recent.pop_front();
            }
        }

        info!(
            "workbase {} published: height={} clean_jobs={}",
            workbase.id, workbase.height, workbase.clean_jobs
        );
        workbase
    }

    /// Installs an already-built workbase received from the primary over
    /// the relay bus, retiring the previous current the same way `publish`
    /// does. A relay applies templates verbatim rather than rebuilding them
    /// from its own GBT poll (spec.md §4.6).
    pub fn adopt(&self, workbase: Workbase) -> Arc<Workbase> {
        let workbase = Arc::new(workbase);
        let old = {
            let mut cur = self.current.write().unwrap();
            std::mem::replace(&mut *cur, workbase.clone())
        };
        if old.id != 0 {
            let mut recent = self.recent.write().unwrap();
            recent.push_back(old);
            while recent.len() > self.max_retained {
                recent.pop_front();
            }
        }
        info!(
            "workbase {} adopted from primary: height={}",
            workbase.id, workbase.height
        );
        workbase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tpl(height: u64, prev_hash: [u8; 32]) -> RawTemplate {
        RawTemplate {
            height,
            prev_hash,
            version: 0x20000000,
            bits: 0x1d00ffff,
            curtime: 1_700_000_000,
            coinbase_value: 625_000_000,
            transactions: vec![],
        }
    }

    fn payout_script() -> Vec<u8> {
        vec![0x76, 0xa9, 0x14, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x88, 0xac]
    }

    #[test]
    fn first_publish_is_not_marked_clean_jobs_relative_to_placeholder() {
        let reg = WorkbaseRegistry::new(4);
        let wb = reg.publish(&tpl(100, [1u8; 32]), "gantry", &payout_script(), 1000);
        assert_eq!(wb.height, 100);
        assert_eq!(reg.current().id, wb.id);
    }

    #[test]
    fn same_prev_hash_does_not_require_clean_jobs() {
        let reg = WorkbaseRegistry::new(4);
        reg.publish(&tpl(100, [1u8; 32]), "gantry", &payout_script(), 1000);
        let wb2 = reg.publish(&tpl(100, [1u8; 32]), "gantry", &payout_script(), 1001);
        assert!(!wb2.clean_jobs);
    }

    #[test]
    fn new_block_requires_clean_jobs() {
        let reg = WorkbaseRegistry::new(4);
        reg.publish(&tpl(100, [1u8; 32]), "gantry", &payout_script(), 1000);
        let wb2 = reg.publish(&tpl(101, [2u8; 32]), "gantry", &payout_script(), 1001);
        assert!(wb2.clean_jobs);
    }

    #[test]
    fn retired_workbases_stay_retrievable_up_to_the_cap() {
        let reg = WorkbaseRegistry::new(2);
        let wb1 = reg.publish(&tpl(100, [1u8; 32]), "gantry", &payout_script(), 1000);
        let _wb2 = reg.publish(&tpl(101, [2u8; 32]), "gantry", &payout_script(), 1001);
        let _wb3 = reg.publish(&tpl(102, [3u8; 32]), "gantry", &payout_script(), 1002);
        let _wb4 = reg.publish(&tpl(103, [4u8; 32]), "gantry", &payout_script(), 1003);
        // wb1 should have been evicted once the retained window (2) filled.
        assert!(reg.get(wb1.id).is_none());
    }

    #[test]
    fn coinbase_split_places_extranonce_placeholder_boundary_correctly() {
        let (coinb1, coinb2) = build_coinbase(100, "gantry", &payout_script(), 625_000_000, None);
        // coinb1 must end right after the scriptSig prefix (height+sig push),
        // leaving exactly EXTRANONCE1_SIZE+EXTRANONCE2_SIZE bytes for the
        // session/miner to fill before coinb2's sequence field begins.
        assert!(coinb1.len() > 10);
        assert!(coinb2.len() > 10);
    }
}
