//! Merkle branch precomputation for the coinbase transaction at index 0
//! (spec.md §4.1, §4.3 step 4).

use gantry_crypto::sha256d;

/// Computes the authentication path a coinbase transaction (always at
/// index 0) needs to fold with to reach the merkle root, given the txids
/// of every other transaction in the block in order.
pub fn branch_for_coinbase(other_txids: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut level: Vec<[u8; 32]> = std::iter::once([0u8; 32])
        .chain(other_txids.iter().copied())
        .collect();
    let mut branch = Vec::new();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().unwrap();
            level.push(last);
        }
        branch.push(level[1]);
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = [0u8; 64];
            buf[0..32].copy_from_slice(&pair[0]);
            buf[32..64].copy_from_slice(&pair[1]);
            next.push(sha256d(&buf));
        }
        level = next;
    }

    branch
}

/// Folds a coinbase transaction hash with its precomputed branch to
/// reconstruct the merkle root (spec.md §4.3 step 4).
pub fn fold_branch(coinbase_hash: [u8; 32], branch: &[[u8; 32]]) -> [u8; 32] {
    let mut acc = coinbase_hash;
    for sibling in branch {
        let mut buf = [0u8; 64];
        buf[0..32].copy_from_slice(&acc);
        buf[32..64].copy_from_slice(sibling);
        acc = sha256d(&buf);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_hash(tag: u8) -> [u8; 32] {
        let mut h = [0u8; 32];
        h[0] = tag;
        h
    }

    #[test]
    fn single_tx_block_has_empty_branch() {
        let branch = branch_for_coinbase(&[]);
        assert!(branch.is_empty());
        let root = fold_branch(tx_hash(1), &branch);
        assert_eq!(root, tx_hash(1));
    }

    #[test]
    fn branch_reconstructs_root_matching_direct_computation() {
        let coinbase = tx_hash(0xc0);
        let tx1 = tx_hash(1);
        let tx2 = tx_hash(2);

        let branch = branch_for_coinbase(&[tx1, tx2]);
        let reconstructed = fold_branch(coinbase, &branch);

        // Direct computation: level0 = [coinbase, tx1, tx2, tx2] (padded),
        // level1 = [h(coinbase,tx1), h(tx2,tx2)], root = h(level1[0], level1[1]).
        let h = |a: [u8; 32], b: [u8; 32]| {
            let mut buf = [0u8; 64];
            buf[0..32].copy_from_slice(&a);
            buf[32..64].copy_from_slice(&b);
            sha256d(&buf)
        };
        let l1_0 = h(coinbase, tx1);
        let l1_1 = h(tx2, tx2);
        let expected_root = h(l1_0, l1_1);

        assert_eq!(reconstructed, expected_root);
    }
}
