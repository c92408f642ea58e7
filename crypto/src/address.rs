//! Payout address validation (spec.md §4.7): Base58Check P2PKH/P2SH and
//! Bech32/Bech32m witness programs, checked against the configured network.

use thiserror::Error;

use crate::bech32::{self, Bech32Error};
use crate::hash::sha256d;
use gantry_util::BtcNetwork;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("base58 decoding error")]
    Base58,
    #[error("base58check checksum mismatch")]
    ChecksumMismatch,
    #[error("unrecognized address version/length")]
    UnknownVersion,
    #[error("bech32 decode error: {0}")]
    Bech32(#[from] Bech32Error),
    #[error("address does not match any known format for this network")]
    NotRecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh([u8; 20]),
    P2sh([u8; 20]),
    Witness { version: u8, program: Vec<u8> },
}

impl AddressKind {
    /// The scriptPubKey this address pays to, for building coinbase
    /// outputs (spec.md §4.1 step 1).
    pub fn script_pubkey(&self) -> Vec<u8> {
        match self {
            AddressKind::P2pkh(hash) => {
                let mut s = Vec::with_capacity(25);
                s.push(0x76); // OP_DUP
                s.push(0xA9); // OP_HASH160
                s.push(0x14); // push 20
                s.extend_from_slice(hash);
                s.push(0x88); // OP_EQUALVERIFY
                s.push(0xAC); // OP_CHECKSIG
                s
            }
            AddressKind::P2sh(hash) => {
                let mut s = Vec::with_capacity(23);
                s.push(0xA9); // OP_HASH160
                s.push(0x14);
                s.extend_from_slice(hash);
                s.push(0x87); // OP_EQUAL
                s
            }
            AddressKind::Witness { version, program } => {
                let mut s = Vec::with_capacity(2 + program.len());
                s.push(witness_version_opcode(*version));
                s.push(program.len() as u8);
                s.extend_from_slice(program);
                s
            }
        }
    }
}

fn witness_version_opcode(version: u8) -> u8 {
    if version == 0 {
        0x00 // OP_0
    } else {
        0x50 + version // OP_1..OP_16
    }
}

fn decode_base58check(s: &str) -> Result<Vec<u8>, AddressError> {
    let raw = bs58::decode(s).into_vec().map_err(|_| AddressError::Base58)?;
    if raw.len() < 5 {
        return Err(AddressError::Base58);
    }
    let (payload, checksum) = raw.split_at(raw.len() - 4);
    let hash = sha256d(payload);
    if &hash[0..4] != checksum {
        return Err(AddressError::ChecksumMismatch);
    }
    Ok(payload.to_vec())
}

/// Validates `address` against `network`, returning its decoded form.
/// Base58Check is tried first (cheap length/version check), then
/// bech32/bech32m.
pub fn validate_address(network: BtcNetwork, address: &str) -> Result<AddressKind, AddressError> {
    if let Ok(payload) = decode_base58check(address) {
        if payload.len() == 21 {
            let version = payload[0];
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&payload[1..]);
            if version == network.p2pkh_version() {
                return Ok(AddressKind::P2pkh(hash));
            }
            if version == network.p2sh_version() {
                return Ok(AddressKind::P2sh(hash));
            }
            return Err(AddressError::UnknownVersion);
        }
    }

    let (witver, program) = bech32::decode_segwit_address(network.hrp(), address)?;
    Ok(AddressKind::Witness {
        version: witver,
        program,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_mainnet_bech32_v0() {
        let kind =
            validate_address(BtcNetwork::Mainnet, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
                .unwrap();
        assert!(matches!(kind, AddressKind::Witness { version: 0, .. }));
    }

    #[test]
    fn rejects_wrong_network_hrp() {
        let res = validate_address(BtcNetwork::Testnet, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
        assert!(res.is_err());
    }

    #[test]
    fn p2pkh_script_pubkey_shape() {
        let kind = AddressKind::P2pkh([0x11; 20]);
        let script = kind.script_pubkey();
        assert_eq!(script.len(), 25);
        assert_eq!(script[0], 0x76);
        assert_eq!(script[1], 0xA9);
        assert_eq!(script[2], 0x14);
        assert_eq!(script[23], 0x88);
        assert_eq!(script[24], 0xAC);
    }
}
