//! Thin async wrapper over `bitcoincore_rpc`'s blocking client (spec.md
//! §4.1: `getblocktemplate` polling and `submitblock` submission).

use std::sync::Arc;

use async_trait::async_trait;
use bitcoincore_rpc::{Auth, Client, RpcApi};
use log::{error, warn};
use serde_json::{json, Value};

use gantry_mining::server::BlockSubmitter;
use gantry_mining::workgen::{BlockTemplateSource, RawTemplate, RawTx, WorkGenError};

/// Reverses a big-endian display-order hash (as returned by Bitcoin Core's
/// JSON-RPC) into the internal little-endian byte order used everywhere
/// else in this crate family.
fn hex_to_internal_32(hex_str: &str) -> Result<[u8; 32], WorkGenError> {
    let mut bytes = hex::decode(hex_str)
        .map_err(|e| WorkGenError::Malformed(format!("bad hash hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(WorkGenError::Malformed(format!(
            "expected 32-byte hash, got {}",
            bytes.len()
        )));
    }
    bytes.reverse();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub struct BitcoinRpcClient {
    client: Arc<Client>,
}

impl BitcoinRpcClient {
    pub fn new(url: &str, user: &str, pass: &str) -> Result<Self, crate::RpcError> {
        let client = Client::new(url, Auth::UserPass(user.to_string(), pass.to_string()))?;
        Ok(BitcoinRpcClient {
            client: Arc::new(client),
        })
    }

    fn parse_template(value: Value) -> Result<RawTemplate, WorkGenError> {
        let height = value["height"]
            .as_u64()
            .ok_or_else(|| WorkGenError::Malformed("missing height".into()))?;
        let prev_hash_hex = value["previousblockhash"]
            .as_str()
            .ok_or_else(|| WorkGenError::Malformed("missing previousblockhash".into()))?;
        let prev_hash = hex_to_internal_32(prev_hash_hex)?;
        let version = value["version"]
            .as_i64()
            .ok_or_else(|| WorkGenError::Malformed("missing version".into()))? as u32;
        let bits_hex = value["bits"]
            .as_str()
            .ok_or_else(|| WorkGenError::Malformed("missing bits".into()))?;
        let bits = u32::from_str_radix(bits_hex, 16)
            .map_err(|e| WorkGenError::Malformed(format!("bad bits hex: {e}")))?;
        let curtime = value["curtime"]
            .as_u64()
            .ok_or_else(|| WorkGenError::Malformed("missing curtime".into()))? as u32;
        let coinbase_value = value["coinbasevalue"]
            .as_u64()
            .ok_or_else(|| WorkGenError::Malformed("missing coinbasevalue".into()))?;

        let mut transactions = Vec::new();
        for tx in value["transactions"]
            .as_array()
            .ok_or_else(|| WorkGenError::Malformed("missing transactions array".into()))?
        {
            let txid = hex_to_internal_32(
                tx["txid"]
                    .as_str()
                    .ok_or_else(|| WorkGenError::Malformed("tx missing txid".into()))?,
            )?;
            let wtxid_hex = tx["hash"].as_str().unwrap_or_else(|| {
                tx["txid"].as_str().unwrap_or_default()
            });
            let wtxid = hex_to_internal_32(wtxid_hex)?;
            let data_hex = tx["data"]
                .as_str()
                .ok_or_else(|| WorkGenError::Malformed("tx missing data".into()))?;
            let data = hex::decode(data_hex)
                .map_err(|e| WorkGenError::Malformed(format!("bad tx data hex: {e}")))?;
            transactions.push(RawTx { txid, wtxid, data });
        }

        Ok(RawTemplate {
            height,
            prev_hash,
            version,
            bits,
            curtime,
            coinbase_value,
            transactions,
        })
    }
}

#[async_trait]
impl BlockTemplateSource for BitcoinRpcClient {
    async fn get_template(&self, rules: &[&str]) -> Result<RawTemplate, WorkGenError> {
        let client = self.client.clone();
        let rules: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
        let value = tokio::task::spawn_blocking(move || {
            client.call::<Value>("getblocktemplate", &[json!({ "rules": rules })])
        })
        .await
        .map_err(|e| WorkGenError::Rpc(format!("join error: {e}")))?
        .map_err(|e| WorkGenError::Rpc(e.to_string()))?;

        Self::parse_template(value)
    }
}

#[async_trait]
impl BlockSubmitter for BitcoinRpcClient {
    async fn submit_block(&self, block: Vec<u8>) {
        let client = self.client.clone();
        let block_hex = hex::encode(&block);
        let result = tokio::task::spawn_blocking(move || {
            client.call::<Value>("submitblock", &[json!(block_hex)])
        })
        .await;

        match result {
            Ok(Ok(Value::Null)) => {}
            Ok(Ok(other)) => warn!("submitblock returned non-null: {other}"),
            Ok(Err(e)) => error!("submitblock RPC error: {e}"),
            Err(e) => error!("submitblock task join error: {e}"),
        }
    }
}
