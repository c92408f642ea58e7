//! Gantry RPC: the Bitcoin Core client the Work Generator polls for block
//! templates and submits winning blocks to (spec.md §4.1), plus the ZMQ
//! hashblock subscriber that triggers an out-of-band refresh.

use thiserror::Error;

pub mod client;
pub mod zmq_listener;

pub use client::BitcoinRpcClient;
pub use zmq_listener::HashblockSubscriber;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("bitcoin core RPC error: {0}")]
    Node(#[from] bitcoincore_rpc::Error),
    #[error("malformed RPC response: {0}")]
    Malformed(String),
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),
}
