//! Stratum V1 wire types (spec.md §4.2, §6): newline-delimited JSON-RPC 2.0,
//! one method per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound `mining.*`/`client.*` call. `params` is left as raw `Value`s
/// since Stratum mixes positional arrays freely across methods.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Response always serializes")
    }
}

/// `[code, message, data]`, per spec.md §4.2's numeric error codes.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError(pub i32, pub String, pub Option<Value>);

pub const ERR_STALE_SHARE: i32 = 21;
pub const ERR_DUPLICATE: i32 = 22;
pub const ERR_LOW_DIFFICULTY: i32 = 23;
pub const ERR_UNAUTHORIZED: i32 = 24;
pub const ERR_INVALID_PARAMS: i32 = 25;
pub const ERR_MALFORMED: i32 = 26;

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        RpcError(code, message.into(), None)
    }
}

/// A server-initiated notification (`id` is always `null`).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Option<Value>,
    pub method: &'static str,
    pub params: Value,
}

impl Notification {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Notification always serializes")
    }

    pub fn set_difficulty(difficulty: f64) -> Self {
        Notification {
            id: None,
            method: "mining.set_difficulty",
            params: serde_json::json!([difficulty]),
        }
    }

    /// `[job_id, prev_hash, coinb1, coinb2, merkle_branch, version, bits, curtime, clean_jobs]`
    #[allow(clippy::too_many_arguments)]
    pub fn notify(
        job_id: u64,
        prev_hash: &[u8; 32],
        coinb1: &[u8],
        coinb2: &[u8],
        merkle_branch: &[[u8; 32]],
        version: u32,
        bits: u32,
        curtime: u32,
        clean_jobs: bool,
    ) -> Self {
        Notification {
            id: None,
            method: "mining.notify",
            params: serde_json::json!([
                format!("{job_id:x}"),
                hex::encode(prev_hash),
                hex::encode(coinb1),
                hex::encode(coinb2),
                merkle_branch.iter().map(hex::encode).collect::<Vec<_>>(),
                format!("{version:08x}"),
                format!("{bits:08x}"),
                format!("{curtime:08x}"),
                clean_jobs,
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_positional_params() {
        let line = r#"{"id":1,"method":"mining.submit","params":["rig01","3","aabbccdd","5f5e1000","1"]}"#;
        let req: Request = serde_json::from_str(line).unwrap();
        assert_eq!(req.method, "mining.submit");
        assert_eq!(req.params.len(), 5);
    }

    #[test]
    fn response_omits_error_when_ok() {
        let resp = Response::ok(Value::from(1), Value::Bool(true));
        let line = resp.to_line();
        assert!(!line.contains("error"));
    }

    #[test]
    fn error_response_encodes_numeric_code() {
        let resp = Response::err(Value::from(1), RpcError::new(ERR_STALE_SHARE, "stale share"));
        let line = resp.to_line();
        assert!(line.contains("21"));
        assert!(line.contains("stale share"));
    }
}
