//! Read-only control-plane queries, answered synchronously from the
//! control loop so every reply is a consistent snapshot of one tick.

use std::sync::atomic::Ordering;

use bitd_consensus::{hash256_from_hex, hash256_to_hex, NodeStatus};
use bitd_storage::KeyValueStore;
use crossbeam_channel::Sender;
use serde_json::{json, Value};

use crate::node::Node;

#[derive(Debug)]
pub enum RpcError {
    UnknownMethod(String),
    InvalidParams(&'static str),
    NotFound,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::UnknownMethod(method) => write!(f, "unknown method {method}"),
            RpcError::InvalidParams(message) => write!(f, "{message}"),
            RpcError::NotFound => write!(f, "not found"),
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub reply: Sender<Result<Value, RpcError>>,
}

pub(crate) fn handle_request<S: KeyValueStore>(node: &mut Node<S>, request: RpcRequest) {
    let result = dispatch(node, &request.method, &request.params);
    let _ = request.reply.send(result);
}

fn dispatch<S: KeyValueStore>(
    node: &mut Node<S>,
    method: &str,
    params: &[Value],
) -> Result<Value, RpcError> {
    match method {
        "getbestblockhash" => {
            let index = node.chainstate.block_index.header_index();
            Ok(json!(hash256_to_hex(&index[index.len() - 1])))
        }
        "getblockcount" => Ok(json!(node.chainstate.block_index.height())),
        "getblockhash" => {
            let height = params
                .first()
                .and_then(Value::as_u64)
                .ok_or(RpcError::InvalidParams("height required"))?;
            let hash = node
                .chainstate
                .block_index
                .header_index()
                .get(height as usize)
                .ok_or(RpcError::NotFound)?;
            Ok(json!(hash256_to_hex(hash)))
        }
        "getblockheader" => {
            let raw = params
                .first()
                .and_then(Value::as_str)
                .ok_or(RpcError::InvalidParams("block hash required"))?;
            let hash =
                hash256_from_hex(raw).map_err(|_| RpcError::InvalidParams("malformed hash"))?;
            let info = node
                .chainstate
                .block_index
                .get_block_info(&hash)
                .ok_or(RpcError::NotFound)?;

            let header_index = node.chainstate.block_index.header_index();
            let position = header_index.iter().position(|entry| *entry == hash);

            let mut out = json!({
                "hash": hash256_to_hex(&hash),
                "version": info.header.version,
                "merkleroot": hash256_to_hex(&info.header.merkle_root),
                "time": info.header.time,
                "bits": format!("{:08x}", info.header.bits),
                "nonce": info.header.nonce,
                "height": info.height,
                "chainwork": format!("{:064x}", info.chainwork),
            });
            if let Some(position) = position {
                out["confirmations"] = json!(header_index.len() - position);
                if position > 0 {
                    out["previousblockhash"] = json!(hash256_to_hex(&header_index[position - 1]));
                }
                if position + 1 < header_index.len() {
                    out["nextblockhash"] = json!(hash256_to_hex(&header_index[position + 1]));
                }
            } else {
                out["confirmations"] = json!(-1);
            }
            Ok(out)
        }
        "getconnectioncount" => Ok(json!(node.peers.len())),
        "getmempoolinfo" => Ok(json!({
            "size": node.mempool.len(),
            "synced": node.status() == NodeStatus::BlockSynced,
        })),
        "stop" => {
            node.terminate.store(true, Ordering::SeqCst);
            Ok(json!("bitd stopping"))
        }
        other => Err(RpcError::UnknownMethod(other.to_string())),
    }
}
