//! Node skeleton: a single control loop owning the chain state, fed by
//! message queues from the (external) network and RPC transports.

mod config;
mod downloader;
mod mempool;
mod node;
mod rpc;

pub use config::Config;
pub use mempool::{verify_mempool_acceptance, Mempool};
pub use node::{DownloadRequest, NetworkEvent, Node, NodeError, PeerId};
pub use rpc::{RpcError, RpcRequest};

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bitd_storage::fjall::FjallStore;

pub async fn run_entry() -> Result<(), String> {
    let config = Config::from_args(std::env::args().skip(1))?;
    bitd_log::init(bitd_log::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: true,
    });

    let data_dir = config.network_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|err| format!("cannot create {}: {err}", data_dir.display()))?;

    let store = Arc::new(
        FjallStore::open(data_dir.join("chainstate")).map_err(|err| err.to_string())?,
    );
    let node = Node::new(store, config.chain_params()).map_err(|err| err.to_string())?;

    let terminate = node.terminate_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            bitd_log::log_info!("interrupt received, shutting down");
            terminate.store(true, Ordering::SeqCst);
        }
    });

    tokio::task::spawn_blocking(move || node.run())
        .await
        .map_err(|err| err.to_string())?
        .map_err(|err| err.to_string())
}
