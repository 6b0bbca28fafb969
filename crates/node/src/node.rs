//! The control loop owning chain state, mempool, and download scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bitd_chainstate::{BlockDb, Chainstate, ChainstateError};
use bitd_consensus::{ChainParams, Hash256, NodeStatus};
use bitd_primitives::block::{Block, BlockHeader};
use bitd_storage::{KeyValueStore, StoreError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;

use crate::downloader;
use crate::mempool::Mempool;
use crate::rpc::{self, RpcRequest};

pub type PeerId = u64;

/// Parsed messages the network reactor enqueues for the control loop. The
/// reactor never touches chain state directly.
#[derive(Debug)]
pub enum NetworkEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    Headers(Vec<BlockHeader>),
    Block(Block),
}

/// Outbound getdata-style request for the peer layer to transmit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DownloadRequest {
    pub peer: PeerId,
    pub hashes: Vec<Hash256>,
}

#[derive(Debug)]
pub enum NodeError {
    Chainstate(ChainstateError),
    Store(StoreError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Chainstate(err) => write!(f, "{err}"),
            NodeError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ChainstateError> for NodeError {
    fn from(err: ChainstateError) -> Self {
        NodeError::Chainstate(err)
    }
}

impl From<StoreError> for NodeError {
    fn from(err: StoreError) -> Self {
        NodeError::Store(err)
    }
}

#[derive(Default)]
pub(crate) struct PeerState {
    pub(crate) download_queue: Vec<Hash256>,
}

pub struct Node<S> {
    pub(crate) params: ChainParams,
    pub(crate) chainstate: Chainstate<S>,
    pub(crate) block_db: BlockDb<S>,
    pub(crate) mempool: Mempool,
    pub(crate) status: NodeStatus,
    pub(crate) download_window: Vec<Hash256>,
    pub(crate) peers: HashMap<PeerId, PeerState>,
    net_tx: Sender<NetworkEvent>,
    net_rx: Receiver<NetworkEvent>,
    rpc_tx: Sender<RpcRequest>,
    rpc_rx: Receiver<RpcRequest>,
    pub(crate) request_tx: Sender<DownloadRequest>,
    request_rx: Receiver<DownloadRequest>,
    pub(crate) terminate: Arc<AtomicBool>,
}

impl<S: KeyValueStore> Node<S> {
    pub fn new(store: Arc<S>, params: ChainParams) -> Result<Self, NodeError> {
        let chainstate = Chainstate::new(Arc::clone(&store), &params)?;
        let block_db = BlockDb::new(store);
        let (net_tx, net_rx) = unbounded();
        let (rpc_tx, rpc_rx) = unbounded();
        let (request_tx, request_rx) = unbounded();

        bitd_log::log_info!(
            "node starting on {} at height {}",
            params.name,
            chainstate.block_index.height()
        );

        Ok(Self {
            params,
            chainstate,
            block_db,
            mempool: Mempool::new(),
            status: NodeStatus::SyncingHeaders,
            download_window: Vec::new(),
            peers: HashMap::new(),
            net_tx,
            net_rx,
            rpc_tx,
            rpc_rx,
            request_tx,
            request_rx,
            terminate: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Queue handle for the network reactor.
    pub fn network_sender(&self) -> Sender<NetworkEvent> {
        self.net_tx.clone()
    }

    /// Queue handle for the RPC transport.
    pub fn rpc_sender(&self) -> Sender<RpcRequest> {
        self.rpc_tx.clone()
    }

    /// Outbound download requests for the peer layer to consume.
    pub fn download_requests(&self) -> Receiver<DownloadRequest> {
        self.request_rx.clone()
    }

    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn run(mut self) -> Result<(), NodeError> {
        while !self.terminate.load(Ordering::SeqCst) {
            let busy = self.tick()?;
            if !busy {
                thread::sleep(Duration::from_millis(10));
            }
        }
        bitd_log::log_info!("node stopped at height {}", self.chainstate.block_index.height());
        Ok(())
    }

    /// One control-loop iteration: drain queues, schedule downloads, then
    /// let the reorg driver make progress. Returns whether any queue had
    /// work, so the caller can idle otherwise.
    pub fn tick(&mut self) -> Result<bool, NodeError> {
        let mut busy = false;

        while let Ok(request) = self.rpc_rx.try_recv() {
            rpc::handle_request(self, request);
            busy = true;
        }
        while let Ok(event) = self.net_rx.try_recv() {
            self.handle_network_event(event)?;
            busy = true;
        }

        downloader::block_download(self);

        let status = self.chainstate.update_chain(
            &self.block_db,
            &mut self.mempool,
            self.status,
            &self.params,
        )?;
        if status != self.status {
            if status == NodeStatus::BlockSynced {
                bitd_log::log_info!(
                    "block synced at height {}",
                    self.chainstate.block_index.height()
                );
            }
            self.status = status;
        }

        Ok(busy)
    }

    fn handle_network_event(&mut self, event: NetworkEvent) -> Result<(), NodeError> {
        match event {
            NetworkEvent::PeerConnected(peer) => {
                self.peers.insert(peer, PeerState::default());
            }
            NetworkEvent::PeerDisconnected(peer) => {
                self.peers.remove(&peer);
            }
            NetworkEvent::Headers(headers) => {
                let added = self.chainstate.block_index.add_headers(&headers)?;
                if !added && self.status == NodeStatus::SyncingHeaders {
                    bitd_log::log_info!(
                        "headers synced: best header height {}",
                        self.chainstate.block_index.header_index().len() - 1
                    );
                    self.status = NodeStatus::HeaderSynced;
                }
            }
            NetworkEvent::Block(block) => {
                let hash = block.header.hash();
                if !self.chainstate.block_index.contains(&hash) {
                    bitd_log::log_debug!("ignoring block with unknown header");
                    return Ok(());
                }
                self.block_db.add_block(&block)?;
                self.chainstate.block_index.mark_downloaded(&hash)?;
            }
        }
        Ok(())
    }
}
