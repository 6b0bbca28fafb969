//! Block download scheduling: keeps a sliding window of wanted blocks and
//! spreads it across idle peers.

use std::collections::HashMap;

use bitd_consensus::{Hash256, NodeStatus};
use bitd_storage::KeyValueStore;

use crate::node::{DownloadRequest, Node};

const FRESH_BATCH: usize = 16;
const RETRY_BATCH: usize = 4;

/// Refills the download window from the block index, drops hashes that
/// arrived in the meantime, and hands batches to peers with empty queues.
/// Laggard hashes already queued elsewhere get re-requested in small
/// batches, least-requested first.
pub(crate) fn block_download<S: KeyValueStore>(node: &mut Node<S>) {
    if node.status < NodeStatus::HeaderSynced {
        return;
    }

    if node.download_window.is_empty() {
        node.download_window = node.chainstate.block_index.get_download_candidates();
    }
    let block_index = &node.chainstate.block_index;
    node.download_window.retain(|hash| {
        block_index
            .get_block_info(hash)
            .is_some_and(|info| !info.downloaded)
    });
    if node.download_window.is_empty() {
        return;
    }

    // drop finished work from peer queues; bail unless someone is idle
    let mut pending: Vec<Hash256> = Vec::new();
    let mut any_idle = false;
    for peer_state in node.peers.values_mut() {
        peer_state.download_queue.retain(|hash| {
            block_index
                .get_block_info(hash)
                .is_some_and(|info| !info.downloaded)
        });
        pending.extend(peer_state.download_queue.iter().copied());
        if peer_state.download_queue.is_empty() {
            any_idle = true;
        }
    }
    if !any_idle {
        return;
    }

    let mut request_counts: HashMap<Hash256, usize> = HashMap::new();
    for hash in &pending {
        *request_counts.entry(*hash).or_insert(0) += 1;
    }

    let mut waiting: Vec<Hash256> = node
        .download_window
        .iter()
        .filter(|hash| !request_counts.contains_key(*hash))
        .copied()
        .collect();
    let mut retries: Vec<Hash256> = request_counts.keys().copied().collect();
    retries.sort_by_key(|hash| request_counts[hash]);

    for (peer, peer_state) in node.peers.iter_mut() {
        if !peer_state.download_queue.is_empty() {
            continue;
        }
        let batch: Vec<Hash256> = if !waiting.is_empty() {
            waiting.drain(..waiting.len().min(FRESH_BATCH)).collect()
        } else if !retries.is_empty() {
            retries.drain(..retries.len().min(RETRY_BATCH)).collect()
        } else {
            return;
        };
        peer_state.download_queue = batch.clone();
        let _ = node.request_tx.send(DownloadRequest {
            peer: *peer,
            hashes: batch,
        });
    }
}
