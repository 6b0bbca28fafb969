//! Chain reorganization driver.
//!
//! `Chainstate` is the single owner of both indices; `update_chain` is the
//! only writer and must never run concurrently with another mutator. One
//! pass selects the best candidate, stages disconnects then connects on the
//! UTXO overlay, verifies every staged transaction, and commits all index
//! mutations, undo records, and UTXO effects in one atomic batch.

use std::sync::Arc;

use bitd_consensus::{hash256_to_hex, ChainParams, Hash256, NodeStatus};
use bitd_primitives::block::Block;
use bitd_primitives::transaction::Transaction;
use bitd_storage::{KeyValueStore, WriteBatch};

use crate::block_index::BlockIndex;
use crate::block_info::BlockStatus;
use crate::blockdb::BlockDb;
use crate::error::ChainstateError;
use crate::undo::RevBlock;
use crate::utxo_index::UtxoIndex;
use crate::verify::check_transactions;

/// Best-effort hooks the driver calls after a committed reorg; not part of
/// the atomicity contract.
pub trait MempoolHooks {
    fn add_tx(&mut self, tx: Transaction);
    fn remove_tx(&mut self, txid: &Hash256);
}

/// No-op hooks for contexts without a mempool.
impl MempoolHooks for () {
    fn add_tx(&mut self, _tx: Transaction) {}
    fn remove_tx(&mut self, _txid: &Hash256) {}
}

enum StageFailure {
    /// A block failed consensus validation; the overlay must be rolled back
    /// and the candidate dropped.
    Validation {
        hash: Hash256,
        error: ChainstateError,
    },
    /// Storage or corruption trouble; fatal to the control loop.
    Fatal(ChainstateError),
}

pub struct Chainstate<S> {
    store: Arc<S>,
    pub block_index: BlockIndex<S>,
    pub utxo_index: UtxoIndex<S>,
}

impl<S: KeyValueStore> Chainstate<S> {
    pub fn new(store: Arc<S>, params: &ChainParams) -> Result<Self, ChainstateError> {
        let block_index = BlockIndex::new(Arc::clone(&store), params)?;
        let utxo_index = UtxoIndex::new(Arc::clone(&store));
        Ok(Self {
            store,
            block_index,
            utxo_index,
        })
    }

    /// One driver pass: reorganizes toward the best candidate until no
    /// candidate remains (then reports `BlockSynced`) or a candidate is not
    /// fully downloaded yet (then returns unchanged, waiting for the
    /// downloader). A candidate that fails validation is marked `Invalid`,
    /// dropped, and never retried.
    pub fn update_chain<M: MempoolHooks>(
        &mut self,
        block_db: &BlockDb<S>,
        mempool: &mut M,
        status: NodeStatus,
        params: &ChainParams,
    ) -> Result<NodeStatus, ChainstateError> {
        if status < NodeStatus::HeaderSynced {
            return Ok(status);
        }

        loop {
            let Some(candidate) = self.block_index.get_first_candidate() else {
                return Ok(NodeStatus::BlockSynced);
            };
            let candidate_hash = candidate.header.hash();
            let (to_add_hashes, to_remove_hashes) =
                self.block_index.get_fork_details(&candidate_hash)?;

            // a branch through an invalidated block can never connect
            let infos = to_add_hashes
                .iter()
                .map(|hash| {
                    self.block_index
                        .get_block_info(hash)
                        .ok_or(ChainstateError::UnknownBlock)
                })
                .collect::<Result<Vec<_>, _>>()?;
            if infos.iter().any(|info| info.status == BlockStatus::Invalid) {
                self.block_index.discard_candidate(&candidate_hash);
                continue;
            }
            if infos.iter().any(|info| !info.downloaded) {
                return Ok(status);
            }

            bitd_log::log_info!(
                "start block validation: {} to connect, {} to disconnect",
                to_add_hashes.len(),
                to_remove_hashes.len()
            );

            let mut to_add = Vec::with_capacity(to_add_hashes.len());
            for hash in &to_add_hashes {
                let block = block_db
                    .get_block(hash)?
                    .ok_or(ChainstateError::MissingBlockData)?;
                to_add.push((*hash, block));
            }
            let mut rev_blocks = Vec::with_capacity(to_remove_hashes.len());
            for hash in &to_remove_hashes {
                let rev_block = block_db
                    .get_rev_block(hash)?
                    .ok_or(ChainstateError::MissingBlockData)?;
                rev_blocks.push(rev_block);
            }

            match self.stage_reorg(&to_add, &rev_blocks, params) {
                Ok(generated) => {
                    let mut batch = WriteBatch::new();
                    for hash in to_remove_hashes.iter().rev() {
                        self.block_index.remove_from_active_chain(hash)?;
                        self.set_status(hash, BlockStatus::Valid, &mut batch)?;
                        bitd_log::log_debug!("disconnected block {}", hash256_to_hex(hash));
                    }
                    for (hash, _) in &to_add {
                        self.block_index.add_to_active_chain(*hash);
                        self.set_status(hash, BlockStatus::InActiveChain, &mut batch)?;
                        bitd_log::log_info!("connected block {}", hash256_to_hex(hash));
                    }
                    for rev_block in &generated {
                        block_db.stage_rev_block(&mut batch, rev_block);
                    }
                    self.utxo_index.finalize(&mut batch);
                    self.store.write_batch(&batch)?;

                    if status == NodeStatus::BlockSynced {
                        self.reconcile_mempool(block_db, mempool, &to_remove_hashes, &to_add)?;
                    }
                }
                Err(StageFailure::Validation { hash, error }) => {
                    bitd_log::log_warn!(
                        "block {} failed validation: {}",
                        hash256_to_hex(&hash),
                        error
                    );
                    self.utxo_index.rollback();
                    self.set_status_now(&hash, BlockStatus::Invalid)?;
                    self.block_index.discard_candidate(&candidate_hash);
                }
                Err(StageFailure::Fatal(error)) => {
                    self.utxo_index.rollback();
                    return Err(error);
                }
            }
        }
    }

    /// Stages the whole batch on the overlay: disconnects tip to root, then
    /// connects root to tip with per-block verification. Returns the undo
    /// records generated for the connected blocks. Nothing durable happens
    /// here.
    fn stage_reorg(
        &mut self,
        to_add: &[(Hash256, Block)],
        rev_blocks: &[RevBlock],
        params: &ChainParams,
    ) -> Result<Vec<RevBlock>, StageFailure> {
        // undo data we generated ourselves; failure here is corruption
        for rev_block in rev_blocks.iter().rev() {
            self.utxo_index
                .apply_rev_block(rev_block)
                .map_err(StageFailure::Fatal)?;
        }

        let mut generated = Vec::with_capacity(to_add.len());
        for (hash, block) in to_add {
            let (tx_data, rev_block) = self
                .utxo_index
                .add_block(block)
                .map_err(|error| classify(error, hash))?;

            let info = self
                .block_index
                .get_block_info(hash)
                .ok_or(StageFailure::Fatal(ChainstateError::UnknownBlock))?;
            check_transactions(block, &tx_data, info.height, &params.consensus)
                .map_err(|error| classify(error, hash))?;

            self.block_index
                .insert_block_info(info.with_status(BlockStatus::Valid), None)
                .map_err(StageFailure::Fatal)?;
            generated.push(rev_block);
        }
        Ok(generated)
    }

    fn set_status(
        &mut self,
        hash: &Hash256,
        status: BlockStatus,
        batch: &mut WriteBatch,
    ) -> Result<(), ChainstateError> {
        let info = self
            .block_index
            .get_block_info(hash)
            .ok_or(ChainstateError::UnknownBlock)?;
        self.block_index
            .insert_block_info(info.with_status(status), Some(batch))
    }

    fn set_status_now(
        &mut self,
        hash: &Hash256,
        status: BlockStatus,
    ) -> Result<(), ChainstateError> {
        let info = self
            .block_index
            .get_block_info(hash)
            .ok_or(ChainstateError::UnknownBlock)?;
        self.block_index.insert_block_info(info.with_status(status), None)
    }

    /// Re-offers transactions from disconnected blocks and evicts the ones
    /// a connected block confirmed.
    fn reconcile_mempool<M: MempoolHooks>(
        &self,
        block_db: &BlockDb<S>,
        mempool: &mut M,
        disconnected: &[Hash256],
        connected: &[(Hash256, Block)],
    ) -> Result<(), ChainstateError> {
        for hash in disconnected {
            let Some(block) = block_db.get_block(hash)? else {
                continue;
            };
            for tx in block.transactions.into_iter().skip(1) {
                mempool.add_tx(tx);
            }
        }
        for (_, block) in connected {
            for tx in &block.transactions {
                mempool.remove_tx(&tx.txid());
            }
        }
        Ok(())
    }
}

fn classify(error: ChainstateError, hash: &Hash256) -> StageFailure {
    if error.is_validation_failure() {
        StageFailure::Validation { hash: *hash, error }
    } else {
        StageFailure::Fatal(error)
    }
}
