//! Content-addressed block and undo-record storage.
//!
//! Blocks land here as soon as the downloader receives them; undo records
//! are staged into the reorg commit batch so they become durable in the
//! same write as the chain state they belong to.

use std::sync::Arc;

use bitd_consensus::Hash256;
use bitd_primitives::block::Block;
use bitd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::ChainstateError;
use crate::undo::RevBlock;

pub struct BlockDb<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> BlockDb<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn add_block(&self, block: &Block) -> Result<(), ChainstateError> {
        let hash = block.header.hash();
        self.store
            .put(Column::Block, &hash, &block.consensus_encode())?;
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainstateError> {
        match self.store.get(Column::Block, hash)? {
            Some(bytes) => Ok(Some(Block::consensus_decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool, ChainstateError> {
        Ok(self.store.get(Column::Block, hash)?.is_some())
    }

    pub fn stage_rev_block(&self, batch: &mut WriteBatch, rev_block: &RevBlock) {
        batch.put(Column::RevBlock, rev_block.hash, rev_block.encode());
    }

    pub fn get_rev_block(&self, hash: &Hash256) -> Result<Option<RevBlock>, ChainstateError> {
        match self.store.get(Column::RevBlock, hash)? {
            Some(bytes) => Ok(Some(RevBlock::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
