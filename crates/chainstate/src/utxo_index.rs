//! UTXO set with a staged in-memory overlay over the durable store.
//!
//! All mutation goes through the overlay: `removed` stages deletions,
//! `updated` stages inserts. `finalize` moves the whole overlay into one
//! write batch; `rollback` discards it. No key may sit in both sides at
//! once; hitting that means a double spend slipped through and the batch
//! must die.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitd_primitives::block::Block;
use bitd_primitives::encoding::{decode, encode, DecodeError, Decoder, Encoder};
use bitd_primitives::outpoint::OutPoint;
use bitd_primitives::transaction::TxOut;
use bitd_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::ChainstateError;
use crate::undo::RevBlock;

/// Database key for one unspent output: txid followed by the compact-size
/// output index.
pub fn outpoint_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut encoder = Encoder::new();
    write_outpoint(&mut encoder, outpoint);
    encoder.into_inner()
}

pub(crate) fn write_outpoint(encoder: &mut Encoder, outpoint: &OutPoint) {
    encoder.write_hash_le(&outpoint.txid);
    encoder.write_varint(outpoint.vout as u64);
}

pub(crate) fn read_outpoint(decoder: &mut Decoder) -> Result<OutPoint, DecodeError> {
    let txid = decoder.read_hash_le()?;
    let vout = decoder.read_varint()?;
    let vout = u32::try_from(vout).map_err(|_| DecodeError::SizeTooLarge)?;
    Ok(OutPoint::new(txid, vout))
}

/// Previous outputs resolved for one transaction, in `vin` order, paired
/// with the transaction's position in its block.
#[derive(Clone, Debug)]
pub struct TxPrevouts {
    pub tx_index: usize,
    pub prev_outs: Vec<TxOut>,
}

pub struct UtxoIndex<S> {
    store: Arc<S>,
    removed: HashSet<Vec<u8>>,
    updated: HashMap<Vec<u8>, TxOut>,
}

impl<S: KeyValueStore> UtxoIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            removed: HashSet::new(),
            updated: HashMap::new(),
        }
    }

    pub fn overlay_is_empty(&self) -> bool {
        self.removed.is_empty() && self.updated.is_empty()
    }

    /// Reads an unspent output from the durable store, ignoring the overlay.
    pub fn utxo_entry(&self, outpoint: &OutPoint) -> Result<Option<TxOut>, ChainstateError> {
        let key = outpoint_key(outpoint);
        match self.store.get(Column::Utxo, &key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn stage_create(&mut self, key: Vec<u8>, output: TxOut) -> Result<(), ChainstateError> {
        if self.removed.contains(&key) {
            return Err(ChainstateError::OverlayConflict);
        }
        self.updated.insert(key, output);
        Ok(())
    }

    /// Stages one block's transactions on top of the overlay. Returns the
    /// resolved previous outputs of every non-coinbase transaction (for the
    /// verifier) and the undo record needed to disconnect the block later.
    pub fn add_block(
        &mut self,
        block: &Block,
    ) -> Result<(Vec<TxPrevouts>, RevBlock), ChainstateError> {
        let coinbase = block
            .transactions
            .first()
            .ok_or(ChainstateError::InvariantViolation("block without coinbase"))?;

        let mut spent: Vec<(OutPoint, TxOut)> = Vec::new();
        let mut created: Vec<OutPoint> = Vec::new();
        let mut tx_data: Vec<TxPrevouts> = Vec::with_capacity(block.transactions.len() - 1);

        let coinbase_txid = coinbase.txid();
        for (vout, output) in coinbase.vout.iter().enumerate() {
            let outpoint = OutPoint::new(coinbase_txid, vout as u32);
            self.stage_create(outpoint_key(&outpoint), output.clone())?;
            created.push(outpoint);
        }

        for (tx_index, tx) in block.transactions.iter().enumerate().skip(1) {
            let txid = tx.txid();
            let mut prev_outs = Vec::with_capacity(tx.vin.len());

            for input in &tx.vin {
                let key = outpoint_key(&input.prevout);
                if self.removed.contains(&key) {
                    return Err(ChainstateError::DoubleSpend);
                }
                let output = if let Some(output) = self.updated.remove(&key) {
                    output
                } else if let Some(bytes) = self.store.get(Column::Utxo, &key)? {
                    self.removed.insert(key);
                    decode(&bytes)?
                } else {
                    return Err(ChainstateError::MissingPrevout);
                };
                spent.push((input.prevout.clone(), output.clone()));
                prev_outs.push(output);
            }

            for (vout, output) in tx.vout.iter().enumerate() {
                let outpoint = OutPoint::new(txid, vout as u32);
                self.stage_create(outpoint_key(&outpoint), output.clone())?;
                created.push(outpoint);
            }

            tx_data.push(TxPrevouts {
                tx_index,
                prev_outs,
            });
        }

        let rev_block = RevBlock {
            hash: block.header.hash(),
            to_add: spent,
            to_remove: created,
        };
        Ok((tx_data, rev_block))
    }

    /// Inverse of `add_block`: deletes the outputs the block created and
    /// restores the ones it spent.
    pub fn apply_rev_block(&mut self, rev_block: &RevBlock) -> Result<(), ChainstateError> {
        for outpoint in &rev_block.to_remove {
            let key = outpoint_key(outpoint);
            if self.removed.contains(&key) {
                return Err(ChainstateError::OverlayConflict);
            }
            if self.updated.remove(&key).is_none() {
                if self.store.get(Column::Utxo, &key)?.is_some() {
                    self.removed.insert(key);
                } else {
                    return Err(ChainstateError::MissingPrevout);
                }
            }
        }

        for (outpoint, output) in &rev_block.to_add {
            self.stage_create(outpoint_key(outpoint), output.clone())?;
        }
        Ok(())
    }

    /// Moves the overlay into `batch`, deletions before insertions, and
    /// clears it. Atomicity is the batch's concern.
    pub fn finalize(&mut self, batch: &mut WriteBatch) {
        for key in self.removed.drain() {
            batch.delete(Column::Utxo, key);
        }
        for (key, output) in self.updated.drain() {
            batch.put(Column::Utxo, key, encode(&output));
        }
    }

    /// Discards the overlay without touching the durable store.
    pub fn rollback(&mut self) {
        self.removed.clear();
        self.updated.clear();
    }
}
