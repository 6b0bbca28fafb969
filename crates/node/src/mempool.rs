//! Transaction pool keyed by txid, plus mempool acceptance checks.

use std::collections::HashMap;

use bitd_chainstate::verify::script_flags_at_height;
use bitd_chainstate::{Chainstate, ChainstateError, MempoolHooks};
use bitd_consensus::{ChainParams, Hash256};
use bitd_primitives::transaction::{Transaction, TxOut};
use bitd_script::verify_input;
use bitd_storage::KeyValueStore;

#[derive(Default)]
pub struct Mempool {
    transactions: HashMap<Hash256, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.transactions.contains_key(txid)
    }

    pub fn get_tx(&self, txid: &Hash256) -> Option<&Transaction> {
        self.transactions.get(txid)
    }

    /// Txids we have not seen yet, in announcement order.
    pub fn get_missing(&self, txids: &[Hash256]) -> Vec<Hash256> {
        txids
            .iter()
            .filter(|txid| !self.transactions.contains_key(*txid))
            .copied()
            .collect()
    }
}

impl MempoolHooks for Mempool {
    fn add_tx(&mut self, tx: Transaction) {
        self.transactions.insert(tx.txid(), tx);
    }

    fn remove_tx(&mut self, txid: &Hash256) {
        self.transactions.remove(txid);
    }
}

/// Admission check for an unconfirmed transaction: every input must spend
/// a confirmed output or another mempool transaction, and scripts must
/// verify under the rules of the next block height.
pub fn verify_mempool_acceptance<S: KeyValueStore>(
    chainstate: &Chainstate<S>,
    mempool: &Mempool,
    tx: &Transaction,
    params: &ChainParams,
) -> Result<(), ChainstateError> {
    let mut prev_outs: Vec<TxOut> = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if let Some(output) = chainstate.utxo_index.utxo_entry(&input.prevout)? {
            prev_outs.push(output);
        } else if let Some(previous) = mempool.get_tx(&input.prevout.txid) {
            let output = previous
                .vout
                .get(input.prevout.vout as usize)
                .ok_or(ChainstateError::MissingPrevout)?;
            prev_outs.push(output.clone());
        } else {
            return Err(ChainstateError::MissingPrevout);
        }
    }

    let next_height = chainstate.block_index.height() + 1;
    let flags = script_flags_at_height(next_height, &params.consensus);
    for input_index in 0..tx.vin.len() {
        verify_input(&prev_outs, tx, input_index, flags)?;
    }
    Ok(())
}
