//! Parallel transaction verification with height-activated consensus rules.

use bitd_consensus::ConsensusParams;
use bitd_primitives::block::Block;
use bitd_script::{
    verify_input, ScriptFlags, SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY,
    SCRIPT_VERIFY_CHECKSEQUENCEVERIFY, SCRIPT_VERIFY_DERSIG, SCRIPT_VERIFY_NONE,
    SCRIPT_VERIFY_NULLDUMMY, SCRIPT_VERIFY_P2SH, SCRIPT_VERIFY_TAPROOT, SCRIPT_VERIFY_WITNESS,
    SCRIPT_VERIFY_WITNESS_PUBKEYTYPE,
};
use rayon::prelude::*;

use crate::error::ChainstateError;
use crate::utxo_index::TxPrevouts;

/// Consensus script rules active for a block at `height`.
pub fn script_flags_at_height(height: u32, params: &ConsensusParams) -> ScriptFlags {
    let deployments = &params.deployments;
    let mut flags = SCRIPT_VERIFY_NONE;
    if height >= deployments.p2sh_height {
        flags |= SCRIPT_VERIFY_P2SH;
    }
    if height >= deployments.dersig_height {
        flags |= SCRIPT_VERIFY_DERSIG;
    }
    if height >= deployments.cltv_height {
        flags |= SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;
    }
    if height >= deployments.csv_height {
        flags |= SCRIPT_VERIFY_CHECKSEQUENCEVERIFY;
    }
    if height >= deployments.segwit_height {
        flags |= SCRIPT_VERIFY_WITNESS | SCRIPT_VERIFY_WITNESS_PUBKEYTYPE | SCRIPT_VERIFY_NULLDUMMY;
    }
    if height >= deployments.taproot_height {
        flags |= SCRIPT_VERIFY_TAPROOT;
    }
    flags
}

/// Validates every input of the staged transactions, fanned out over the
/// rayon worker pool as independent `(transaction, input)` units. The batch
/// is a fork/join barrier: the first failing unit aborts the whole step.
pub fn check_transactions(
    block: &Block,
    tx_data: &[TxPrevouts],
    height: u32,
    params: &ConsensusParams,
) -> Result<(), ChainstateError> {
    if tx_data.is_empty() {
        return Ok(());
    }

    for data in tx_data {
        let tx = block
            .transactions
            .get(data.tx_index)
            .ok_or(ChainstateError::PrevoutMismatch)?;
        if data.prev_outs.len() != tx.vin.len() {
            return Err(ChainstateError::PrevoutMismatch);
        }
    }

    let flags = script_flags_at_height(height, params);
    let units: Vec<(usize, usize)> = tx_data
        .iter()
        .enumerate()
        .flat_map(|(slot, data)| (0..data.prev_outs.len()).map(move |input| (slot, input)))
        .collect();

    units.par_iter().try_for_each(|&(slot, input)| {
        let data = &tx_data[slot];
        let tx = &block.transactions[data.tx_index];
        verify_input(&data.prev_outs, tx, input, flags).map_err(ChainstateError::Script)
    })
}

#[cfg(test)]
mod tests {
    use bitd_consensus::{chain_params, Network};
    use bitd_primitives::block::BlockHeader;
    use bitd_primitives::outpoint::OutPoint;
    use bitd_primitives::transaction::{Transaction, TxIn, TxOut};
    use bitd_script::SCRIPT_VERIFY_CLEANSTACK;

    use super::*;

    #[test]
    fn mainnet_flags_follow_deployment_schedule() {
        let params = chain_params(Network::Mainnet).consensus;
        assert_eq!(script_flags_at_height(0, &params), SCRIPT_VERIFY_NONE);
        let after_p2sh = script_flags_at_height(200_000, &params);
        assert_ne!(after_p2sh & SCRIPT_VERIFY_P2SH, 0);
        assert_eq!(after_p2sh & SCRIPT_VERIFY_DERSIG, 0);
        let after_segwit = script_flags_at_height(500_000, &params);
        assert_ne!(after_segwit & SCRIPT_VERIFY_WITNESS, 0);
        assert_ne!(after_segwit & SCRIPT_VERIFY_CHECKSEQUENCEVERIFY, 0);
        assert_eq!(after_segwit & SCRIPT_VERIFY_TAPROOT, 0);
        assert_eq!(after_segwit & SCRIPT_VERIFY_CLEANSTACK, 0);
    }

    #[test]
    fn regtest_rules_always_on() {
        let params = chain_params(Network::Regtest).consensus;
        let flags = script_flags_at_height(1, &params);
        assert_ne!(flags & SCRIPT_VERIFY_P2SH, 0);
        assert_ne!(flags & SCRIPT_VERIFY_WITNESS, 0);
        assert_ne!(flags & SCRIPT_VERIFY_TAPROOT, 0);
    }

    fn block_with_spend(script_pubkey: Vec<u8>, script_sig: Vec<u8>) -> (Block, Vec<TxPrevouts>) {
        let spend = Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::new([1u8; 32], 0),
                script_sig,
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            vout: vec![TxOut {
                value: 1,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        let coinbase = Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: vec![0x01, 0x01],
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 1,
                bits: 0x207fffff,
                nonce: 0,
            },
            transactions: vec![coinbase, spend],
        };
        let tx_data = vec![TxPrevouts {
            tx_index: 1,
            prev_outs: vec![TxOut {
                value: 2,
                script_pubkey,
            }],
        }];
        (block, tx_data)
    }

    #[test]
    fn accepts_trivially_spendable_output() {
        let params = chain_params(Network::Regtest).consensus;
        let (block, tx_data) = block_with_spend(vec![0x51], Vec::new());
        check_transactions(&block, &tx_data, 1, &params).expect("valid batch");
    }

    #[test]
    fn failing_unit_aborts_batch() {
        let params = chain_params(Network::Regtest).consensus;
        // OP_RETURN output can never be spent
        let (block, tx_data) = block_with_spend(vec![0x6a], Vec::new());
        assert!(matches!(
            check_transactions(&block, &tx_data, 1, &params),
            Err(ChainstateError::Script(_))
        ));
    }

    #[test]
    fn prevout_count_mismatch_rejected_before_dispatch() {
        let params = chain_params(Network::Regtest).consensus;
        let (block, mut tx_data) = block_with_spend(vec![0x51], Vec::new());
        tx_data[0].prev_outs.push(TxOut {
            value: 1,
            script_pubkey: vec![0x51],
        });
        assert!(matches!(
            check_transactions(&block, &tx_data, 1, &params),
            Err(ChainstateError::PrevoutMismatch)
        ));
    }
}
