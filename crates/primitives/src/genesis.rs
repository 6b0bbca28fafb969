//! Reconstruction of a network's genesis block from its parameters.

use bitd_consensus::GenesisParams;

use crate::block::{Block, BlockHeader};
use crate::outpoint::OutPoint;
use crate::transaction::{Transaction, TxIn, TxOut};

const COINBASE_MESSAGE: &[u8] =
    b"The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

// Satoshi's uncompressed public key from the genesis coinbase output.
const GENESIS_PUBKEY: [u8; 65] = [
    0x04, 0x67, 0x8a, 0xfd, 0xb0, 0xfe, 0x55, 0x48, 0x27, 0x19, 0x67, 0xf1, 0xa6, 0x71, 0x30,
    0xb7, 0x10, 0x5c, 0xd6, 0xa8, 0x28, 0xe0, 0x39, 0x09, 0xa6, 0x79, 0x62, 0xe0, 0xea, 0x1f,
    0x61, 0xde, 0xb6, 0x49, 0xf6, 0xbc, 0x3f, 0x4c, 0xef, 0x38, 0xc4, 0xf3, 0x55, 0x04, 0xe5,
    0x1e, 0xc1, 0x12, 0xde, 0x5c, 0x38, 0x4d, 0xf7, 0xba, 0x0b, 0x8d, 0x57, 0x8a, 0x4c, 0x70,
    0x2b, 0x6b, 0xf1, 0x1d, 0x5f,
];

const OP_CHECKSIG: u8 = 0xac;

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

/// All Bitcoin networks share the same genesis coinbase, including the
/// 0x1d00ffff difficulty bytes in the script signature.
pub fn genesis_block(params: &GenesisParams) -> Block {
    let mut script_sig = Vec::with_capacity(77);
    push_data(&mut script_sig, &0x1d00ffffu32.to_le_bytes());
    push_data(&mut script_sig, &[0x04]);
    push_data(&mut script_sig, COINBASE_MESSAGE);

    let mut script_pubkey = Vec::with_capacity(67);
    push_data(&mut script_pubkey, &GENESIS_PUBKEY);
    script_pubkey.push(OP_CHECKSIG);

    let coinbase = Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vout: vec![TxOut {
            value: params.reward,
            script_pubkey,
        }],
        lock_time: 0,
    };

    let merkle_root = coinbase.txid();
    let header = BlockHeader {
        version: params.version,
        prev_block: [0u8; 32],
        merkle_root,
        time: params.time,
        bits: params.bits,
        nonce: params.nonce,
    };

    Block {
        header,
        transactions: vec![coinbase],
    }
}
