//! Undo records: the minimal data needed to reverse one block's effect on
//! the UTXO set.

use bitd_consensus::Hash256;
use bitd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use bitd_primitives::outpoint::OutPoint;
use bitd_primitives::transaction::TxOut;

use crate::utxo_index::{read_outpoint, write_outpoint};

/// Generated when a block is applied and persisted alongside it. `to_add`
/// holds the outputs the block spent (restored on disconnect); `to_remove`
/// the outpoints it created (deleted on disconnect).
#[derive(Clone, Debug, PartialEq)]
pub struct RevBlock {
    pub hash: Hash256,
    pub to_add: Vec<(OutPoint, TxOut)>,
    pub to_remove: Vec<OutPoint>,
}

impl RevBlock {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_hash_le(&self.hash);
        encoder.write_varint(self.to_add.len() as u64);
        for (outpoint, output) in &self.to_add {
            write_outpoint(&mut encoder, outpoint);
            output.consensus_encode(&mut encoder);
        }
        encoder.write_varint(self.to_remove.len() as u64);
        for outpoint in &self.to_remove {
            write_outpoint(&mut encoder, outpoint);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let hash = decoder.read_hash_le()?;

        let add_count = decoder.read_varint()?;
        let add_count = usize::try_from(add_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut to_add = Vec::with_capacity(add_count);
        for _ in 0..add_count {
            let outpoint = read_outpoint(&mut decoder)?;
            let output = TxOut::consensus_decode(&mut decoder)?;
            to_add.push((outpoint, output));
        }

        let remove_count = decoder.read_varint()?;
        let remove_count = usize::try_from(remove_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut to_remove = Vec::with_capacity(remove_count);
        for _ in 0..remove_count {
            to_remove.push(read_outpoint(&mut decoder)?);
        }

        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            hash,
            to_add,
            to_remove,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let rev_block = RevBlock {
            hash: [0xaa; 32],
            to_add: vec![
                (
                    OutPoint::new([1u8; 32], 0),
                    TxOut {
                        value: 5_000_000_000,
                        script_pubkey: vec![0x76, 0xa9],
                    },
                ),
                (
                    OutPoint::new([2u8; 32], 300),
                    TxOut {
                        value: 0,
                        script_pubkey: Vec::new(),
                    },
                ),
            ],
            to_remove: vec![OutPoint::new([3u8; 32], 1), OutPoint::new([4u8; 32], 0)],
        };
        let decoded = RevBlock::decode(&rev_block.encode()).expect("round trip");
        assert_eq!(decoded, rev_block);
    }

    #[test]
    fn empty_lists_round_trip() {
        let rev_block = RevBlock {
            hash: [0u8; 32],
            to_add: Vec::new(),
            to_remove: Vec::new(),
        };
        let decoded = RevBlock::decode(&rev_block.encode()).expect("round trip");
        assert_eq!(decoded, rev_block);
        assert_eq!(rev_block.encode().len(), 34);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let rev_block = RevBlock {
            hash: [1u8; 32],
            to_add: Vec::new(),
            to_remove: Vec::new(),
        };
        let mut bytes = rev_block.encode();
        bytes.push(0);
        assert!(RevBlock::decode(&bytes).is_err());
    }
}
