//! Block header and block types.

use bitd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::Transaction;

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Block identity: double hash of the 80-byte serialization.
    pub fn hash(&self) -> Hash256 {
        sha256d(&crate::encoding::encode(self))
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode(&mut encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            encoder.write_bytes(&tx.consensus_encode());
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode(&mut decoder)?;
        let count = decoder.read_varint()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::consensus_decode_from(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    pub fn merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(&txids)
    }
}

/// Pairwise double-hash merkle tree; an odd level duplicates its last entry.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut concat = [0u8; 64];
            concat[..32].copy_from_slice(&left);
            concat[32..].copy_from_slice(&right);
            next.push(sha256d(&concat));
        }
        level = next;
    }
    level[0]
}
