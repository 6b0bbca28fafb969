//! Transaction outpoint type.

use bitd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn null() -> Self {
        Self {
            txid: [0u8; 32],
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == [0u8; 32] && self.vout == u32::MAX
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.txid);
        encoder.write_u32_le(self.vout);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash_le()?;
        let vout = decoder.read_u32_le()?;
        Ok(Self { txid, vout })
    }
}
