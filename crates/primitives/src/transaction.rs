//! Transaction types with segwit-aware consensus serialization.

use bitd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.vin.iter().any(|input| !input.witness.is_empty())
    }

    /// Transaction id: double hash of the serialization without witness data.
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.encode_with_mode(false))
    }

    /// Witness transaction id: double hash of the full serialization.
    pub fn wtxid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        self.encode_with_mode(self.has_witness())
    }

    pub fn consensus_encode_base(&self) -> Vec<u8> {
        self.encode_with_mode(false)
    }

    fn encode_with_mode(&self, include_witness: bool) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        if include_witness {
            encoder.write_u8(SEGWIT_MARKER);
            encoder.write_u8(SEGWIT_FLAG);
        }
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.prevout.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&input.script_sig);
            encoder.write_u32_le(input.sequence);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(&mut encoder);
        }
        if include_witness {
            for input in &self.vin {
                encoder.write_varint(input.witness.len() as u64);
                for item in &input.witness {
                    encoder.write_var_bytes(item);
                }
            }
        }
        encoder.write_u32_le(self.lock_time);
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::consensus_decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(tx)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;

        let mut vin_count = decoder.read_varint()?;
        let mut segwit = false;
        if vin_count == 0 {
            // empty vin means a segwit marker; the flag byte must follow
            let flag = decoder.read_u8()?;
            if flag != SEGWIT_FLAG {
                return Err(DecodeError::InvalidData("invalid segwit flag"));
            }
            segwit = true;
            vin_count = decoder.read_varint()?;
        }

        let vin_count = usize::try_from(vin_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            let prevout = OutPoint::consensus_decode(decoder)?;
            let script_sig = decoder.read_var_bytes()?;
            let sequence = decoder.read_u32_le()?;
            vin.push(TxIn {
                prevout,
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let vout_count = decoder.read_varint()?;
        let vout_count = usize::try_from(vout_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }

        if segwit {
            for input in vin.iter_mut() {
                let item_count = decoder.read_varint()?;
                let item_count =
                    usize::try_from(item_count).map_err(|_| DecodeError::SizeTooLarge)?;
                let mut witness = Vec::with_capacity(item_count);
                for _ in 0..item_count {
                    witness.push(decoder.read_var_bytes()?);
                }
                input.witness = witness;
            }
            if !vin.is_empty() && vin.iter().all(|input| input.witness.is_empty()) {
                return Err(DecodeError::InvalidData("segwit marker without witness"));
            }
        }

        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(witness: Vec<Vec<u8>>) -> Transaction {
        Transaction {
            version: 2,
            vin: vec![TxIn {
                prevout: OutPoint::new([7u8; 32], 1),
                script_sig: vec![0x51],
                sequence: 0xffff_fffe,
                witness,
            }],
            vout: vec![TxOut {
                value: 4_999_000_000,
                script_pubkey: vec![0x76, 0xa9, 0x14],
            }],
            lock_time: 101,
        }
    }

    #[test]
    fn legacy_round_trip() {
        let tx = sample_tx(Vec::new());
        let bytes = tx.consensus_encode();
        let decoded = Transaction::consensus_decode(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), decoded.wtxid());
    }

    #[test]
    fn segwit_round_trip() {
        let tx = sample_tx(vec![vec![0x01, 0x02], vec![0x03]]);
        let bytes = tx.consensus_encode();
        assert_eq!(bytes[4], SEGWIT_MARKER);
        assert_eq!(bytes[5], SEGWIT_FLAG);
        let decoded = Transaction::consensus_decode(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_ne!(decoded.txid(), decoded.wtxid());
    }

    #[test]
    fn txid_ignores_witness() {
        let legacy = sample_tx(Vec::new());
        let segwit = sample_tx(vec![vec![0xaa]]);
        assert_eq!(legacy.txid(), segwit.txid());
    }

    #[test]
    fn coinbase_detection() {
        let mut tx = sample_tx(Vec::new());
        assert!(!tx.is_coinbase());
        tx.vin[0].prevout = OutPoint::null();
        assert!(tx.is_coinbase());
    }
}
