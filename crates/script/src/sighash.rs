//! Signature hashing for transparent inputs, legacy and BIP143 forms.

use bitd_consensus::Hash256;
use bitd_primitives::encoding::{Encodable, Encoder};
use bitd_primitives::hash::sha256d;
use bitd_primitives::transaction::Transaction;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigVersion {
    Base,
    WitnessV0,
}

#[derive(Debug)]
pub enum SighashError {
    InputIndexOutOfRange,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
        }
    }
}

impl std::error::Error for SighashError {}

pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    sighash_type: SighashType,
    sigversion: SigVersion,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    match sigversion {
        SigVersion::Base => Ok(signature_hash_legacy(
            tx,
            input_index,
            script_code,
            sighash_type,
        )),
        SigVersion::WitnessV0 => Ok(signature_hash_witness_v0(
            tx,
            input_index,
            script_code,
            amount,
            sighash_type,
        )),
    }
}

fn signature_hash_legacy(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Hash256 {
    let base = sighash_type.base_type();

    // The original client hashes uint256(1) when SIGHASH_SINGLE points past
    // the outputs; signatures over it verify against nothing real.
    if base == SIGHASH_SINGLE && input_index >= tx.vout.len() {
        let mut one = [0u8; 32];
        one[0] = 1;
        return one;
    }

    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);

    if sighash_type.has_anyone_can_pay() {
        encoder.write_varint(1);
        serialize_input(&mut encoder, tx, input_index, input_index, script_code, base);
    } else {
        encoder.write_varint(tx.vin.len() as u64);
        for i in 0..tx.vin.len() {
            serialize_input(&mut encoder, tx, i, input_index, script_code, base);
        }
    }

    match base {
        SIGHASH_NONE => {
            encoder.write_varint(0);
        }
        SIGHASH_SINGLE => {
            encoder.write_varint(input_index as u64 + 1);
            for (i, output) in tx.vout.iter().enumerate().take(input_index + 1) {
                if i == input_index {
                    output.consensus_encode(&mut encoder);
                } else {
                    // blank output: value -1, empty script
                    encoder.write_i64_le(-1);
                    encoder.write_varint(0);
                }
            }
        }
        _ => {
            encoder.write_varint(tx.vout.len() as u64);
            for output in &tx.vout {
                output.consensus_encode(&mut encoder);
            }
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);
    sha256d(&encoder.into_inner())
}

fn serialize_input(
    encoder: &mut Encoder,
    tx: &Transaction,
    index: usize,
    signing_index: usize,
    script_code: &[u8],
    base: u32,
) {
    let input = &tx.vin[index];
    input.prevout.consensus_encode(encoder);
    if index == signing_index {
        encoder.write_var_bytes(script_code);
        encoder.write_u32_le(input.sequence);
    } else {
        encoder.write_varint(0);
        // NONE and SINGLE let other inputs change their sequences
        let sequence = if base == SIGHASH_ALL {
            input.sequence
        } else {
            0
        };
        encoder.write_u32_le(sequence);
    }
}

fn signature_hash_witness_v0(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    sighash_type: SighashType,
) -> Hash256 {
    let base = sighash_type.base_type();
    let anyone_can_pay = sighash_type.has_anyone_can_pay();

    let hash_prevouts = if anyone_can_pay {
        [0u8; 32]
    } else {
        let mut encoder = Encoder::new();
        for input in &tx.vin {
            input.prevout.consensus_encode(&mut encoder);
        }
        sha256d(&encoder.into_inner())
    };

    let hash_sequence = if anyone_can_pay || base != SIGHASH_ALL {
        [0u8; 32]
    } else {
        let mut encoder = Encoder::new();
        for input in &tx.vin {
            encoder.write_u32_le(input.sequence);
        }
        sha256d(&encoder.into_inner())
    };

    let hash_outputs = if base == SIGHASH_SINGLE {
        if input_index < tx.vout.len() {
            let mut encoder = Encoder::new();
            tx.vout[input_index].consensus_encode(&mut encoder);
            sha256d(&encoder.into_inner())
        } else {
            [0u8; 32]
        }
    } else if base == SIGHASH_NONE {
        [0u8; 32]
    } else {
        let mut encoder = Encoder::new();
        for output in &tx.vout {
            output.consensus_encode(&mut encoder);
        }
        sha256d(&encoder.into_inner())
    };

    let input = &tx.vin[input_index];
    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);
    encoder.write_hash_le(&hash_prevouts);
    encoder.write_hash_le(&hash_sequence);
    input.prevout.consensus_encode(&mut encoder);
    encoder.write_var_bytes(script_code);
    encoder.write_i64_le(amount);
    encoder.write_u32_le(input.sequence);
    encoder.write_hash_le(&hash_outputs);
    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);
    sha256d(&encoder.into_inner())
}

#[cfg(test)]
mod tests {
    use bitd_primitives::outpoint::OutPoint;
    use bitd_primitives::transaction::{TxIn, TxOut};

    use super::*;

    fn two_in_two_out() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![
                TxIn {
                    prevout: OutPoint::new([1u8; 32], 0),
                    script_sig: Vec::new(),
                    sequence: u32::MAX,
                    witness: Vec::new(),
                },
                TxIn {
                    prevout: OutPoint::new([2u8; 32], 3),
                    script_sig: Vec::new(),
                    sequence: u32::MAX,
                    witness: Vec::new(),
                },
            ],
            vout: vec![
                TxOut {
                    value: 100,
                    script_pubkey: vec![0x51],
                },
                TxOut {
                    value: 200,
                    script_pubkey: vec![0x52],
                },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn rejects_out_of_range_input() {
        let tx = two_in_two_out();
        let result = signature_hash(
            &tx,
            5,
            &[0x51],
            0,
            SighashType(SIGHASH_ALL),
            SigVersion::Base,
        );
        assert!(result.is_err());
    }

    #[test]
    fn single_past_outputs_hashes_one() {
        let mut tx = two_in_two_out();
        tx.vout.truncate(1);
        let hash = signature_hash(
            &tx,
            1,
            &[0x51],
            0,
            SighashType(SIGHASH_SINGLE),
            SigVersion::Base,
        )
        .expect("in range");
        let mut one = [0u8; 32];
        one[0] = 1;
        assert_eq!(hash, one);
    }

    #[test]
    fn sighash_depends_on_input() {
        let tx = two_in_two_out();
        let first = signature_hash(
            &tx,
            0,
            &[0x51],
            0,
            SighashType(SIGHASH_ALL),
            SigVersion::Base,
        )
        .expect("in range");
        let second = signature_hash(
            &tx,
            1,
            &[0x51],
            0,
            SighashType(SIGHASH_ALL),
            SigVersion::Base,
        )
        .expect("in range");
        assert_ne!(first, second);
    }

    #[test]
    fn witness_differs_by_amount() {
        let tx = two_in_two_out();
        let a = signature_hash(
            &tx,
            0,
            &[0x51],
            100,
            SighashType(SIGHASH_ALL),
            SigVersion::WitnessV0,
        )
        .expect("in range");
        let b = signature_hash(
            &tx,
            0,
            &[0x51],
            200,
            SighashType(SIGHASH_ALL),
            SigVersion::WitnessV0,
        )
        .expect("in range");
        assert_ne!(a, b);
    }
}
