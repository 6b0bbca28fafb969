//! Script interpreter for the standard spend templates.
//!
//! Covers the opcode subset that real chain history exercises through
//! P2PK, P2PKH, P2SH, multisig, and v0 witness programs. Witness versions
//! above 0 are upgradable and verify as anyone-can-spend.

use bitd_primitives::hash::{hash160, sha256, sha256d};
use bitd_primitives::transaction::{Transaction, TxOut};
use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey};

use crate::secp::secp256k1_verify;
use crate::sighash::{
    signature_hash, SigVersion, SighashType, SIGHASH_NONE, SIGHASH_SINGLE,
};

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_DERSIG: ScriptFlags = 1 << 2;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: ScriptFlags = 1 << 9;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: ScriptFlags = 1 << 10;
pub const SCRIPT_VERIFY_WITNESS: ScriptFlags = 1 << 11;
pub const SCRIPT_VERIFY_WITNESS_PUBKEYTYPE: ScriptFlags = 1 << 12;
pub const SCRIPT_VERIFY_TAPROOT: ScriptFlags = 1 << 13;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1NEGATE: u8 = 0x4f;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_NOP: u8 = 0x61;
const OP_IF: u8 = 0x63;
const OP_NOTIF: u8 = 0x64;
const OP_ELSE: u8 = 0x67;
const OP_ENDIF: u8 = 0x68;
const OP_VERIFY: u8 = 0x69;
const OP_RETURN: u8 = 0x6a;
const OP_DROP: u8 = 0x75;
const OP_DUP: u8 = 0x76;
const OP_SWAP: u8 = 0x7c;
const OP_SIZE: u8 = 0x82;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_RIPEMD160: u8 = 0xa6;
const OP_SHA256: u8 = 0xa8;
const OP_HASH160: u8 = 0xa9;
const OP_HASH256: u8 = 0xaa;
const OP_CODESEPARATOR: u8 = 0xab;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKSIGVERIFY: u8 = 0xad;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
const OP_NOP1: u8 = 0xb0;
const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
const OP_NOP10: u8 = 0xb9;

const LOCKTIME_THRESHOLD: i64 = 500_000_000;
const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_MASK: u32 = 0x0000_ffff;

#[derive(Debug)]
pub enum ScriptError {
    InputIndexOutOfRange,
    PrevoutCountMismatch,
    StackUnderflow,
    EvalFalse,
    InvalidOpcode,
    SigEncoding,
    PubkeyEncoding,
    SigHashType,
    SigPushOnly,
    NullDummy,
    LockTime,
    Sequence,
    MinimalData,
    WitnessMalformed,
    WitnessUnexpected,
    Script(&'static str),
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::InputIndexOutOfRange => write!(f, "input index out of range"),
            ScriptError::PrevoutCountMismatch => {
                write!(f, "previous output count does not match inputs")
            }
            ScriptError::StackUnderflow => write!(f, "script stack underflow"),
            ScriptError::EvalFalse => write!(f, "script evaluated to false"),
            ScriptError::InvalidOpcode => write!(f, "invalid opcode"),
            ScriptError::SigEncoding => write!(f, "invalid signature encoding"),
            ScriptError::PubkeyEncoding => write!(f, "invalid public key encoding"),
            ScriptError::SigHashType => write!(f, "invalid sighash type"),
            ScriptError::SigPushOnly => write!(f, "scriptSig is not push-only"),
            ScriptError::NullDummy => write!(f, "null dummy element required"),
            ScriptError::LockTime => write!(f, "locktime check failed"),
            ScriptError::Sequence => write!(f, "sequence check failed"),
            ScriptError::MinimalData => write!(f, "non-minimal push"),
            ScriptError::WitnessMalformed => write!(f, "malformed witness"),
            ScriptError::WitnessUnexpected => write!(f, "unexpected witness data"),
            ScriptError::Script(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Validates one input of `tx` against its previous output. `prev_outs`
/// holds the resolved previous output of every input, in `vin` order.
pub fn verify_input(
    prev_outs: &[TxOut],
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    if prev_outs.len() != tx.vin.len() {
        return Err(ScriptError::PrevoutCountMismatch);
    }
    let prevout = prev_outs
        .get(input_index)
        .ok_or(ScriptError::InputIndexOutOfRange)?;
    verify_script(
        &tx.vin[input_index].script_sig,
        &prevout.script_pubkey,
        tx,
        input_index,
        prevout.value,
        flags,
    )
}

pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
    amount: i64,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    if input_index >= tx.vin.len() {
        return Err(ScriptError::InputIndexOutOfRange);
    }
    if (flags & SCRIPT_VERIFY_SIGPUSHONLY) != 0 && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let checker = SignatureChecker {
        tx,
        input_index,
        amount,
        flags,
    };

    let witness = &tx.vin[input_index].witness;
    let mut had_witness = false;

    let mut stack = Vec::new();
    eval_script(script_sig, &mut stack, &checker, SigVersion::Base)?;
    let stack_copy = stack.clone();
    eval_script(script_pubkey, &mut stack, &checker, SigVersion::Base)?;

    if stack.is_empty() || !cast_to_bool(stack.last().ok_or(ScriptError::StackUnderflow)?) {
        return Err(ScriptError::EvalFalse);
    }

    if (flags & SCRIPT_VERIFY_WITNESS) != 0 {
        if let Some((version, program)) = witness_program(script_pubkey) {
            had_witness = true;
            if !script_sig.is_empty() {
                return Err(ScriptError::WitnessMalformed);
            }
            verify_witness_program(version, program, witness, &checker)?;
        }
    }

    if (flags & SCRIPT_VERIFY_P2SH) != 0 && is_p2sh(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }
        let mut stack_copy = stack_copy;
        let redeem_script = stack_copy.pop().ok_or(ScriptError::StackUnderflow)?;
        stack = stack_copy;

        if (flags & SCRIPT_VERIFY_WITNESS) != 0 {
            if let Some((version, program)) = witness_program(&redeem_script) {
                had_witness = true;
                if !stack.is_empty() {
                    return Err(ScriptError::WitnessMalformed);
                }
                verify_witness_program(version, program, witness, &checker)?;
            }
        }

        if !had_witness {
            eval_script(&redeem_script, &mut stack, &checker, SigVersion::Base)?;
            if stack.is_empty()
                || !cast_to_bool(stack.last().ok_or(ScriptError::StackUnderflow)?)
            {
                return Err(ScriptError::EvalFalse);
            }
        }
    }

    if !had_witness && !witness.is_empty() {
        return Err(ScriptError::WitnessUnexpected);
    }

    if !had_witness
        && (flags & SCRIPT_VERIFY_CLEANSTACK) != 0
        && (stack.len() != 1 || !cast_to_bool(&stack[0]))
    {
        return Err(ScriptError::EvalFalse);
    }

    Ok(())
}

fn verify_witness_program(
    version: u8,
    program: &[u8],
    witness: &[Vec<u8>],
    checker: &SignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if version == 0 {
        match program.len() {
            20 => {
                // implicit P2PKH over the key hash
                if witness.len() != 2 {
                    return Err(ScriptError::WitnessMalformed);
                }
                let mut script_code = Vec::with_capacity(25);
                script_code.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
                script_code.extend_from_slice(program);
                script_code.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);

                let pubkey = &witness[1];
                if hash160(pubkey) != program[..20] {
                    return Err(ScriptError::EvalFalse);
                }
                if !checker.check_sig(&witness[0], pubkey, &script_code, SigVersion::WitnessV0)? {
                    return Err(ScriptError::EvalFalse);
                }
                Ok(())
            }
            32 => {
                let witness_script = witness.last().ok_or(ScriptError::WitnessMalformed)?;
                if sha256(witness_script) != program[..32] {
                    return Err(ScriptError::WitnessMalformed);
                }
                let mut stack: Vec<Vec<u8>> =
                    witness[..witness.len() - 1].to_vec();
                eval_script(witness_script, &mut stack, checker, SigVersion::WitnessV0)?;
                if stack.len() != 1 || !cast_to_bool(&stack[0]) {
                    return Err(ScriptError::EvalFalse);
                }
                Ok(())
            }
            _ => Err(ScriptError::WitnessMalformed),
        }
    } else {
        // upgradable witness versions, including v1 until taproot
        // validation lands, succeed without evaluation
        Ok(())
    }
}

struct SignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    amount: i64,
    flags: ScriptFlags,
}

impl<'a> SignatureChecker<'a> {
    fn check_sig(
        &self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
        script_code: &[u8],
        sigversion: SigVersion,
    ) -> Result<bool, ScriptError> {
        if sig_bytes.is_empty() {
            return Ok(false);
        }
        let sighash_type = *sig_bytes.last().ok_or(ScriptError::SigEncoding)? as u32;
        if (self.flags & SCRIPT_VERIFY_STRICTENC) != 0 {
            let base = sighash_type & 0x1f;
            if base != 0x01 && base != SIGHASH_NONE && base != SIGHASH_SINGLE {
                return Err(ScriptError::SigHashType);
            }
        }

        let strict_der =
            (self.flags & (SCRIPT_VERIFY_DERSIG | SCRIPT_VERIFY_STRICTENC | SCRIPT_VERIFY_LOW_S))
                != 0;
        let der = &sig_bytes[..sig_bytes.len() - 1];
        let sig = match Signature::from_der(der) {
            Ok(sig) => sig,
            Err(_) if strict_der => return Err(ScriptError::SigEncoding),
            Err(_) => {
                bitd_log::log_debug!("undecodable signature ({} bytes)", sig_bytes.len());
                return Ok(false);
            }
        };

        let mut normalized = sig;
        normalized.normalize_s();
        if (self.flags & SCRIPT_VERIFY_LOW_S) != 0 && normalized != sig {
            return Err(ScriptError::SigEncoding);
        }

        if (self.flags & (SCRIPT_VERIFY_STRICTENC | SCRIPT_VERIFY_WITNESS_PUBKEYTYPE)) != 0
            && !is_valid_pubkey_encoding(pubkey_bytes)
        {
            return Err(ScriptError::PubkeyEncoding);
        }
        if sigversion == SigVersion::WitnessV0
            && (self.flags & SCRIPT_VERIFY_WITNESS_PUBKEYTYPE) != 0
            && pubkey_bytes.len() != 33
        {
            return Err(ScriptError::PubkeyEncoding);
        }

        let pubkey = match PublicKey::from_slice(pubkey_bytes) {
            Ok(pubkey) => pubkey,
            Err(_) => return Ok(false),
        };

        let sighash = match signature_hash(
            self.tx,
            self.input_index,
            script_code,
            self.amount,
            SighashType(sighash_type),
            sigversion,
        ) {
            Ok(hash) => hash,
            Err(_) => return Ok(false),
        };

        let msg = match Message::from_digest_slice(&sighash) {
            Ok(msg) => msg,
            Err(_) => return Ok(false),
        };
        Ok(secp256k1_verify()
            .verify_ecdsa(&msg, &normalized, &pubkey)
            .is_ok())
    }

    fn check_lock_time(&self, lock_time: i64) -> Result<(), ScriptError> {
        let tx_lock_time = self.tx.lock_time as i64;
        let same_kind = (tx_lock_time < LOCKTIME_THRESHOLD) == (lock_time < LOCKTIME_THRESHOLD);
        if !same_kind {
            return Err(ScriptError::LockTime);
        }
        if lock_time > tx_lock_time {
            return Err(ScriptError::LockTime);
        }
        if self.tx.vin[self.input_index].sequence == u32::MAX {
            return Err(ScriptError::LockTime);
        }
        Ok(())
    }

    fn check_sequence(&self, sequence: i64) -> Result<(), ScriptError> {
        if self.tx.version < 2 {
            return Err(ScriptError::Sequence);
        }
        let tx_sequence = self.tx.vin[self.input_index].sequence;
        if tx_sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Err(ScriptError::Sequence);
        }
        let sequence = sequence as u32;
        if sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Ok(());
        }
        let mask = SEQUENCE_TYPE_FLAG | SEQUENCE_MASK;
        let masked_tx = tx_sequence & mask;
        let masked_stack = sequence & mask;
        let same_kind =
            (masked_tx & SEQUENCE_TYPE_FLAG) == (masked_stack & SEQUENCE_TYPE_FLAG);
        if !same_kind || (masked_stack & SEQUENCE_MASK) > (masked_tx & SEQUENCE_MASK) {
            return Err(ScriptError::Sequence);
        }
        Ok(())
    }
}

fn eval_script(
    script: &[u8],
    stack: &mut Vec<Vec<u8>>,
    checker: &SignatureChecker<'_>,
    sigversion: SigVersion,
) -> Result<(), ScriptError> {
    let mut cursor = 0usize;
    let mut script_code_start = 0usize;
    let mut exec_stack: Vec<bool> = Vec::new();

    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        let exec = exec_stack.iter().all(|v| *v);

        match opcode {
            OP_0 => {
                if exec {
                    stack.push(Vec::new());
                }
            }
            0x01..=0x4b => {
                let data = read_bytes(script, &mut cursor, opcode as usize)?;
                if exec {
                    push_checked(stack, data, opcode, checker.flags)?;
                }
            }
            OP_PUSHDATA1 => {
                let len = read_u8(script, &mut cursor)? as usize;
                let data = read_bytes(script, &mut cursor, len)?;
                if exec {
                    push_checked(stack, data, opcode, checker.flags)?;
                }
            }
            OP_PUSHDATA2 => {
                let len = read_u16(script, &mut cursor)? as usize;
                let data = read_bytes(script, &mut cursor, len)?;
                if exec {
                    push_checked(stack, data, opcode, checker.flags)?;
                }
            }
            OP_PUSHDATA4 => {
                let len = read_u32(script, &mut cursor)? as usize;
                let data = read_bytes(script, &mut cursor, len)?;
                if exec {
                    push_checked(stack, data, opcode, checker.flags)?;
                }
            }
            OP_1NEGATE => {
                if exec {
                    stack.push(script_num_to_vec(-1));
                }
            }
            OP_1..=OP_16 => {
                if exec {
                    stack.push(script_num_to_vec((opcode - OP_1 + 1) as i64));
                }
            }
            OP_IF | OP_NOTIF => {
                if exec {
                    let value = cast_to_bool(&pop(stack)?);
                    let branch = if opcode == OP_NOTIF { !value } else { value };
                    exec_stack.push(branch);
                } else {
                    exec_stack.push(false);
                }
            }
            OP_ELSE => {
                let current = exec_stack.pop().ok_or(ScriptError::InvalidOpcode)?;
                exec_stack.push(!current);
            }
            OP_ENDIF => {
                if exec_stack.pop().is_none() {
                    return Err(ScriptError::InvalidOpcode);
                }
            }
            OP_VERIFY => {
                if !exec {
                    continue;
                }
                if !cast_to_bool(&pop(stack)?) {
                    return Err(ScriptError::EvalFalse);
                }
            }
            OP_RETURN => {
                if exec {
                    return Err(ScriptError::Script("OP_RETURN encountered"));
                }
            }
            OP_DROP => {
                if !exec {
                    continue;
                }
                let _ = pop(stack)?;
            }
            OP_DUP => {
                if !exec {
                    continue;
                }
                let top = stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
                stack.push(top);
            }
            OP_SWAP => {
                if !exec {
                    continue;
                }
                let len = stack.len();
                if len < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                stack.swap(len - 1, len - 2);
            }
            OP_SIZE => {
                if !exec {
                    continue;
                }
                let len = stack.last().ok_or(ScriptError::StackUnderflow)?.len();
                stack.push(script_num_to_vec(len as i64));
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                if !exec {
                    continue;
                }
                let a = pop(stack)?;
                let b = pop(stack)?;
                let equal = a == b;
                if opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EvalFalse);
                    }
                } else {
                    stack.push(bool_to_vec(equal));
                }
            }
            OP_RIPEMD160 => {
                if !exec {
                    continue;
                }
                let data = pop(stack)?;
                let mut hasher = Ripemd160::new();
                hasher.update(data);
                stack.push(hasher.finalize().to_vec());
            }
            OP_SHA256 => {
                if !exec {
                    continue;
                }
                let data = pop(stack)?;
                stack.push(sha256(&data).to_vec());
            }
            OP_HASH160 => {
                if !exec {
                    continue;
                }
                let data = pop(stack)?;
                stack.push(hash160(&data).to_vec());
            }
            OP_HASH256 => {
                if !exec {
                    continue;
                }
                let data = pop(stack)?;
                stack.push(sha256d(&data).to_vec());
            }
            OP_CODESEPARATOR => {
                if exec {
                    script_code_start = cursor;
                }
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                if !exec {
                    continue;
                }
                let pubkey = pop(stack)?;
                let sig = pop(stack)?;
                let script_code = &script[script_code_start..];
                let ok = checker.check_sig(&sig, &pubkey, script_code, sigversion)?;
                if opcode == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::EvalFalse);
                    }
                } else {
                    stack.push(bool_to_vec(ok));
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                if !exec {
                    continue;
                }
                let key_count = script_num_from_vec(&pop(stack)?)?;
                if !(0..=20).contains(&key_count) {
                    return Err(ScriptError::Script("pubkey count out of range"));
                }
                let mut pubkeys = Vec::with_capacity(key_count as usize);
                for _ in 0..key_count {
                    pubkeys.push(pop(stack)?);
                }
                let sig_count = script_num_from_vec(&pop(stack)?)?;
                if sig_count < 0 || sig_count > key_count {
                    return Err(ScriptError::Script("signature count out of range"));
                }
                let mut sigs = Vec::with_capacity(sig_count as usize);
                for _ in 0..sig_count {
                    sigs.push(pop(stack)?);
                }
                // the famous off-by-one consumes one extra element
                let dummy = pop(stack)?;
                if (checker.flags & SCRIPT_VERIFY_NULLDUMMY) != 0 && !dummy.is_empty() {
                    return Err(ScriptError::NullDummy);
                }

                let script_code = &script[script_code_start..];
                let mut ok = true;
                let mut key_iter = pubkeys.into_iter();
                for sig in sigs {
                    let mut matched = false;
                    for pubkey in key_iter.by_ref() {
                        if checker.check_sig(&sig, &pubkey, script_code, sigversion)? {
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        ok = false;
                        break;
                    }
                }

                if opcode == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::EvalFalse);
                    }
                } else {
                    stack.push(bool_to_vec(ok));
                }
            }
            OP_CHECKLOCKTIMEVERIFY => {
                if !exec {
                    continue;
                }
                if (checker.flags & SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY) == 0 {
                    continue; // plain NOP2 before activation
                }
                let top = stack.last().ok_or(ScriptError::StackUnderflow)?;
                let lock_time = script_num_from_vec_n(top, 5)?;
                if lock_time < 0 {
                    return Err(ScriptError::LockTime);
                }
                checker.check_lock_time(lock_time)?;
            }
            OP_CHECKSEQUENCEVERIFY => {
                if !exec {
                    continue;
                }
                if (checker.flags & SCRIPT_VERIFY_CHECKSEQUENCEVERIFY) == 0 {
                    continue; // plain NOP3 before activation
                }
                let top = stack.last().ok_or(ScriptError::StackUnderflow)?;
                let sequence = script_num_from_vec_n(top, 5)?;
                if sequence < 0 {
                    return Err(ScriptError::Sequence);
                }
                checker.check_sequence(sequence)?;
            }
            OP_NOP | OP_NOP1 | 0xb3..=OP_NOP10 => {}
            _ => return Err(ScriptError::InvalidOpcode),
        }
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::Script("unbalanced conditional"));
    }
    Ok(())
}

fn push_checked(
    stack: &mut Vec<Vec<u8>>,
    data: Vec<u8>,
    opcode: u8,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_MINIMALDATA) != 0 && !is_minimal_push(&data, opcode) {
        return Err(ScriptError::MinimalData);
    }
    stack.push(data);
    Ok(())
}

fn is_minimal_push(data: &[u8], opcode: u8) -> bool {
    match data.len() {
        0 => opcode == OP_0,
        1 if data[0] >= 1 && data[0] <= 16 => false, // should use OP_1..OP_16
        1 if data[0] == 0x81 => false,               // should use OP_1NEGATE
        len if len <= 0x4b => opcode as usize == len,
        len if len <= 0xff => opcode == OP_PUSHDATA1,
        len if len <= 0xffff => opcode == OP_PUSHDATA2,
        _ => opcode == OP_PUSHDATA4,
    }
}

pub fn is_push_only(script: &[u8]) -> bool {
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        match opcode {
            OP_0 | OP_1NEGATE | OP_1..=OP_16 => {}
            0x01..=0x4b => cursor += opcode as usize,
            OP_PUSHDATA1 => match read_u8(script, &mut cursor) {
                Ok(len) => cursor += len as usize,
                Err(_) => return false,
            },
            OP_PUSHDATA2 => match read_u16(script, &mut cursor) {
                Ok(len) => cursor += len as usize,
                Err(_) => return false,
            },
            OP_PUSHDATA4 => match read_u32(script, &mut cursor) {
                Ok(len) => cursor += len as usize,
                Err(_) => return false,
            },
            _ => return false,
        }
    }
    cursor == script.len()
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Returns `(version, program)` when the script is a BIP141 witness program.
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    let push_len = script[1] as usize;
    if push_len < 2 || push_len > 40 || script.len() != push_len + 2 {
        return None;
    }
    Some((version, &script[2..]))
}

fn is_valid_pubkey_encoding(pubkey: &[u8]) -> bool {
    match pubkey.first() {
        Some(0x02) | Some(0x03) => pubkey.len() == 33,
        Some(0x04) => pubkey.len() == 65,
        _ => false,
    }
}

pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, byte) in data.iter().enumerate() {
        if *byte != 0 {
            // negative zero is false
            return !(i == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn bool_to_vec(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

fn script_num_to_vec(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().is_some_and(|byte| byte & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        if let Some(last) = out.last_mut() {
            *last |= 0x80;
        }
    }
    out
}

fn script_num_from_vec(data: &[u8]) -> Result<i64, ScriptError> {
    script_num_from_vec_n(data, 4)
}

fn script_num_from_vec_n(data: &[u8], max_len: usize) -> Result<i64, ScriptError> {
    if data.len() > max_len {
        return Err(ScriptError::Script("script number overflow"));
    }
    if data.is_empty() {
        return Ok(0);
    }
    let mut value: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        if i == data.len() - 1 {
            value |= ((byte & 0x7f) as i64) << (8 * i);
            if byte & 0x80 != 0 {
                value = -value;
            }
        } else {
            value |= (*byte as i64) << (8 * i);
        }
    }
    Ok(value)
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow)
}

fn read_u8(script: &[u8], cursor: &mut usize) -> Result<u8, ScriptError> {
    let byte = *script.get(*cursor).ok_or(ScriptError::InvalidOpcode)?;
    *cursor += 1;
    Ok(byte)
}

fn read_u16(script: &[u8], cursor: &mut usize) -> Result<u16, ScriptError> {
    let bytes = read_bytes(script, cursor, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(script: &[u8], cursor: &mut usize) -> Result<u32, ScriptError> {
    let bytes = read_bytes(script, cursor, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_bytes(script: &[u8], cursor: &mut usize, len: usize) -> Result<Vec<u8>, ScriptError> {
    if script.len().saturating_sub(*cursor) < len {
        return Err(ScriptError::InvalidOpcode);
    }
    let out = script[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(out)
}
