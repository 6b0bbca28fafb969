//! Script verification and signature hashing.

pub mod interpreter;
mod secp;
pub mod sighash;

pub use interpreter::{
    verify_input, verify_script, ScriptError, ScriptFlags, SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY,
    SCRIPT_VERIFY_CHECKSEQUENCEVERIFY, SCRIPT_VERIFY_CLEANSTACK, SCRIPT_VERIFY_DERSIG,
    SCRIPT_VERIFY_LOW_S, SCRIPT_VERIFY_MINIMALDATA, SCRIPT_VERIFY_NONE, SCRIPT_VERIFY_NULLDUMMY,
    SCRIPT_VERIFY_P2SH, SCRIPT_VERIFY_SIGPUSHONLY, SCRIPT_VERIFY_STRICTENC,
    SCRIPT_VERIFY_TAPROOT, SCRIPT_VERIFY_WITNESS, SCRIPT_VERIFY_WITNESS_PUBKEYTYPE,
};
pub use sighash::{SighashType, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE};
