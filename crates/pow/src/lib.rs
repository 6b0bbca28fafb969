//! Compact-difficulty decoding and cumulative-work arithmetic.

pub mod work;

pub use work::{
    block_proof, compact_to_u256, hash_meets_target, u256_to_compact, CompactError,
};
