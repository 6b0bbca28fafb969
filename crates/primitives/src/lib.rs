//! Core block/transaction types and consensus serialization.

pub mod block;
pub mod encoding;
pub mod genesis;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{merkle_root, Block, BlockHeader};
pub use genesis::genesis_block;
pub use hash::{hash160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
