//! Chain-state engine: header tree with cumulative-work fork choice, staged
//! UTXO set, and the reorganization driver that keeps the two consistent.

pub mod block_index;
pub mod block_info;
pub mod blockdb;
pub mod chain;
pub mod error;
pub mod undo;
pub mod utxo_index;
pub mod verify;

pub use block_index::BlockIndex;
pub use block_info::{BlockInfo, BlockStatus};
pub use blockdb::BlockDb;
pub use chain::{Chainstate, MempoolHooks};
pub use error::ChainstateError;
pub use undo::RevBlock;
pub use utxo_index::{outpoint_key, TxPrevouts, UtxoIndex};
