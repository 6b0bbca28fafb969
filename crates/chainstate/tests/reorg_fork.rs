use std::sync::Arc;

use bitd_chainstate::{BlockDb, BlockStatus, Chainstate, MempoolHooks};
use bitd_consensus::{chain_params, ChainParams, Hash256, Network, NodeStatus};
use bitd_primitives::block::{merkle_root, Block, BlockHeader};
use bitd_primitives::outpoint::OutPoint;
use bitd_primitives::transaction::{Transaction, TxIn, TxOut};
use bitd_storage::memory::MemoryStore;
use bitd_storage::Column;

fn regtest() -> ChainParams {
    chain_params(Network::Regtest)
}

fn make_tx(vin: Vec<TxIn>, vout: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        vin,
        vout,
        lock_time: 0,
    }
}

fn coinbase_tx(height: u32, tag: u8) -> Transaction {
    make_tx(
        vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: [height.to_le_bytes().as_slice(), &[tag]].concat(),
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vec![TxOut {
            value: 50,
            script_pubkey: vec![0x51],
        }],
    )
}

fn spend_tx(prevout: OutPoint, value: i64) -> Transaction {
    make_tx(
        vec![TxIn {
            prevout,
            script_sig: Vec::new(),
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vec![TxOut {
            value,
            script_pubkey: vec![0x51],
        }],
    )
}

fn make_block(prev_block: Hash256, time: u32, transactions: Vec<Transaction>) -> Block {
    let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_block,
            merkle_root: merkle_root(&txids),
            time,
            bits: 0x207fffff,
            nonce: 0,
        },
        transactions,
    }
}

/// Feeds headers and bodies for `blocks` into the chainstate.
fn deliver<S: bitd_storage::KeyValueStore>(
    chainstate: &mut Chainstate<S>,
    block_db: &BlockDb<S>,
    blocks: &[Block],
) {
    let headers: Vec<BlockHeader> = blocks.iter().map(|block| block.header.clone()).collect();
    chainstate
        .block_index
        .add_headers(&headers)
        .expect("headers accepted");
    for block in blocks {
        block_db.add_block(block).expect("store body");
        chainstate
            .block_index
            .mark_downloaded(&block.header.hash())
            .expect("mark downloaded");
    }
}

#[derive(Default)]
struct RecordingPool {
    added: Vec<Hash256>,
    removed: Vec<Hash256>,
}

impl MempoolHooks for RecordingPool {
    fn add_tx(&mut self, tx: Transaction) {
        self.added.push(tx.txid());
    }

    fn remove_tx(&mut self, txid: &Hash256) {
        self.removed.push(*txid);
    }
}

#[test]
fn reorg_reverts_spends_and_promotes_heavier_fork() {
    let params = regtest();
    let store = Arc::new(MemoryStore::new());
    let mut chainstate = Chainstate::new(Arc::clone(&store), &params).expect("open");
    let block_db = BlockDb::new(Arc::clone(&store));

    let genesis = chainstate.block_index.tip();
    let now = 1_700_000_000u32;

    // main branch: a1 <- a2 (a2 spends a1's coinbase)
    let a1 = make_block(genesis, now + 1, vec![coinbase_tx(1, 0xa1)]);
    let a1_coinbase = OutPoint::new(a1.transactions[0].txid(), 0);
    let a2 = make_block(
        a1.header.hash(),
        now + 2,
        vec![coinbase_tx(2, 0xa2), spend_tx(a1_coinbase.clone(), 49)],
    );
    let a2_spend_txid = a2.transactions[1].txid();

    deliver(&mut chainstate, &block_db, &[a1.clone(), a2.clone()]);
    let status = chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("connect main branch");
    assert_eq!(status, NodeStatus::BlockSynced);
    assert_eq!(chainstate.block_index.height(), 2);

    // a1's coinbase is spent, the spend's output is live
    assert!(chainstate
        .utxo_index
        .utxo_entry(&a1_coinbase)
        .expect("read")
        .is_none());
    assert!(chainstate
        .utxo_index
        .utxo_entry(&OutPoint::new(a2_spend_txid, 0))
        .expect("read")
        .is_some());

    // heavier fork from a1: b2 <- b3 (no spend of a1's coinbase)
    let b2 = make_block(a1.header.hash(), now + 3, vec![coinbase_tx(2, 0xb2)]);
    let b3 = make_block(b2.header.hash(), now + 4, vec![coinbase_tx(3, 0xb3)]);
    deliver(&mut chainstate, &block_db, &[b2.clone(), b3.clone()]);

    let mut pool = RecordingPool::default();
    let status = chainstate
        .update_chain(&block_db, &mut pool, NodeStatus::BlockSynced, &params)
        .expect("reorg to fork");
    assert_eq!(status, NodeStatus::BlockSynced);

    // active chain is genesis, a1, b2, b3
    let active: Vec<Hash256> = chainstate.block_index.active_chain().to_vec();
    assert_eq!(
        active,
        vec![genesis, a1.header.hash(), b2.header.hash(), b3.header.hash()]
    );

    // the disconnected block is back to Valid, fork blocks are active
    let a2_info = chainstate
        .block_index
        .get_block_info(&a2.header.hash())
        .expect("known");
    assert_eq!(a2_info.status, BlockStatus::Valid);
    let b3_info = chainstate
        .block_index
        .get_block_info(&b3.header.hash())
        .expect("known");
    assert_eq!(b3_info.status, BlockStatus::InActiveChain);

    // a1's coinbase is unspent again, a2's outputs are gone
    assert!(chainstate
        .utxo_index
        .utxo_entry(&a1_coinbase)
        .expect("read")
        .is_some());
    assert!(chainstate
        .utxo_index
        .utxo_entry(&OutPoint::new(a2_spend_txid, 0))
        .expect("read")
        .is_none());
    assert!(chainstate.utxo_index.overlay_is_empty());

    // a2's non-coinbase spend was re-offered to the mempool; connected
    // transactions were evicted
    assert_eq!(pool.added, vec![a2_spend_txid]);
    assert!(pool.removed.contains(&b2.transactions[0].txid()));
    assert!(pool.removed.contains(&b3.transactions[0].txid()));

    // undo records exist for every connected block
    for hash in [a1.header.hash(), b2.header.hash(), b3.header.hash()] {
        assert!(block_db.get_rev_block(&hash).expect("read").is_some());
    }
}

#[test]
fn invalid_candidate_rolls_back_and_is_never_retried() {
    let params = regtest();
    let store = Arc::new(MemoryStore::new());
    let mut chainstate = Chainstate::new(Arc::clone(&store), &params).expect("open");
    let block_db = BlockDb::new(Arc::clone(&store));

    let genesis = chainstate.block_index.tip();
    let now = 1_700_000_000u32;

    let a1 = make_block(genesis, now + 1, vec![coinbase_tx(1, 0xa1)]);
    deliver(&mut chainstate, &block_db, &[a1.clone()]);
    chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("connect a1");

    let utxo_count_before = store.len(Column::Utxo);
    let active_before = chainstate.block_index.active_chain().to_vec();

    // fork with a block spending an output that never existed
    let bogus = OutPoint::new([0xeeu8; 32], 7);
    let b2 = make_block(
        a1.header.hash(),
        now + 2,
        vec![coinbase_tx(2, 0xb2), spend_tx(bogus, 1)],
    );
    let b3 = make_block(b2.header.hash(), now + 3, vec![coinbase_tx(3, 0xb3)]);
    deliver(&mut chainstate, &block_db, &[b2.clone(), b3.clone()]);

    // the driver absorbs the validation failure and finishes the pass
    let status = chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("pass completes");
    assert_eq!(status, NodeStatus::BlockSynced);

    // nothing moved: same active chain, same utxo set, empty overlay
    assert_eq!(chainstate.block_index.active_chain(), &active_before[..]);
    assert_eq!(store.len(Column::Utxo), utxo_count_before);
    assert!(chainstate.utxo_index.overlay_is_empty());

    // the bad block is permanently invalid; its descendant is not retried
    let b2_info = chainstate
        .block_index
        .get_block_info(&b2.header.hash())
        .expect("known");
    assert_eq!(b2_info.status, BlockStatus::Invalid);
    assert!(chainstate.block_index.get_first_candidate().is_none());

    // a later, heavier honest fork still connects
    let c2 = make_block(a1.header.hash(), now + 4, vec![coinbase_tx(2, 0xc2)]);
    let c3 = make_block(c2.header.hash(), now + 5, vec![coinbase_tx(3, 0xc3)]);
    let c4 = make_block(c3.header.hash(), now + 6, vec![coinbase_tx(4, 0xc4)]);
    deliver(&mut chainstate, &block_db, &[c2.clone(), c3, c4.clone()]);
    let status = chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("honest fork connects");
    assert_eq!(status, NodeStatus::BlockSynced);
    assert_eq!(chainstate.block_index.tip(), c4.header.hash());
}

#[test]
fn waits_for_missing_block_bodies() {
    let params = regtest();
    let store = Arc::new(MemoryStore::new());
    let mut chainstate = Chainstate::new(Arc::clone(&store), &params).expect("open");
    let block_db = BlockDb::new(Arc::clone(&store));

    let genesis = chainstate.block_index.tip();
    let a1 = make_block(genesis, 1_700_000_001, vec![coinbase_tx(1, 0xa1)]);

    // header known, body not downloaded: the driver must stand by
    chainstate
        .block_index
        .add_headers(&[a1.header.clone()])
        .expect("header accepted");
    let status = chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("pass completes");
    assert_eq!(status, NodeStatus::HeaderSynced);
    assert_eq!(chainstate.block_index.height(), 0);

    block_db.add_block(&a1).expect("store body");
    chainstate
        .block_index
        .mark_downloaded(&a1.header.hash())
        .expect("mark downloaded");
    let status = chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("pass completes");
    assert_eq!(status, NodeStatus::BlockSynced);
    assert_eq!(chainstate.block_index.tip(), a1.header.hash());
}
