use std::sync::Arc;

use bitd_chainstate::{BlockDb, Chainstate};
use bitd_consensus::{chain_params, ChainParams, Hash256, Network, NodeStatus};
use bitd_primitives::block::{merkle_root, Block, BlockHeader};
use bitd_primitives::outpoint::OutPoint;
use bitd_primitives::transaction::{Transaction, TxIn, TxOut};
use bitd_storage::memory::MemoryStore;
use bitd_storage::Column;

fn regtest() -> ChainParams {
    chain_params(Network::Regtest)
}

fn coinbase_tx(height: u32) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vout: vec![TxOut {
            value: 50,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

fn spend_tx(prevout: OutPoint, value: i64) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout,
            script_sig: Vec::new(),
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        vout: vec![TxOut {
            value,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

/// Chain of simple blocks where every third block spends the coinbase of
/// its parent. `offset` shifts the heights baked into the coinbases so two
/// generated chains never share a txid.
fn generate_chain(genesis: Hash256, length: u32, offset: u32) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(length as usize);
    let mut prev_hash = genesis;
    let mut prev_coinbase: Option<OutPoint> = None;

    for height in 1..=length {
        let coinbase = coinbase_tx(offset + height);
        let coinbase_outpoint = OutPoint::new(coinbase.txid(), 0);
        let mut transactions = vec![coinbase];
        if height % 3 == 0 {
            if let Some(outpoint) = prev_coinbase.take() {
                transactions.push(spend_tx(outpoint, 49));
            }
        }
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block: prev_hash,
                merkle_root: merkle_root(&txids),
                time: 1_700_000_000 + height,
                bits: 0x207fffff,
                nonce: 0,
            },
            transactions,
        };
        prev_hash = block.header.hash();
        prev_coinbase = Some(coinbase_outpoint);
        blocks.push(block);
    }
    blocks
}

#[test]
fn syncs_three_thousand_blocks_through_the_driver() {
    let params = regtest();
    let store = Arc::new(MemoryStore::new());
    let mut chainstate = Chainstate::new(Arc::clone(&store), &params).expect("open");
    let block_db = BlockDb::new(Arc::clone(&store));

    const LENGTH: u32 = 3000;
    let blocks = generate_chain(chainstate.block_index.tip(), LENGTH, 0);

    let headers: Vec<BlockHeader> = blocks.iter().map(|block| block.header.clone()).collect();
    for chunk in headers.chunks(2000) {
        assert!(chainstate.block_index.add_headers(chunk).expect("headers"));
    }
    for block in &blocks {
        block_db.add_block(block).expect("store body");
        chainstate
            .block_index
            .mark_downloaded(&block.header.hash())
            .expect("mark downloaded");
    }

    let status = chainstate
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("sync");
    assert_eq!(status, NodeStatus::BlockSynced);
    assert_eq!(chainstate.block_index.active_chain().len(), LENGTH as usize + 1);
    assert!(chainstate.utxo_index.overlay_is_empty());

    // every block left exactly one live output: its coinbase if unspent,
    // otherwise the output of the transaction that spent it
    assert_eq!(store.len(Column::Utxo), LENGTH as usize);

    // spot-check: the coinbase of a spent-from block is gone, its spender
    // is live
    let spent_coinbase = OutPoint::new(blocks[1].transactions[0].txid(), 0);
    assert!(chainstate
        .utxo_index
        .utxo_entry(&spent_coinbase)
        .expect("read")
        .is_none());
    let spender = OutPoint::new(blocks[2].transactions[1].txid(), 0);
    assert!(chainstate
        .utxo_index
        .utxo_entry(&spender)
        .expect("read")
        .is_some());

    // the active chain is contiguous and chainwork strictly monotonic
    let active = chainstate.block_index.active_chain();
    let mut last_work = primitive_types::U256::zero();
    for (position, hash) in active.iter().enumerate() {
        let info = chainstate.block_index.get_block_info(hash).expect("known");
        if position > 0 {
            assert_eq!(info.header.prev_block, active[position - 1]);
        }
        assert!(info.chainwork > last_work);
        last_work = info.chainwork;
    }
}

#[test]
fn restart_resumes_from_persisted_state() {
    let params = regtest();
    let store = Arc::new(MemoryStore::new());

    let blocks;
    let tip;
    {
        let mut chainstate = Chainstate::new(Arc::clone(&store), &params).expect("open");
        let block_db = BlockDb::new(Arc::clone(&store));
        blocks = generate_chain(chainstate.block_index.tip(), 120, 0);

        let headers: Vec<BlockHeader> =
            blocks.iter().map(|block| block.header.clone()).collect();
        chainstate.block_index.add_headers(&headers).expect("headers");
        for block in &blocks {
            block_db.add_block(block).expect("store body");
            chainstate
                .block_index
                .mark_downloaded(&block.header.hash())
                .expect("mark downloaded");
        }
        chainstate
            .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
            .expect("sync");
        tip = chainstate.block_index.tip();
    }

    // reopen over the same store: active chain and utxo set are intact
    let mut reopened = Chainstate::new(Arc::clone(&store), &params).expect("reopen");
    assert_eq!(reopened.block_index.tip(), tip);
    assert_eq!(reopened.block_index.height(), 120);
    assert!(reopened.block_index.get_first_candidate().is_none());

    // and the node can keep extending the chain
    let block_db = BlockDb::new(Arc::clone(&store));
    let extension = generate_chain(tip, 3, 120);
    let headers: Vec<BlockHeader> = extension.iter().map(|block| block.header.clone()).collect();
    reopened.block_index.add_headers(&headers).expect("headers");
    for block in &extension {
        block_db.add_block(block).expect("store body");
        reopened
            .block_index
            .mark_downloaded(&block.header.hash())
            .expect("mark downloaded");
    }
    let status = reopened
        .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
        .expect("extend");
    assert_eq!(status, NodeStatus::BlockSynced);
    assert_eq!(reopened.block_index.height(), 123);
}

#[test]
fn fjall_backed_state_survives_reopen() {
    let params = regtest();
    let dir = tempfile::tempdir().expect("tempdir");

    let tip;
    {
        let store = Arc::new(
            bitd_storage::fjall::FjallStore::open(dir.path().join("chainstate"))
                .expect("open fjall"),
        );
        let mut chainstate = Chainstate::new(Arc::clone(&store), &params).expect("open");
        let block_db = BlockDb::new(Arc::clone(&store));

        let blocks = generate_chain(chainstate.block_index.tip(), 30, 0);
        let headers: Vec<BlockHeader> =
            blocks.iter().map(|block| block.header.clone()).collect();
        chainstate.block_index.add_headers(&headers).expect("headers");
        for block in &blocks {
            block_db.add_block(block).expect("store body");
            chainstate
                .block_index
                .mark_downloaded(&block.header.hash())
                .expect("mark downloaded");
        }
        let status = chainstate
            .update_chain(&block_db, &mut (), NodeStatus::HeaderSynced, &params)
            .expect("sync");
        assert_eq!(status, NodeStatus::BlockSynced);
        tip = chainstate.block_index.tip();
    }

    let store = Arc::new(
        bitd_storage::fjall::FjallStore::open(dir.path().join("chainstate")).expect("reopen"),
    );
    let chainstate = Chainstate::new(store, &params).expect("reopen state");
    assert_eq!(chainstate.block_index.tip(), tip);
    assert_eq!(chainstate.block_index.height(), 30);
}
