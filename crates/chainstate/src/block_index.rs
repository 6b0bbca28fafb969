//! Persisted header tree with cumulative-work fork choice.
//!
//! Tracks every known header, the active chain, the pending reorg
//! candidates, and the best-known linear header index used to answer peer
//! locator queries. Records are copy-on-write: callers mutate an owned
//! `BlockInfo` and re-insert it, which persists the new version.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bitd_consensus::{ChainParams, Hash256};
use bitd_pow::block_proof;
use bitd_primitives::block::BlockHeader;
use bitd_primitives::genesis::genesis_block;
use bitd_storage::{Column, KeyValueStore, WriteBatch};
use primitive_types::U256;

use crate::block_info::{BlockInfo, BlockStatus};
use crate::error::ChainstateError;

const BLOCK_INFO_KEY_TAG: u8 = b'i';
const MAX_DOWNLOAD_CANDIDATES: usize = 1024;
const MAX_LOCATOR_RESPONSE: usize = 2000;
const CANDIDATE_SCAN_WINDOW: usize = 100;

fn block_info_key(hash: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = BLOCK_INFO_KEY_TAG;
    key[1..].copy_from_slice(hash);
    key
}

pub struct BlockIndex<S> {
    store: Arc<S>,
    header_map: HashMap<Hash256, BlockInfo>,
    active_chain: Vec<Hash256>,
    candidates: VecDeque<(Hash256, U256)>,
    header_index: Vec<Hash256>,
}

impl<S: KeyValueStore> BlockIndex<S> {
    /// Opens the index, seeding an empty store with the network's genesis.
    pub fn new(store: Arc<S>, params: &ChainParams) -> Result<Self, ChainstateError> {
        let mut index = Self {
            store,
            header_map: HashMap::new(),
            active_chain: Vec::new(),
            candidates: VecDeque::new(),
            header_index: Vec::new(),
        };

        let records = index.load_records()?;
        if records.is_empty() {
            let genesis = genesis_block(&params.consensus.genesis);
            let chainwork = block_proof(genesis.header.bits)?;
            let hash = genesis.header.hash();
            let info = BlockInfo::new(genesis.header, 0, chainwork)
                .with_status(BlockStatus::InActiveChain)
                .with_downloaded(true);
            index.insert_block_info(info, None)?;
            index.active_chain.push(hash);
            index.header_index.push(hash);
        } else {
            index.init_from_records(records)?;
        }
        Ok(index)
    }

    fn load_records(&self) -> Result<Vec<(Hash256, BlockInfo)>, ChainstateError> {
        let mut records = Vec::new();
        let mut bad_record: Option<ChainstateError> = None;
        self.store
            .for_each_prefix(Column::BlockInfo, &[BLOCK_INFO_KEY_TAG], &mut |key,
                                                                             value| {
                if key.len() != 33 {
                    bad_record = Some(ChainstateError::InvariantViolation(
                        "malformed block info key",
                    ));
                    return Ok(());
                }
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&key[1..]);
                match BlockInfo::decode(value) {
                    Ok(info) => records.push((hash, info)),
                    Err(err) => bad_record = Some(ChainstateError::Decode(err)),
                }
                Ok(())
            })?;
        match bad_record {
            Some(err) => Err(err),
            None => Ok(records),
        }
    }

    /// Rebuilds the in-memory structures from persisted records: chainwork
    /// in height order, then the active chain, candidate deque, and header
    /// index.
    fn init_from_records(
        &mut self,
        records: Vec<(Hash256, BlockInfo)>,
    ) -> Result<(), ChainstateError> {
        bitd_log::log_info!("start block index initialization ({} headers)", records.len());

        for (hash, info) in records {
            self.header_map.insert(hash, info);
        }

        let mut by_height: Vec<Hash256> = self.header_map.keys().copied().collect();
        by_height.sort_by_key(|hash| self.header_map[hash].height);

        for hash in by_height.iter() {
            let (height, bits, prev_block) = {
                let info = &self.header_map[hash];
                (info.height, info.header.bits, info.header.prev_block)
            };
            let parent_work = if height == 0 {
                U256::zero()
            } else {
                self.header_map
                    .get(&prev_block)
                    .map(|parent| parent.chainwork)
                    .ok_or(ChainstateError::InvariantViolation(
                        "header with unknown parent in index",
                    ))?
            };
            let chainwork = parent_work + block_proof(bits)?;
            if let Some(info) = self.header_map.get_mut(hash) {
                info.chainwork = chainwork;
            }
        }

        let mut active: Vec<(u32, Hash256)> = self
            .header_map
            .iter()
            .filter(|(_, info)| info.status == BlockStatus::InActiveChain)
            .map(|(hash, info)| (info.height, *hash))
            .collect();
        active.sort_by_key(|(height, _)| *height);
        self.active_chain = active.into_iter().map(|(_, hash)| hash).collect();
        if self.active_chain.is_empty() {
            return Err(ChainstateError::InvariantViolation(
                "no active chain in persisted index",
            ));
        }

        let active_set: HashSet<Hash256> = self.active_chain.iter().copied().collect();
        let tip_work = self.tip_chainwork();
        for hash in &by_height {
            if active_set.contains(hash) {
                continue;
            }
            let info = &self.header_map[hash];
            if info.status != BlockStatus::ValidHeader {
                continue;
            }
            if info.chainwork > tip_work {
                self.candidates.push_back((*hash, info.chainwork));
            }
        }

        self.header_index = self.active_chain.clone();
        let mut index_set = active_set;
        for hash in by_height.iter() {
            if index_set.contains(hash) {
                continue;
            }
            let (prev_block, chainwork) = {
                let info = &self.header_map[hash];
                (info.header.prev_block, info.chainwork)
            };
            let best = *self
                .header_index
                .last()
                .ok_or(ChainstateError::InvariantViolation("empty header index"))?;
            let best_work = self
                .header_map
                .get(&best)
                .map(|info| info.chainwork)
                .unwrap_or_default();
            if prev_block == best {
                self.header_index.push(*hash);
                index_set.insert(*hash);
            } else if chainwork > best_work {
                let (to_add, to_remove) = self.fork_details_against(hash, &self.header_index)?;
                self.header_index
                    .truncate(self.header_index.len() - to_remove.len());
                self.header_index.extend(to_add);
                index_set = self.header_index.iter().copied().collect();
            }
        }

        bitd_log::log_info!(
            "block index initialized: height {}, {} candidates",
            self.height(),
            self.candidates.len()
        );
        Ok(())
    }

    pub fn active_chain(&self) -> &[Hash256] {
        &self.active_chain
    }

    pub fn header_index(&self) -> &[Hash256] {
        &self.header_index
    }

    pub fn tip(&self) -> Hash256 {
        self.active_chain[self.active_chain.len() - 1]
    }

    pub fn height(&self) -> u32 {
        (self.active_chain.len() - 1) as u32
    }

    fn tip_chainwork(&self) -> U256 {
        self.header_map
            .get(&self.tip())
            .map(|info| info.chainwork)
            .unwrap_or_default()
    }

    /// Returns an owned copy; mutate it and re-insert to persist changes.
    pub fn get_block_info(&self, hash: &Hash256) -> Option<BlockInfo> {
        self.header_map.get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.header_map.contains_key(hash)
    }

    pub fn insert_block_info(
        &mut self,
        info: BlockInfo,
        batch: Option<&mut WriteBatch>,
    ) -> Result<(), ChainstateError> {
        let hash = info.header.hash();
        let key = block_info_key(&hash);
        let value = info.encode();
        match batch {
            Some(batch) => batch.put(Column::BlockInfo, key, value),
            None => self.store.put(Column::BlockInfo, &key, &value)?,
        }
        self.header_map.insert(hash, info);
        Ok(())
    }

    /// Accepts new headers, computing height and chainwork from the parent.
    /// Headers that are already known or whose parent is unknown are
    /// skipped. Returns whether anything new was accepted, which tells the
    /// peer layer to ask for more.
    pub fn add_headers(&mut self, headers: &[BlockHeader]) -> Result<bool, ChainstateError> {
        let mut added = false;
        let current_work = self.tip_chainwork();

        for header in headers {
            let hash = header.hash();
            if self.header_map.contains_key(&hash) {
                continue;
            }
            // parent-less headers are dropped, not buffered
            let (parent_height, parent_work) = match self.header_map.get(&header.prev_block) {
                Some(parent) => (parent.height, parent.chainwork),
                None => continue,
            };
            let height = parent_height + 1;
            let chainwork = parent_work + block_proof(header.bits)?;

            self.insert_block_info(BlockInfo::new(header.clone(), height, chainwork), None)?;
            added = true;

            if chainwork > current_work {
                self.candidates.push_back((hash, chainwork));
            }

            let best = *self
                .header_index
                .last()
                .ok_or(ChainstateError::InvariantViolation("empty header index"))?;
            let best_work = self
                .header_map
                .get(&best)
                .map(|info| info.chainwork)
                .unwrap_or_default();
            if header.prev_block == best {
                self.header_index.push(hash);
            } else if chainwork > best_work {
                let (to_add, to_remove) = self.fork_details_against(&hash, &self.header_index)?;
                self.header_index
                    .truncate(self.header_index.len() - to_remove.len());
                self.header_index.extend(to_add);
            }
        }

        Ok(added)
    }

    /// Best pending reorg candidate: prunes entries whose chainwork no
    /// longer beats the tip, then prefers an already-downloaded candidate
    /// among the first hundred so a single missing body cannot stall the
    /// driver.
    pub fn get_first_candidate(&mut self) -> Option<BlockInfo> {
        let tip_work = self.tip_chainwork();
        while let Some((_, chainwork)) = self.candidates.front() {
            if *chainwork <= tip_work {
                self.candidates.pop_front();
            } else {
                break;
            }
        }

        let mut best: Option<BlockInfo> = None;
        for (hash, chainwork) in self.candidates.iter().take(CANDIDATE_SCAN_WINDOW) {
            if *chainwork <= tip_work {
                continue;
            }
            let Some(info) = self.header_map.get(hash) else {
                continue;
            };
            if info.downloaded {
                return Some(info.clone());
            }
            if best.is_none() {
                best = Some(info.clone());
            }
        }
        best
    }

    /// Drops one candidate entry; used when a candidate fails validation so
    /// it is never silently retried.
    pub fn discard_candidate(&mut self, hash: &Hash256) {
        self.candidates.retain(|(entry, _)| entry != hash);
    }

    /// Walks ancestors of `hash` back to the common ancestor with the
    /// active chain. Returns the branch in root-to-tip order and the active
    /// suffix beyond the ancestor.
    pub fn get_fork_details(
        &self,
        hash: &Hash256,
    ) -> Result<(Vec<Hash256>, Vec<Hash256>), ChainstateError> {
        self.fork_details_against(hash, &self.active_chain)
    }

    fn fork_details_against(
        &self,
        hash: &Hash256,
        chain: &[Hash256],
    ) -> Result<(Vec<Hash256>, Vec<Hash256>), ChainstateError> {
        let mut fork = vec![*hash];
        let mut cursor = *hash;
        let ancestor_height;
        loop {
            let info = self
                .header_map
                .get(&cursor)
                .ok_or(ChainstateError::UnknownBlock)?;
            if info.height == 0 {
                return Err(ChainstateError::InvariantViolation(
                    "fork walk reached genesis",
                ));
            }
            let prev = info.header.prev_block;
            let height = info.height as usize;
            if height <= chain.len() && prev == chain[height - 1] {
                ancestor_height = height - 1;
                break;
            }
            fork.push(prev);
            cursor = prev;
        }
        fork.reverse();
        let to_remove = chain[ancestor_height + 1..].to_vec();
        Ok((fork, to_remove))
    }

    pub fn add_to_active_chain(&mut self, hash: Hash256) {
        self.active_chain.push(hash);
    }

    pub fn remove_from_active_chain(&mut self, hash: &Hash256) -> Result<(), ChainstateError> {
        if self.active_chain.last() != Some(hash) {
            return Err(ChainstateError::InvariantViolation(
                "can only disconnect the active tip",
            ));
        }
        if self.active_chain.len() == 1 {
            return Err(ChainstateError::InvariantViolation(
                "cannot disconnect genesis",
            ));
        }
        self.active_chain.pop();
        Ok(())
    }

    /// Marks a block body as available in block storage.
    pub fn mark_downloaded(&mut self, hash: &Hash256) -> Result<bool, ChainstateError> {
        let Some(info) = self.get_block_info(hash) else {
            return Ok(false);
        };
        if info.downloaded {
            return Ok(false);
        }
        self.insert_block_info(info.with_downloaded(true), None)?;
        Ok(true)
    }

    /// Not-yet-downloaded blocks worth fetching, bounded to a sliding
    /// window of 1024 and ordered by height. Walks each pending candidate
    /// back through ancestors that are neither downloaded nor active.
    pub fn get_download_candidates(&self) -> Vec<Hash256> {
        let tip_work = self.tip_chainwork();
        let mut wanted: Vec<Hash256> = Vec::new();
        let mut seen: HashSet<Hash256> = HashSet::new();

        for (candidate, chainwork) in self.candidates.iter() {
            if wanted.len() >= MAX_DOWNLOAD_CANDIDATES {
                break;
            }
            if *chainwork <= tip_work {
                continue;
            }
            let mut cursor = *candidate;
            while let Some(info) = self.header_map.get(&cursor) {
                if seen.contains(&cursor) || info.status == BlockStatus::InActiveChain {
                    break;
                }
                if !info.downloaded {
                    wanted.push(cursor);
                }
                seen.insert(cursor);
                cursor = info.header.prev_block;
            }
        }

        wanted.sort_by_key(|hash| {
            self.header_map
                .get(hash)
                .map(|info| info.height)
                .unwrap_or(u32::MAX)
        });
        wanted.truncate(MAX_DOWNLOAD_CANDIDATES);
        wanted
    }

    /// Sparse locator over the header index: the last ten entries linearly,
    /// then doubling steps, always ending with genesis.
    pub fn get_block_locator_hashes(&self) -> Vec<Hash256> {
        let mut locators = Vec::new();
        let mut i = 1usize;
        let mut step = 1usize;
        while i <= self.header_index.len() {
            locators.push(self.header_index[self.header_index.len() - i]);
            if i >= 10 {
                step *= 2;
            }
            i += step;
        }
        if let Some(genesis) = self.header_index.first() {
            if !locators.contains(genesis) {
                locators.push(*genesis);
            }
        }
        locators
    }

    /// Answers a getheaders query: the first locator we recognize selects
    /// the start point; the response stops at `stop` (inclusive) and is
    /// capped at 2000 headers.
    pub fn get_headers_from_locators(
        &self,
        locators: &[Hash256],
        stop: &Hash256,
    ) -> Vec<BlockHeader> {
        for locator in locators {
            let Some(start) = self.header_index.iter().position(|hash| hash == locator) else {
                continue;
            };
            let mut selection = &self.header_index[start + 1..];
            if let Some(end) = selection.iter().position(|hash| hash == stop) {
                selection = &selection[..=end];
            }
            let capped = &selection[..selection.len().min(MAX_LOCATOR_RESPONSE)];
            return self.headers_for(capped);
        }
        Vec::new()
    }

    fn headers_for(&self, hashes: &[Hash256]) -> Vec<BlockHeader> {
        hashes
            .iter()
            .filter_map(|hash| self.header_map.get(hash))
            .map(|info| info.header.clone())
            .collect()
    }
}
