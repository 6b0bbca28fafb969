use std::path::Path;
use std::time::{Duration, Instant};

use fjall::PersistMode;
use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::{Column, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp};

const SLOW_COMMIT_THRESHOLD: Duration = Duration::from_millis(500);

pub struct FjallStore {
    keyspace: Keyspace,
    partitions: Vec<PartitionHandle>,
}

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    pub cache_bytes: Option<u64>,
    pub fsync_ms: Option<u16>,
}

impl FjallOptions {
    fn apply_config(&self, mut config: Config) -> Config {
        if let Some(bytes) = self.cache_bytes {
            config = config.cache_size(bytes);
        }
        if let Some(ms) = self.fsync_ms {
            config = config.fsync_ms(Some(ms));
        }
        config
    }
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_config(Config::new(path))
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        Self::open_with_config(options.apply_config(Config::new(path)))
    }

    pub fn open_with_config(config: Config) -> Result<Self, StoreError> {
        let keyspace = config.open().map_err(map_err)?;
        let mut partitions = Vec::with_capacity(Column::ALL.len());
        for column in Column::ALL {
            let handle = keyspace
                .open_partition(column.as_str(), PartitionCreateOptions::default())
                .map_err(map_err)?;
            partitions.push(handle);
        }
        Ok(Self {
            keyspace,
            partitions,
        })
    }

    fn partition(&self, column: Column) -> Result<&PartitionHandle, StoreError> {
        self.partitions
            .get(column.index())
            .ok_or_else(|| StoreError::Backend(format!("missing partition {}", column.as_str())))
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let partition = self.partition(column)?;
        let value = partition.get(key).map_err(map_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let partition = self.partition(column)?;
        partition.insert(key, value).map_err(map_err)?;
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let partition = self.partition(column)?;
        partition.remove(key).map_err(map_err)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let partition = self.partition(column)?;
        let mut results = Vec::new();
        for entry in partition.prefix(prefix) {
            let (key, value) = entry.map_err(map_err)?;
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let partition = self.partition(column)?;
        for entry in partition.prefix(prefix) {
            let (key, value) = entry.map_err(map_err)?;
            visitor(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut fjall_batch = Batch::with_capacity(self.keyspace.clone(), batch.len())
            .durability(Some(PersistMode::Buffer));
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    let partition = self.partition(*column)?;
                    fjall_batch.insert(partition, key.as_slice(), value.as_slice());
                }
                WriteOp::Delete { column, key } => {
                    let partition = self.partition(*column)?;
                    fjall_batch.remove(partition, key.as_slice());
                }
            }
        }

        let commit_start = Instant::now();
        fjall_batch.commit().map_err(map_err)?;
        let elapsed = commit_start.elapsed();
        if elapsed >= SLOW_COMMIT_THRESHOLD {
            bitd_log::log_warn!(
                "slow write_batch commit: {}ms for {} ops",
                elapsed.as_millis(),
                batch.len(),
            );
        }
        Ok(())
    }
}

fn map_err(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
