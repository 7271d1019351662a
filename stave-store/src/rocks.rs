//! RocksDB-backed pack.
//!
//! Column families:
//! - `deltas`   — delta payloads as [`PackRecord`]s, keyed `entity_id:16 ‖ delta_id:16`
//! - `history`  — the serialized revision graph ([`HistoryRecord`])
//! - `metadata` — store counters ([`StoreMetadata`])
//!
//! Delta keys are write-once. A rewrite with the same payload is accepted
//! and ignored; a rewrite with a different payload is a conflict.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use stave_vcs::{Pack, PackError, Payload, SerializedNode};
use uuid::Uuid;

use crate::codec::{HistoryRecord, PackRecord};
use crate::error::StoreError;

const CF_DELTAS: &str = "deltas";
const CF_HISTORY: &str = "history";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DELTAS, CF_HISTORY, CF_METADATA];

const HISTORY_KEY: &[u8] = b"current";
const METADATA_KEY: &[u8] = b"store";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stave_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Persistent counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Payloads written since creation, pruned ones included
    pub delta_count: u64,
    /// Uncompressed payload bytes written
    pub raw_bytes: u64,
    /// Compressed payload bytes written
    pub compressed_bytes: u64,
    pub history_saves: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl StoreMetadata {
    fn new() -> Self {
        let now = now_secs();
        Self {
            created_at: now,
            updated_at: now,
            ..Self::default()
        }
    }

    /// Overall payload compression ratio.
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 0.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

/// Durable pack for one project.
pub struct RocksPack {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-check-write sequences and metadata updates.
    write_lock: Mutex<StoreMetadata>,
    reads: AtomicU64,
}

impl RocksPack {
    /// Open the pack, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let metadata = Self::recover_metadata(&db)?;
        log::info!(
            "Opened pack at {} ({} deltas, {} history saves)",
            config.path.display(),
            metadata.delta_count,
            metadata.history_saves
        );

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(metadata),
            reads: AtomicU64::new(0),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DELTAS => {
                // Records are LZ4 already; prefix-scanned by entity id.
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_HISTORY | CF_METADATA => {
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    fn recover_metadata(db: &DBWithThreadMode<SingleThreaded>) -> Result<StoreMetadata, StoreError> {
        let cf = db
            .cf_handle(CF_METADATA)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_METADATA}' not found")))?;
        match db.get_cf(&cf, METADATA_KEY)? {
            Some(bytes) => StoreMetadata::decode(&bytes),
            None => Ok(StoreMetadata::new()),
        }
    }

    // ─── Delta payloads ───────────────────────────────────────────────

    /// Store raw payload bytes under a write-once key. Returns `false` when
    /// the identical payload was already stored.
    pub fn put_record(
        &self,
        entity_id: Uuid,
        delta_id: Uuid,
        payload: &[u8],
    ) -> Result<bool, StoreError> {
        let cf_deltas = self.cf(CF_DELTAS)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let key = Self::delta_key(entity_id, delta_id);

        let mut meta = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Database("pack write lock poisoned".into()))?;

        if let Some(existing) = self.db.get_cf(&cf_deltas, &key)? {
            let existing = PackRecord::decode(&existing)?.open()?;
            if existing == payload {
                log::trace!("Identical rewrite of {entity_id}/{delta_id} ignored");
                return Ok(false);
            }
            return Err(StoreError::Conflict { entity_id, delta_id });
        }

        let record = PackRecord::seal(entity_id, delta_id, payload);
        let mut next = meta.clone();
        next.delta_count += 1;
        next.raw_bytes += payload.len() as u64;
        next.compressed_bytes += record.compressed_size() as u64;
        next.updated_at = now_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_deltas, &key, record.encode()?);
        batch.put_cf(&cf_meta, METADATA_KEY, next.encode()?);
        self.write(batch)?;

        *meta = next;
        Ok(true)
    }

    /// Raw payload bytes for a key.
    pub fn get_record(&self, entity_id: Uuid, delta_id: Uuid) -> Result<Vec<u8>, StoreError> {
        let cf = self.cf(CF_DELTAS)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.db.get_cf(&cf, Self::delta_key(entity_id, delta_id))? {
            Some(bytes) => PackRecord::decode(&bytes)?.open(),
            None => Err(StoreError::NotFound { entity_id, delta_id }),
        }
    }

    pub fn has_record(&self, entity_id: Uuid, delta_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DELTAS)?;
        Ok(self
            .db
            .get_cf(&cf, Self::delta_key(entity_id, delta_id))?
            .is_some())
    }

    /// Delta ids stored for one entity, in key order.
    pub fn entity_delta_ids(&self, entity_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .entity_keys(entity_id)?
            .into_iter()
            .map(|(_, delta_id)| delta_id)
            .collect())
    }

    /// Delete every payload of one entity (history pruning).
    pub fn remove_entity(&self, entity_id: Uuid) -> Result<u64, StoreError> {
        let cf = self.cf(CF_DELTAS)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Database("pack write lock poisoned".into()))?;

        let keys = self.entity_keys(entity_id)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::default();
        for (key, _) in &keys {
            batch.delete_cf(&cf, key);
        }
        self.write(batch)?;

        log::info!("Pruned {} payloads of entity {entity_id}", keys.len());
        Ok(keys.len() as u64)
    }

    fn entity_keys(&self, entity_id: Uuid) -> Result<Vec<(Vec<u8>, Uuid)>, StoreError> {
        let cf = self.cf(CF_DELTAS)?;
        let prefix = entity_id.as_bytes();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if key.len() != 32 || &key[..16] != prefix {
                break;
            }
            let delta_id = Uuid::from_slice(&key[16..])
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            keys.push((key.to_vec(), delta_id));
        }
        Ok(keys)
    }

    // ─── History ──────────────────────────────────────────────────────

    /// Persist the serialized revision graph, replacing the previous one.
    pub fn save_history(&self, node: &SerializedNode) -> Result<(), StoreError> {
        let cf_history = self.cf(CF_HISTORY)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let record = HistoryRecord::seal(node, now_secs())?;

        let mut meta = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Database("pack write lock poisoned".into()))?;
        let mut next = meta.clone();
        next.history_saves += 1;
        next.updated_at = record.saved_at;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_history, HISTORY_KEY, record.encode()?);
        batch.put_cf(&cf_meta, METADATA_KEY, next.encode()?);
        self.write(batch)?;

        log::debug!(
            "Saved history ({} bytes compressed)",
            record.compressed.len()
        );
        *meta = next;
        Ok(())
    }

    /// The last saved revision graph, if any.
    pub fn load_history(&self) -> Result<Option<SerializedNode>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        match self.db.get_cf(&cf, HISTORY_KEY)? {
            Some(bytes) => HistoryRecord::decode(&bytes)?.open().map(Some),
            None => Ok(None),
        }
    }

    // ─── Maintenance ──────────────────────────────────────────────────

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn metadata(&self) -> Result<StoreMetadata, StoreError> {
        self.write_lock
            .lock()
            .map(|meta| meta.clone())
            .map_err(|_| StoreError::Database("pack write lock poisoned".into()))
    }

    /// Point reads served since open.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    /// `entity_id (16 bytes) ‖ delta_id (16 bytes)`
    fn delta_key(entity_id: Uuid, delta_id: Uuid) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(entity_id.as_bytes());
        key[16..].copy_from_slice(delta_id.as_bytes());
        key
    }
}

impl Pack for RocksPack {
    fn set_delta_data_for(
        &self,
        entity_id: Uuid,
        delta_id: Uuid,
        data: &Payload,
    ) -> Result<(), PackError> {
        let bytes = data.encode()?;
        self.put_record(entity_id, delta_id, &bytes)?;
        Ok(())
    }

    fn create_delta_data_for(&self, entity_id: Uuid, delta_id: Uuid) -> Result<Payload, PackError> {
        let bytes = self.get_record(entity_id, delta_id)?;
        Payload::decode(&bytes)
    }

    fn contains_delta_data(&self, entity_id: Uuid, delta_id: Uuid) -> Result<bool, PackError> {
        Ok(self.has_record(entity_id, delta_id)?)
    }
}

impl std::fmt::Debug for RocksPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksPack")
            .field("path", &self.config.path)
            .finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
