//! RocksDB-backed persistent document store.
//!
//! Column families:
//! - `documents`   : Document records (JSON, LZ4 compressed), keyed by doc_id
//! - `commits`     : Commit records (JSON, LZ4 compressed), keyed by doc_id:commit_id
//! - `commit_index`: commit_id → doc_id, for lookups by commit id alone
//! - `metadata`    : Per-document version and sizes (JSON)
//!
//! Every engine write is one `WriteBatch` spanning all four families. The
//! expected-version check reads `metadata` under a per-document mutex, so
//! writers to the same document serialize while different documents proceed
//! in parallel.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use folio_core::{Commit, CommitId, Document, DocumentId};

use super::{CommitStore, DocumentStore, RevisionBatch, StoreError};

/// Column family names.
const CF_DOCUMENTS: &str = "documents";
const CF_COMMITS: &str = "commits";
const CF_COMMIT_INDEX: &str = "commit_index";
const CF_METADATA: &str = "metadata";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_COMMITS, CF_COMMIT_INDEX, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 256 * 1024 * 1024, // 256MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Per-document bookkeeping stored beside each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: DocumentId,
    /// Mirrors `Document::version`; the expected-version check reads this.
    pub version: u64,
    /// Commits currently stored for the document
    pub commit_count: u64,
    /// Uncompressed document record size in bytes
    pub record_size: u64,
    /// Compressed document record size in bytes
    pub compressed_size: u64,
    /// Milliseconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl DocumentMetadata {
    fn for_record(document: &Document, commit_count: u64, record: &EncodedRecord) -> Self {
        Self {
            doc_id: document.id(),
            version: document.version(),
            commit_count,
            record_size: record.raw_size,
            compressed_size: record.bytes.len() as u64,
            created_at: document.created(),
            updated_at: document.updated(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::DeserializationError(e.to_string()))
    }
}

struct EncodedRecord {
    bytes: Vec<u8>,
    raw_size: u64,
}

/// JSON-encode then LZ4-compress a record.
fn encode_record<T: Serialize>(value: &T) -> Result<EncodedRecord, StoreError> {
    let json =
        serde_json::to_vec(value).map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(EncodedRecord {
        raw_size: json.len() as u64,
        bytes: lz4_flex::compress_prepend_size(&json),
    })
}

fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let json = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| StoreError::DeserializationError(e.to_string()))
}

/// RocksDB-backed document and commit store.
pub struct RocksDocumentStore {
    /// RocksDB instance (single-threaded mode: column families are fixed at open)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// One mutex per document, held only while some writer needs it.
    locks: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl RocksDocumentStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024); // 128MB WAL limit
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Self::cf_options(name, &config);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let store = Self {
            db,
            config,
            locks: Mutex::new(HashMap::new()),
        };
        log::info!(
            "Opened revision store at {} ({} documents)",
            store.config.path.display(),
            store.document_ids()?.len()
        );
        Ok(store)
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_COMMITS => {
                // Many small writes, prefix-scanned by doc_id on cascade delete
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
                // Records are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_COMMIT_INDEX | CF_METADATA => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    /// Load document metadata.
    pub fn load_metadata(&self, doc_id: DocumentId) -> Result<DocumentMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, doc_id.as_uuid().as_bytes())? {
            Some(bytes) => DocumentMetadata::decode(&bytes),
            None => Err(StoreError::DocumentNotFound(doc_id)),
        }
    }

    /// Check if a document exists.
    pub fn document_exists(&self, doc_id: DocumentId) -> Result<bool, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(cf, doc_id.as_uuid().as_bytes())?.is_some())
    }

    /// All stored document ids, in key order.
    pub fn document_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            ids.push(DocumentId::from(uuid_from_key(&key)?));
        }
        Ok(ids)
    }

    /// Force a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Commits ──────────────────────────────────────────────────────

    /// Document owning a stored commit, via the commit index.
    fn commit_owner(&self, id: CommitId) -> Result<Option<DocumentId>, StoreError> {
        let cf = self.cf(CF_COMMIT_INDEX)?;
        match self.db.get_cf(cf, id.as_uuid().as_bytes())? {
            Some(bytes) => Ok(Some(DocumentId::from(uuid_from_key(&bytes)?))),
            None => Ok(None),
        }
    }

    /// Keys of every commit stored under `doc_id`.
    fn commit_keys(&self, doc_id: DocumentId) -> Result<Vec<(CommitId, Vec<u8>)>, StoreError> {
        let cf = self.cf(CF_COMMITS)?;
        let prefix = doc_id.as_uuid();
        let start_key = Self::commit_key(doc_id, CommitId::from(Uuid::nil()));

        let mut keys = Vec::new();
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            // Stop once past this document's key prefix
            if key.len() != 32 || &key[..16] != prefix.as_bytes() {
                break;
            }
            keys.push((CommitId::from(uuid_from_key(&key[16..])?), key.to_vec()));
        }
        Ok(keys)
    }

    /// Stage removal of one commit and its index entry.
    fn stage_commit_delete(
        &self,
        batch: &mut WriteBatch,
        doc_id: DocumentId,
        id: CommitId,
    ) -> Result<(), StoreError> {
        batch.delete_cf(self.cf(CF_COMMITS)?, Self::commit_key(doc_id, id));
        batch.delete_cf(self.cf(CF_COMMIT_INDEX)?, id.as_uuid().as_bytes());
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    /// Build a commit key: doc_id (16 bytes) + commit_id (16 bytes).
    fn commit_key(doc_id: DocumentId, id: CommitId) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(doc_id.as_uuid().as_bytes());
        key.extend_from_slice(id.as_uuid().as_bytes());
        key
    }

    /// Run `f` with check-and-write on `doc_id` serialized.
    fn with_document_lock<T>(
        &self,
        doc_id: DocumentId,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| StoreError::DatabaseError("lock table poisoned".into()))?;
            Arc::clone(locks.entry(doc_id).or_default())
        };
        let result = match lock.lock() {
            Ok(_guard) => f(),
            Err(_) => Err(StoreError::DatabaseError("document lock poisoned".into())),
        };
        self.release_lock(doc_id, lock);
        result
    }

    /// Drop the table entry once no other writer holds or waits on it.
    fn release_lock(&self, doc_id: DocumentId, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        drop(lock);
        if locks.get(&doc_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&doc_id);
        }
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

fn uuid_from_key(bytes: &[u8]) -> Result<Uuid, StoreError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::DeserializationError("Invalid UUID key".into()))?;
    Ok(Uuid::from_bytes(raw))
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

impl CommitStore for RocksDocumentStore {
    fn find_commit(&self, id: CommitId) -> Result<Commit, StoreError> {
        let doc_id = self
            .commit_owner(id)?
            .ok_or(StoreError::CommitNotFound(id))?;
        let cf = self.cf(CF_COMMITS)?;
        match self.db.get_cf(cf, Self::commit_key(doc_id, id))? {
            Some(bytes) => decode_record(&bytes),
            None => Err(StoreError::CommitNotFound(id)),
        }
    }

    fn remove_many(&self, ids: &[CommitId]) -> Result<usize, StoreError> {
        let mut by_document: HashMap<DocumentId, Vec<CommitId>> = HashMap::new();
        for id in ids {
            if let Some(doc_id) = self.commit_owner(*id)? {
                by_document.entry(doc_id).or_default().push(*id);
            }
        }

        let mut removed = 0;
        for (doc_id, commits) in by_document {
            self.with_document_lock(doc_id, || {
                let mut batch = WriteBatch::default();
                for id in &commits {
                    self.stage_commit_delete(&mut batch, doc_id, *id)?;
                }
                // Keep the count in step if the document itself is still stored
                if let Ok(mut meta) = self.load_metadata(doc_id) {
                    meta.commit_count = meta.commit_count.saturating_sub(commits.len() as u64);
                    batch.put_cf(self.cf(CF_METADATA)?, doc_id.as_uuid().as_bytes(), meta.encode()?);
                }
                self.write(batch)
            })?;
            removed += commits.len();
        }
        log::debug!("Removed {removed} of {} requested commits", ids.len());
        Ok(removed)
    }

    fn commit_count(&self) -> Result<usize, StoreError> {
        let cf = self.cf(CF_COMMIT_INDEX)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }
}

impl DocumentStore for RocksDocumentStore {
    fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let doc_id = document.id();
        self.with_document_lock(doc_id, || {
            if self.document_exists(doc_id)? {
                return Err(StoreError::AlreadyExists(doc_id));
            }

            let record = encode_record(document)?;
            let meta = DocumentMetadata::for_record(document, 0, &record);
            let key = doc_id.as_uuid().as_bytes().to_vec();

            let mut batch = WriteBatch::default();
            batch.put_cf(self.cf(CF_DOCUMENTS)?, &key, &record.bytes);
            batch.put_cf(self.cf(CF_METADATA)?, &key, meta.encode()?);
            self.write(batch)
        })
    }

    fn load_document(&self, id: DocumentId) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_uuid().as_bytes())? {
            Some(bytes) => decode_record(&bytes),
            None => Err(StoreError::DocumentNotFound(id)),
        }
    }

    fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut documents = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            documents.push(decode_record::<Document>(&value)?);
        }
        documents.sort_by_key(|doc| (doc.created(), doc.id()));
        Ok(documents)
    }

    fn delete_document(&self, id: DocumentId) -> Result<usize, StoreError> {
        let removed = self.with_document_lock(id, || {
            if !self.document_exists(id)? {
                return Err(StoreError::DocumentNotFound(id));
            }

            let key = id.as_uuid().as_bytes().to_vec();
            let mut batch = WriteBatch::default();
            batch.delete_cf(self.cf(CF_DOCUMENTS)?, &key);
            batch.delete_cf(self.cf(CF_METADATA)?, &key);

            let commits = self.commit_keys(id)?;
            for (commit_id, _) in &commits {
                self.stage_commit_delete(&mut batch, id, *commit_id)?;
            }
            self.write(batch)?;
            Ok(commits.len())
        })?;
        log::info!("Deleted document {id} and {removed} commits");
        Ok(removed)
    }

    fn apply(&self, batch: RevisionBatch) -> Result<(), StoreError> {
        let document = batch.validate()?;
        let doc_id = batch.document_id();

        self.with_document_lock(doc_id, || {
            let meta = self.load_metadata(doc_id)?;
            if meta.version != batch.expected_version() {
                return Err(StoreError::VersionConflict {
                    expected: batch.expected_version(),
                    actual: meta.version,
                });
            }
            for id in batch.removed() {
                match self.commit_owner(*id)? {
                    Some(owner) if owner == doc_id => {}
                    Some(owner) => {
                        return Err(StoreError::InvalidBatch(format!(
                            "commit {id} belongs to document {owner}"
                        )))
                    }
                    None => return Err(StoreError::CommitNotFound(*id)),
                }
            }

            let cf_commits = self.cf(CF_COMMITS)?;
            let cf_index = self.cf(CF_COMMIT_INDEX)?;
            let mut write = WriteBatch::default();
            for commit in batch.created() {
                let record = encode_record(commit)?;
                write.put_cf(cf_commits, Self::commit_key(doc_id, commit.id()), &record.bytes);
                write.put_cf(cf_index, commit.id().as_uuid().as_bytes(), doc_id.as_uuid().as_bytes());
            }
            for id in batch.removed() {
                self.stage_commit_delete(&mut write, doc_id, *id)?;
            }

            let commit_count = (meta.commit_count + batch.created().len() as u64)
                .saturating_sub(batch.removed().len() as u64);
            let record = encode_record(document)?;
            let new_meta = DocumentMetadata::for_record(document, commit_count, &record);
            let key = doc_id.as_uuid().as_bytes().to_vec();
            write.put_cf(self.cf(CF_DOCUMENTS)?, &key, &record.bytes);
            write.put_cf(self.cf(CF_METADATA)?, &key, new_meta.encode()?);

            self.write(write)?;
            log::debug!(
                "Applied batch to {doc_id}: +{} -{} commits, version {} -> {}",
                batch.created().len(),
                batch.removed().len(),
                meta.version,
                new_meta.version
            );
            Ok(())
        })
    }
}
