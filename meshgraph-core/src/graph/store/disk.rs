/*
    disk.rs - Durable node store backed by an append-only log

    Every winning field update is appended as a framed record before it is
    applied to the in-memory index. On open the log is replayed through the
    resolver, so records may appear in any order and duplicates are
    harmless.

    Record framing: [seq:8][timestamp:8][len:4][data:len][crc32:4], with
    data being the bincode-encoded (node_id, field, triple) record.
*/

use crate::graph::model::{FieldTriple, NodeFields, NodeId};
use crate::graph::resolver;
use crate::graph::store::errors::{StoreError, StoreResult};
use crate::graph::store::memory::MemoryStore;
use crate::graph::store::NodeStore;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// One persisted field update
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogRecord {
    node_id: NodeId,
    field: String,
    triple: FieldTriple,
}

struct LogWriter {
    file: BufWriter<File>,
    seq: u64,
}

impl LogWriter {
    fn append(&mut self, record: &LogRecord) -> StoreResult<()> {
        let data = bincode::serialize(record)?;
        let checksum = crc32fast::hash(&data);

        self.file.write_all(&self.seq.to_le_bytes())?;
        self.file.write_all(&record.triple.timestamp.to_le_bytes())?;
        self.file.write_all(&(data.len() as u32).to_le_bytes())?;
        self.file.write_all(&data)?;
        self.file.write_all(&checksum.to_le_bytes())?;
        self.file.flush()?;

        self.seq += 1;
        Ok(())
    }
}

/// Durable store: append-only log plus an in-memory index rebuilt on open
pub struct DiskStore {
    path: PathBuf,
    log: Mutex<LogWriter>,
    cache: MemoryStore,
}

impl DiskStore {
    /// Open or create a store at `dir/graph.log`, replaying any existing
    /// records
    pub fn open(dir: &std::path::Path) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("graph.log");

        let cache = MemoryStore::new();
        let mut seq = 0;
        if path.exists() {
            seq = Self::replay(&path, &cache)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let log = Mutex::new(LogWriter { file: BufWriter::new(file), seq });

        Ok(DiskStore { path, log, cache })
    }

    /// Replay the log into the given index, returning the next sequence
    /// number
    fn replay(path: &std::path::Path, cache: &MemoryStore) -> StoreResult<u64> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut seq = 0;

        loop {
            let mut seq_buf = [0u8; 8];
            if reader.read_exact(&mut seq_buf).is_err() {
                break; // EOF
            }
            seq = u64::from_le_bytes(seq_buf);

            let mut ts_buf = [0u8; 8];
            reader.read_exact(&mut ts_buf)?;

            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;

            let mut checksum_buf = [0u8; 4];
            reader.read_exact(&mut checksum_buf)?;
            let checksum = u32::from_le_bytes(checksum_buf);

            if crc32fast::hash(&data) != checksum {
                return Err(StoreError::CorruptedData(format!(
                    "Invalid checksum at seq {}",
                    seq
                )));
            }

            let record: LogRecord = bincode::deserialize(&data)?;
            cache.apply_field_update(&record.node_id, &record.field, record.triple)?;
            seq += 1;
        }

        Ok(seq)
    }

    /// Path of the backing log file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl NodeStore for DiskStore {
    fn apply_field_update(
        &self,
        node_id: &str,
        field: &str,
        incoming: FieldTriple,
    ) -> StoreResult<bool> {
        // Cheap pre-check so losing updates never touch the log. Replay
        // re-runs the resolver, so a racing duplicate append is harmless.
        if !resolver::incoming_wins(self.cache.field(node_id, field)?.as_ref(), &incoming) {
            return Ok(false);
        }

        let record = LogRecord {
            node_id: node_id.to_string(),
            field: field.to_string(),
            triple: incoming.clone(),
        };

        {
            let mut log = self
                .log
                .lock()
                .map_err(|_| StoreError::Internal("log lock poisoned".to_string()))?;
            log.append(&record)?;
        }

        self.cache.apply_field_update(node_id, field, incoming)
    }

    fn node_fields(&self, node_id: &str) -> StoreResult<NodeFields> {
        self.cache.node_fields(node_id)
    }

    fn field(&self, node_id: &str, field: &str) -> StoreResult<Option<FieldTriple>> {
        self.cache.field(node_id, field)
    }

    fn node_ids(&self) -> StoreResult<Vec<NodeId>> {
        self.cache.node_ids()
    }

    fn max_timestamp(&self) -> StoreResult<u64> {
        self.cache.max_timestamp()
    }
}
