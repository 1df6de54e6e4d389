//! Index snapshot persistence.
//!
//! A snapshot is serialized as `{version, dimension, metric, kind,
//! structure}` with bincode, framed by a crc32 trailer, and published with
//! the same tmp-then-rename discipline as the document store. Loading
//! validates the checksum and the dimension/metric against the caller's
//! configuration; mismatches are errors, never coerced.

use std::io::{Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};
use crate::index::manager::IndexSnapshot;
use crate::index::{AnnIndex, FlatIndex, HnswIndex, IndexConfig, IndexKind, IvfIndex};
use crate::storage::Storage;
use crate::vector::DistanceMetric;

/// Live snapshot file name.
pub const SNAPSHOT_FILE: &str = "index.bin";
/// Temporary file used for atomic snapshot publication.
pub const SNAPSHOT_TEMP_FILE: &str = "index.tmp";

#[derive(Debug, Serialize, Deserialize)]
enum PersistedStructure {
    Flat(FlatIndex),
    IvfFlat(IvfIndex),
    Hnsw(HnswIndex),
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u64,
    dimension: usize,
    metric: DistanceMetric,
    kind: IndexKind,
    structure: PersistedStructure,
}

/// Serialize a snapshot through the storage backend.
pub fn save_snapshot(storage: &dyn Storage, snapshot: &IndexSnapshot) -> Result<()> {
    let structure = snapshot.structure();
    let any = structure.as_any();

    let persisted_structure = match structure.kind() {
        IndexKind::Flat => any
            .downcast_ref::<FlatIndex>()
            .cloned()
            .map(PersistedStructure::Flat),
        IndexKind::IvfFlat => any
            .downcast_ref::<IvfIndex>()
            .cloned()
            .map(PersistedStructure::IvfFlat),
        IndexKind::Hnsw => any
            .downcast_ref::<HnswIndex>()
            .cloned()
            .map(PersistedStructure::Hnsw),
    }
    .ok_or_else(|| SagittaError::storage("index structure does not match its declared kind"))?;

    let persisted = PersistedSnapshot {
        version: snapshot.version(),
        dimension: structure.dimension(),
        metric: structure.metric(),
        kind: structure.kind(),
        structure: persisted_structure,
    };

    let body = bincode::serialize(&persisted)
        .map_err(|e| SagittaError::storage(format!("Failed to serialize index snapshot: {e}")))?;
    let checksum = crc32fast::hash(&body);

    let mut output = storage.create_output(SNAPSHOT_TEMP_FILE)?;
    output
        .write_all(&body)
        .map_err(|e| SagittaError::storage(format!("Failed to write index snapshot: {e}")))?;
    output
        .write_u32::<LittleEndian>(checksum)
        .map_err(|e| SagittaError::storage(format!("Failed to write snapshot checksum: {e}")))?;
    output.close()?;

    storage.rename_file(SNAPSHOT_TEMP_FILE, SNAPSHOT_FILE)?;
    storage.sync()
}

/// Load a snapshot previously written by [`save_snapshot`], validating it
/// against the expected configuration.
pub fn load_snapshot(storage: &dyn Storage, config: &IndexConfig) -> Result<IndexSnapshot> {
    let mut input = storage.open_input(SNAPSHOT_FILE)?;
    let mut raw = Vec::new();
    input
        .read_to_end(&mut raw)
        .map_err(|e| SagittaError::storage(format!("Failed to read index snapshot: {e}")))?;

    if raw.len() < 4 {
        return Err(SagittaError::storage("index snapshot truncated"));
    }
    let (body, trailer) = raw.split_at(raw.len() - 4);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != expected {
        return Err(SagittaError::storage("index snapshot checksum mismatch"));
    }

    let persisted: PersistedSnapshot = bincode::deserialize(body)
        .map_err(|e| SagittaError::storage(format!("Failed to decode index snapshot: {e}")))?;

    if persisted.dimension != config.dimension {
        return Err(SagittaError::dimension_mismatch(
            config.dimension,
            persisted.dimension,
        ));
    }
    if persisted.metric != config.metric {
        return Err(SagittaError::storage(format!(
            "index snapshot metric mismatch: stored {}, configured {}",
            persisted.metric.name(),
            config.metric.name()
        )));
    }

    let index: Box<dyn AnnIndex> = match persisted.structure {
        PersistedStructure::Flat(index) => Box::new(index),
        PersistedStructure::IvfFlat(index) => Box::new(index),
        PersistedStructure::Hnsw(index) => Box::new(index),
    };

    Ok(IndexSnapshot::new(persisted.version, index))
}
