//! Layer snapshots on disk
//!
//! `<data_dir>/layers/<id>.layer` holds the committed state of one layer:
//!
//! ```text
//! "STRL" | format version (u32 LE) | CRC32 of body (u32 LE) | JSON body
//! ```
//!
//! Files are replaced atomically: temp file, fsync, rename, directory fsync.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::errors::{CatalogError, CatalogResult};
use super::LayerId;
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry};
use crate::store::{LayerState, SnapshotSink};
use crate::versioning::{VersionError, VersionResult};

const MAGIC: &[u8; 4] = b"STRL";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;
const EXTENSION: &str = "layer";

#[derive(Serialize)]
struct SnapshotBody<'a> {
    id: LayerId,
    state: &'a LayerState,
}

#[derive(Deserialize)]
struct OwnedSnapshotBody {
    id: LayerId,
    state: LayerState,
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn layers_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("layers")
}

pub fn layer_path(data_dir: &Path, id: LayerId) -> PathBuf {
    layers_dir(data_dir).join(format!("{}.{}", id, EXTENSION))
}

pub fn encode(id: LayerId, state: &LayerState) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(&SnapshotBody { id, state })?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compute_checksum(&body).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a snapshot; every failure is a corruption of `path`.
pub fn decode(path: &Path, bytes: &[u8]) -> CatalogResult<(LayerId, LayerState)> {
    let corrupted = |reason: String| CatalogError::CorruptedSnapshot {
        path: path.display().to_string(),
        reason,
    };
    if bytes.len() < HEADER_LEN {
        return Err(corrupted(format!("file too short ({} bytes)", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupted("bad magic".to_string()));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let version = word(4);
    if version != FORMAT_VERSION {
        return Err(corrupted(format!("unsupported format version {}", version)));
    }
    let body = &bytes[HEADER_LEN..];
    let expected = word(8);
    let actual = compute_checksum(body);
    if expected != actual {
        return Err(corrupted(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }
    let snapshot: OwnedSnapshotBody =
        serde_json::from_slice(body).map_err(|e| corrupted(format!("invalid body: {}", e)))?;
    snapshot
        .state
        .check_invariants()
        .map_err(|e| corrupted(e.to_string()))?;
    Ok((snapshot.id, snapshot.state))
}

/// Replaces `path` with `bytes` so readers see the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let temp_path = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    // Directory fsync makes the rename durable; not every platform allows it.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Loads every layer snapshot under `data_dir`, ordered by id.
pub fn load_all(data_dir: &Path) -> CatalogResult<Vec<(LayerId, LayerState)>> {
    let dir = layers_dir(data_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(&dir).map_err(|e| CatalogError::Io(format!("{}: {}", dir.display(), e)))?;
    let mut layers = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| CatalogError::Io(e.to_string()))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| CatalogError::Io(format!("{}: {}", path.display(), e)))?;
        let (id, state) = decode(&path, &bytes).map_err(|err| {
            log_event_with_fields(
                Event::SnapshotCorrupted,
                &[("path", &path.display().to_string()), ("reason", &err.to_string())],
            );
            err
        })?;
        Logger::info(
            Event::SnapshotLoaded.as_str(),
            &[("layer", &id.to_string()), ("path", &path.display().to_string())],
        );
        layers.push((id, state));
    }
    layers.sort_by_key(|(id, _)| *id);
    Ok(layers)
}

pub fn remove(data_dir: &Path, id: LayerId) -> CatalogResult<()> {
    let path = layer_path(data_dir, id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CatalogError::Io(format!("{}: {}", path.display(), e))),
    }
}

/// Persists one layer's committed state to its snapshot file.
pub struct FileSink {
    id: LayerId,
    path: PathBuf,
    metrics: Arc<MetricsRegistry>,
}

impl FileSink {
    pub fn new(data_dir: &Path, id: LayerId, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            id,
            path: layer_path(data_dir, id),
            metrics,
        }
    }
}

impl SnapshotSink for FileSink {
    fn persist(&self, state: &LayerState) -> VersionResult<()> {
        let bytes = encode(self.id, state)
            .map_err(|e| VersionError::Storage(format!("failed to encode layer {}: {}", self.id, e)))?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| VersionError::Storage(format!("failed to write {}: {}", self.path.display(), e)))?;
        self.metrics.increment_snapshots_persisted();
        Logger::trace(
            Event::SnapshotPersisted.as_str(),
            &[("layer", &self.id.to_string()), ("bytes", &bytes.len().to_string())],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryType;
    use crate::layer::{FeatureRow, LayerDefinition};
    use tempfile::TempDir;

    fn state() -> LayerState {
        let definition = LayerDefinition::new(GeometryType::Point, vec![]).unwrap();
        let mut state = LayerState::new(definition).unwrap();
        state.enable_versioning().unwrap();
        let mut ctx = state.begin_version();
        state.create_feature(&mut ctx, FeatureRow::default()).unwrap();
        state.finish_version(&ctx).unwrap();
        state
    }

    #[test]
    fn test_encode_decode() {
        let state = state();
        let bytes = encode(LayerId::new(4), &state).unwrap();
        assert_eq!(&bytes[0..4], b"STRL");
        let (id, decoded) = decode(Path::new("4.layer"), &bytes).unwrap();
        assert_eq!(id, LayerId::new(4));
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let mut bytes = encode(LayerId::new(1), &state()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        let err = decode(Path::new("1.layer"), &bytes).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_short_and_foreign_files_rejected() {
        assert!(decode(Path::new("x"), b"STR").is_err());
        let mut bytes = encode(LayerId::new(1), &state()).unwrap();
        bytes[0] = b'X';
        assert!(decode(Path::new("x"), &bytes).unwrap_err().to_string().contains("bad magic"));
    }

    #[test]
    fn test_sink_and_load_all() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(MetricsRegistry::new());
        for id in [2, 1] {
            FileSink::new(dir.path(), LayerId::new(id), metrics.clone())
                .persist(&state())
                .unwrap();
        }
        fs::write(layers_dir(dir.path()).join("notes.txt"), b"ignored").unwrap();

        let loaded = load_all(dir.path()).unwrap();
        let ids: Vec<_> = loaded.iter().map(|(id, _)| id.value()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(metrics.snapshot().snapshots_persisted, 2);

        remove(dir.path(), LayerId::new(1)).unwrap();
        remove(dir.path(), LayerId::new(1)).unwrap();
        assert_eq!(load_all(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_dir_loads_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(load_all(&dir.path().join("absent")).unwrap().is_empty());
    }
}
