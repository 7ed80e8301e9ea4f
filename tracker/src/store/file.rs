use super::{StoreBackend, StoreError};
use elset_types::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

const SNAPSHOT_FILE: &str = "elsets.json";
const HISTORY_FILE: &str = "history.jsonl";

/// Directory-backed store.
///
/// `elsets.json` holds the current rows keyed by catalog number and is
/// replaced atomically on every upsert. `history.jsonl` gets one line per
/// put and is synced before the put returns.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    current: Mutex<BTreeMap<CatalogId, ElementSet>>,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| io_err(&dir, source))?;

        let snapshot = dir.join(SNAPSHOT_FILE);
        let current = match fs::read(&snapshot) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(io_err(&snapshot, source)),
        };
        info!(dir = %dir.display(), rows = current.len(), "Opened element set store");

        Ok(FileBackend {
            dir,
            current: Mutex::new(current),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<CatalogId, ElementSet>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self, rows: &BTreeMap<CatalogId, ElementSet>) -> Result<(), StoreError> {
        let path = self.dir.join(SNAPSHOT_FILE);
        let temp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(rows)?;

        let mut file = File::create(&temp_path).map_err(|e| io_err(&temp_path, e))?;
        file.write_all(&bytes).map_err(|e| io_err(&temp_path, e))?;
        file.sync_all().map_err(|e| io_err(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|e| io_err(&path, e))?;
        debug!(path = %path.display(), rows = rows.len(), "Wrote snapshot");
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl StoreBackend for FileBackend {
    fn get(&self, object_id: CatalogId) -> Result<Option<ElementSet>, StoreError> {
        Ok(self.lock().get(&object_id).cloned())
    }

    fn upsert(&self, set: &ElementSet) -> Result<(), StoreError> {
        let mut rows = self.lock();
        let mut next = rows.clone();
        next.insert(set.object_id, set.clone());
        // Only swap the in-memory rows once the snapshot is on disk
        self.write_snapshot(&next)?;
        *rows = next;
        Ok(())
    }

    fn append_history(&self, entry: &ElementSetHistory) -> Result<(), StoreError> {
        let path = self.dir.join(HISTORY_FILE);
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        // The snapshot lock also orders history appends
        let _rows = self.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.write_all(&line).map_err(|e| io_err(&path, e))?;
        file.sync_data().map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn history(&self, object_id: CatalogId) -> Result<Vec<ElementSetHistory>, StoreError> {
        let path = self.dir.join(HISTORY_FILE);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path, e)),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_err(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ElementSetHistory = serde_json::from_str(&line)?;
            if entry.object_id == object_id {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn list(&self) -> Result<Vec<ElementSet>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }
}
