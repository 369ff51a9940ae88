use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::message::NodeId;
use crate::common::{Backoff, RegistryError};
use crate::config::RetryConfig;

/*
    Branches find each other through a shared, append-only directory of
    `{id, address}` records. Registering appends a record and hands back the
    next dense id. Readers only ever need the complete list, so start-up polls
    until every expected branch is present.
*/

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub id: NodeId,
    pub address: String,
}

pub trait Registry: Send + Sync {
    /// Appends `address` and returns the id assigned to it.
    fn register(&self, address: &str) -> Result<NodeId, RegistryError>;

    /// Every record so far, ordered by id.
    fn records(&self) -> Result<Vec<BranchRecord>, RegistryError>;
}

/// Polls `registry` with backoff until `expected` branches are listed.
pub async fn wait_for_branches(
    registry: &dyn Registry,
    expected: usize,
    retry: &RetryConfig,
) -> Result<Vec<BranchRecord>, RegistryError> {
    let mut backoff = Backoff::from_config(retry);
    loop {
        let records = registry.records()?;
        if records.len() >= expected {
            info!(branches = expected, waited_ms = backoff.elapsed_ms(), "all branches registered");
            return Ok(records);
        }
        debug!(found = records.len(), expected, "waiting for branches");
        if !backoff.wait().await {
            return Err(RegistryError::Timeout {
                expected,
                found: records.len(),
            });
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct RegistryDocument {
    branch_details: Vec<BranchRecord>,
}

/// JSON-file registry shared by branch processes on one host. Writers hold an
/// exclusive `flock` for the read-modify-write, so ids stay dense and unique.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(FileRegistry { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empties the registry, for a fresh simulation run.
    pub fn reset(&self) -> Result<(), RegistryError> {
        let mut file = self.open()?;
        file.lock_exclusive()
            .map_err(|e| RegistryError::Lock(e.to_string()))?;
        let result = write_document(&mut file, &RegistryDocument::default());
        file.unlock().map_err(|e| RegistryError::Lock(e.to_string()))?;
        result
    }

    fn open(&self) -> Result<File, RegistryError> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?)
    }
}

fn read_document(file: &mut File) -> Result<RegistryDocument, RegistryError> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut raw)?;
    if raw.trim().is_empty() {
        return Ok(RegistryDocument::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn write_document(file: &mut File, doc: &RegistryDocument) -> Result<(), RegistryError> {
    let raw = serde_json::to_vec(doc)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&raw)?;
    file.sync_data()?;
    Ok(())
}

impl Registry for FileRegistry {
    fn register(&self, address: &str) -> Result<NodeId, RegistryError> {
        let mut file = self.open()?;
        file.lock_exclusive()
            .map_err(|e| RegistryError::Lock(e.to_string()))?;

        let result = read_document(&mut file).and_then(|mut doc| {
            let id = doc.branch_details.len();
            doc.branch_details.push(BranchRecord {
                id,
                address: address.to_string(),
            });
            write_document(&mut file, &doc).map(|_| id)
        });

        file.unlock().map_err(|e| RegistryError::Lock(e.to_string()))?;
        let id = result?;
        info!(id, %address, path = %self.path.display(), "registered branch");
        Ok(id)
    }

    fn records(&self) -> Result<Vec<BranchRecord>, RegistryError> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path)?;
        file.lock_shared()
            .map_err(|e| RegistryError::Lock(e.to_string()))?;
        let result = read_document(&mut file);
        file.unlock().map_err(|e| RegistryError::Lock(e.to_string()))?;

        let mut records = result?.branch_details;
        records.sort_by_key(|record| record.id);
        Ok(records)
    }
}

/// In-process registry for branches sharing one runtime.
#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<Vec<BranchRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for MemoryRegistry {
    fn register(&self, address: &str) -> Result<NodeId, RegistryError> {
        let mut records = self.records.lock();
        let id = records.len();
        records.push(BranchRecord {
            id,
            address: address.to_string(),
        });
        Ok(id)
    }

    fn records(&self) -> Result<Vec<BranchRecord>, RegistryError> {
        Ok(self.records.lock().clone())
    }
}
