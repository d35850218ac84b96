use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{KeyStore, KeyTable};
use crate::error::StoreError;
use crate::timeout::TimeoutPolicy;

/// Default budget for a single load or save.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(2);

// Hand-off between a save and the blocking task writing it.
const PENDING: u8 = 0;
const RENAMING: u8 = 1;
const ABANDONED: u8 = 2;

/// Key table persisted as a pretty-printed JSON object.
///
/// Each save writes a uniquely named sibling temp file, fsyncs it and renames it over the target,
/// so readers see either the old table or the new one. A save that runs out of budget before the
/// rename starts is abandoned and its temp file discarded; once the rename has started the save
/// waits for its real outcome. A save that reports an error therefore never changed the table.
#[derive(Clone, Debug)]
pub struct JsonFileKeyStore {
    path: PathBuf,
    timeout: TimeoutPolicy,
}

impl JsonFileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), timeout: TimeoutPolicy::new(DEFAULT_STORAGE_TIMEOUT) }
    }

    /// Builder-style: bound every load/save by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TimeoutPolicy::new(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn temp_prefix(&self) -> String {
        let name =
            self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        format!(".{name}.")
    }

    async fn read_table(path: &Path) -> Result<KeyTable, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Blocking half of `save`. Returns `Ok(false)` when abandoned before the rename.
    fn write_table(
        dir: &Path,
        prefix: &str,
        path: &Path,
        json: &[u8],
        state: &AtomicU8,
    ) -> std::io::Result<bool> {
        let mut tmp = tempfile::Builder::new().prefix(prefix).suffix(".tmp").tempfile_in(dir)?;
        tmp.write_all(json)?;
        tmp.as_file().sync_all()?;

        if state.compare_exchange(PENDING, RENAMING, Ordering::AcqRel, Ordering::Acquire).is_err() {
            // Dropping the temp file removes it.
            return Ok(false);
        }
        tmp.persist(path)?;
        Ok(true)
    }
}

#[async_trait]
impl KeyStore for JsonFileKeyStore {
    async fn load(&self) -> Result<KeyTable, StoreError> {
        self.timeout.execute(Self::read_table(&self.path)).await?
    }

    async fn save(&self, table: &KeyTable) -> Result<(), StoreError> {
        let mut json = serde_json::to_vec_pretty(table)?;
        json.push(b'\n');

        let state = Arc::new(AtomicU8::new(PENDING));
        let (dir, prefix, path) = (self.parent_dir(), self.temp_prefix(), self.path.clone());
        let task_state = state.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            Self::write_table(&dir, &prefix, &path, &json, &task_state)
        });

        let joined = match self.timeout.execute(&mut task).await {
            Ok(joined) => joined,
            Err(elapsed) => {
                let abandoned = state
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if abandoned {
                    return Err(StoreError::Timeout(elapsed));
                }
                // The rename is already under way; report what actually happened.
                task.await
            }
        };

        match joined.map_err(std::io::Error::other)? {
            Ok(true) => Ok(()),
            Ok(false) => Err(std::io::Error::other("save abandoned").into()),
            Err(err) => Err(err.into()),
        }
    }
}
