//! Content-addressed scratch directories for external tool runs.
//!
//! The registry is an explicit map from sequence to directory handle. A
//! directory is created on first use and reused for the same sequence in
//! later runs. Each handle carries an async lock so two tasks working on
//! the same sequence serialise instead of racing in one directory; distinct
//! sequences never share a handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

use aptamyx_common::Result;

use crate::sequence::Sequence;

#[derive(Debug)]
pub struct WorkDir {
    key: String,
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl WorkDir {
    /// Content key (short hash of the sequence).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive use of this directory until the guard is dropped.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// File names currently present, sorted. Empty if the directory is
    /// unreadable.
    pub async fn list_files(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(mut entries) = fs::read_dir(&self.path).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        names
    }
}

/// Maps sequences to `<root>/<namespace>_<key>` directories.
#[derive(Debug)]
pub struct WorkDirRegistry {
    root: PathBuf,
    namespace: String,
    dirs: Mutex<HashMap<Sequence, Arc<WorkDir>>>,
}

impl WorkDirRegistry {
    pub fn new<P: AsRef<Path>>(root: P, namespace: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            namespace: namespace.into(),
            dirs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the directory for `sequence` has (or would have).
    pub fn path_for(&self, sequence: &Sequence) -> PathBuf {
        self.root
            .join(format!("{}_{}", self.namespace, sequence.content_key()))
    }

    /// Handle for `sequence`, creating the directory on first use.
    pub async fn acquire(&self, sequence: &Sequence) -> Result<Arc<WorkDir>> {
        let (handle, is_new) = {
            let mut dirs = self.dirs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match dirs.get(sequence) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let handle = Arc::new(WorkDir {
                        key: sequence.content_key(),
                        path: self.path_for(sequence),
                        lock: AsyncMutex::new(()),
                    });
                    dirs.insert(sequence.clone(), handle.clone());
                    (handle, true)
                }
            }
        };

        // create_dir_all is idempotent; every caller ensures the directory exists
        fs::create_dir_all(handle.path()).await?;
        if is_new {
            debug!(sequence = %sequence, dir = %handle.path().display(), "Work directory created");
        }
        Ok(handle)
    }

    /// Handle for `sequence` if one has been acquired in this process.
    pub fn get(&self, sequence: &Sequence) -> Option<Arc<WorkDir>> {
        self.dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(sequence)
            .cloned()
    }
}
