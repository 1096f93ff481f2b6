//! Store configuration.

use std::path::PathBuf;

/// Configuration for the object store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base data directory
    pub data_dir: PathBuf,
}

impl StoreConfig {
    /// Creates a configuration rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Path of the object database.
    pub fn objects_path(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    /// Creates the data directory tree.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
