//! Storage layer for Lectern
//!
//! Owns the on-disk layout: a SQLite passage store and the keyword index
//! directory, both under `<data_dir>/store`.

pub mod database;

use crate::error::{LecternError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use database::{Database, DbPool, DbStats, UpsertStats};

/// Storage manager that creates the data directory layout and opens the database
pub struct StorageManager {
    pub database: Arc<Database>,
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let store = base_path.join("store");
        for dir in [store.clone(), store.join("keywords")] {
            std::fs::create_dir_all(&dir).map_err(|e| LecternError::Io {
                source: e,
                context: format!("Failed to create storage directory: {}", dir.display()),
            })?;
        }

        let database = Arc::new(Database::new(&store.join("passages.sqlite"))?);
        tracing::debug!("Storage opened at {}", base_path.display());

        Ok(Self {
            database,
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding everything that can be rebuilt from source passages
    pub fn store_dir(&self) -> PathBuf {
        self.base_path.join("store")
    }

    pub fn keyword_index_dir(&self) -> PathBuf {
        self.store_dir().join("keywords")
    }

    pub fn database_path(&self) -> PathBuf {
        self.store_dir().join("passages.sqlite")
    }

    /// Get combined storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            db: self.database.stats()?,
            database_size: file_size(&self.database_path())?,
            keyword_index_size: dir_size(&self.keyword_index_dir())?,
        })
    }
}

fn file_size(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(LecternError::Io {
            source: e,
            context: format!("Failed to get file metadata: {}", path.display()),
        }),
    }
}

/// Calculate directory size recursively
fn dir_size(path: &Path) -> Result<u64> {
    if !path.is_dir() {
        return Ok(0);
    }

    let entries = std::fs::read_dir(path).map_err(|e| LecternError::Io {
        source: e,
        context: format!("Failed to read directory: {}", path.display()),
    })?;

    let mut size = 0u64;
    for entry in entries {
        let entry = entry.map_err(|e| LecternError::Io {
            source: e,
            context: "Failed to read directory entry".to_string(),
        })?;
        let path = entry.path();
        size += if path.is_dir() {
            dir_size(&path)?
        } else {
            file_size(&path)?
        };
    }
    Ok(size)
}

/// Combined storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub db: DbStats,
    pub database_size: u64,
    pub keyword_index_size: u64,
}

impl StorageStats {
    pub fn total_size(&self) -> u64 {
        self.database_size + self.keyword_index_size
    }

    /// Format size as human-readable string
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Passage;
    use tempfile::TempDir;

    #[test]
    fn test_storage_layout() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(storage.store_dir().exists());
        assert!(storage.keyword_index_dir().exists());
        assert!(storage.database_path().exists());
        assert_eq!(storage.base_path(), temp_dir.path());
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
        storage
            .database
            .upsert_passages(&[Passage::new(1, "bio.pdf", 0, "Cells divide by mitosis")])
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.db.passage_count, 1);
        assert_eq!(stats.db.source_count, 1);
        assert!(stats.total_size() > 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(StorageStats::format_size(0), "0.00 B");
        assert_eq!(StorageStats::format_size(1023), "1023.00 B");
        assert_eq!(StorageStats::format_size(1024), "1.00 KB");
        assert_eq!(StorageStats::format_size(1024 * 1024), "1.00 MB");
        assert_eq!(StorageStats::format_size(1024 * 1024 * 1024), "1.00 GB");
    }
}
