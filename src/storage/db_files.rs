use std::fs;
use std::path::{Path, PathBuf};

use crate::common::Result;

/// On-disk layout of one engine instance: table files under `data/`, the
/// write-ahead log under `wal/`, table metadata under `catalog/`.
pub struct DbFiles {
    root: PathBuf,
    data_dir: PathBuf,
    wal_dir: PathBuf,
    catalog_dir: PathBuf,
}

impl DbFiles {
    pub fn new(root: &Path) -> Result<Self> {
        let root = root.to_path_buf();
        let data_dir = root.join("data");
        let wal_dir = root.join("wal");
        let catalog_dir = root.join("catalog");

        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&wal_dir)?;
        fs::create_dir_all(&catalog_dir)?;

        Ok(Self {
            root,
            data_dir,
            wal_dir,
            catalog_dir,
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    pub fn log_path(&self) -> PathBuf {
        self.wal_dir.join("wal.log")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_dir.join("tables.meta")
    }

    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}
