use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "timelock";
pub const APP_NAME: &str = "vault";

/// Overrides the platform data directory when set.
pub const DATA_DIR_ENV: &str = "TIMELOCK_DATA_DIR";

pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| VaultError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Where each piece of vault state lives under one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    root: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("vault.db")
    }

    pub fn blob_root(&self) -> PathBuf {
        self.root.join("blobs")
    }

    /// Only used by the file key backend. Kept apart from the database and
    /// blobs so neither alone is enough to read content.
    pub fn key_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}
