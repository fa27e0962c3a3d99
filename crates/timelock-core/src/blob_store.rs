//! On-disk store for sealed item blobs.
//!
//! Layout under the root:
//!   {item_id}/blob        sealed content
//!   {item_id}/thumbnail   sealed preview (visual media only)
//!
//! Bytes are stored exactly as given; the store never sees plaintext.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, VaultError};
use crate::keys::set_owner_only;
use crate::models::{BlobRef, ItemId};

const CONTENT_NAME: &str = "blob";
const THUMBNAIL_NAME: &str = "thumbnail";

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        set_owner_only(&root, 0o700)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, item: &ItemId, bytes: &[u8]) -> Result<BlobRef> {
        self.write_named(item, CONTENT_NAME, bytes)
    }

    pub fn write_thumbnail(&self, item: &ItemId, bytes: &[u8]) -> Result<BlobRef> {
        self.write_named(item, THUMBNAIL_NAME, bytes)
    }

    pub fn read(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        let path = self.resolve(blob)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(VaultError::BlobNotFound(blob.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, blob: &BlobRef) -> bool {
        self.resolve(blob).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Remove every blob belonging to `item`. Missing data is not an error.
    pub fn delete_all(&self, item: &ItemId) -> Result<()> {
        let dir = self.item_dir(item);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(%item, "removed blob directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn item_dir(&self, item: &ItemId) -> PathBuf {
        self.root.join(item.to_string())
    }

    fn write_named(&self, item: &ItemId, name: &str, bytes: &[u8]) -> Result<BlobRef> {
        let blob = BlobRef::new(item, name);
        let dir = self.item_dir(item);
        let write_err = |e: std::io::Error| VaultError::BlobWriteFailed(format!("{blob}: {e}"));
        let perm_err = |e: VaultError| VaultError::BlobWriteFailed(format!("{blob}: {e}"));

        fs::create_dir_all(&dir).map_err(write_err)?;
        set_owner_only(&dir, 0o700).map_err(perm_err)?;

        // Write beside the target and rename so readers never see a torn blob.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        set_owner_only(tmp.path(), 0o600).map_err(perm_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(dir.join(name))
            .map_err(|e| VaultError::BlobWriteFailed(format!("{blob}: {}", e.error)))?;

        debug!(%item, blob = %blob, len = bytes.len(), "blob written");
        Ok(blob)
    }

    /// Map a reference to a path, refusing anything outside the known layout.
    fn resolve(&self, blob: &BlobRef) -> Result<PathBuf> {
        let invalid = || VaultError::BlobNotFound(format!("invalid blob reference: {blob}"));
        let (item, name) = blob.as_str().split_once('/').ok_or_else(invalid)?;
        let item: ItemId = item.parse().map_err(|_| invalid())?;
        if name != CONTENT_NAME && name != THUMBNAIL_NAME {
            return Err(invalid());
        }
        Ok(self.item_dir(&item).join(name))
    }
}
