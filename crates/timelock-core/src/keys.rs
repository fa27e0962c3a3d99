//! Per-item key custody.
//!
//! Every vault item owns exactly one 256-bit key, generated from the OS RNG
//! and held in a [`SecureKeyStore`] that lives apart from the item database.
//! Keys are never derived from each other and never reused across items.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::models::ItemId;

pub const ITEM_KEY_LEN: usize = 32;
pub const DEFAULT_KEYRING_SERVICE: &str = "com.timelock.encryption";

const KEY_FILE_EXT: &str = "key";

/// Failure reported by a key store backend.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct KeyStoreError(pub String);

/// Device-bound secret storage, scoped to a private namespace.
///
/// `delete` of an absent entry must succeed.
pub trait SecureKeyStore: Send + Sync {
    fn put(&self, account: &str, secret: &[u8]) -> std::result::Result<(), KeyStoreError>;
    fn get(&self, account: &str) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError>;
    fn delete(&self, account: &str) -> std::result::Result<(), KeyStoreError>;
}

// ── Item keys ───────────────────────────────────────────────────────────────

/// A 256-bit item key. Zeroized on drop.
#[derive(Clone)]
pub struct ItemKey(Zeroizing<[u8; ITEM_KEY_LEN]>);

impl ItemKey {
    pub fn expose(&self) -> &[u8; ITEM_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ItemKey(<redacted>)")
    }
}

impl PartialEq for ItemKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

// ── Custodian ───────────────────────────────────────────────────────────────

/// Generates, retrieves and deletes item keys over a [`SecureKeyStore`].
#[derive(Clone)]
pub struct KeyCustodian {
    store: Arc<dyn SecureKeyStore>,
}

impl KeyCustodian {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self { store }
    }

    /// Generate a fresh key for `item` and persist it, replacing any stale
    /// entry under the same id.
    pub fn generate_and_store(&self, item: &ItemId) -> Result<ItemKey> {
        let mut bytes = Zeroizing::new([0u8; ITEM_KEY_LEN]);
        OsRng
            .try_fill_bytes(&mut bytes[..])
            .map_err(|e| VaultError::KeyGenerationFailed(e.to_string()))?;
        self.store
            .put(&item.to_string(), &bytes[..])
            .map_err(|e| VaultError::KeyStorageFailed {
                item: *item,
                reason: e.0,
            })?;
        debug!(%item, "item key stored");
        Ok(ItemKey(bytes))
    }

    pub fn retrieve(&self, item: &ItemId) -> Result<ItemKey> {
        let stored = self
            .store
            .get(&item.to_string())
            .map_err(|e| VaultError::KeyRetrievalFailed {
                item: *item,
                reason: e.0,
            })?
            .ok_or(VaultError::KeyNotFound(*item))?;
        if stored.len() != ITEM_KEY_LEN {
            return Err(VaultError::KeyRetrievalFailed {
                item: *item,
                reason: format!("stored key has {} bytes", stored.len()),
            });
        }
        let mut bytes = Zeroizing::new([0u8; ITEM_KEY_LEN]);
        bytes.copy_from_slice(&stored);
        Ok(ItemKey(bytes))
    }

    /// Remove the key for `item`. An absent key is already deleted.
    pub fn delete(&self, item: &ItemId) -> Result<()> {
        self.store
            .delete(&item.to_string())
            .map_err(|e| VaultError::KeyDeleteFailed {
                item: *item,
                reason: e.0,
            })?;
        debug!(%item, "item key deleted");
        Ok(())
    }
}

// ── OS keyring ──────────────────────────────────────────────────────────────

/// Platform credential store (Keychain, Secret Service, Credential Manager).
/// Entries are scoped to `service`; the account is the item id.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> std::result::Result<Entry, KeyStoreError> {
        Entry::new(&self.service, account).map_err(|e| KeyStoreError(format!("keyring init: {e}")))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl SecureKeyStore for KeyringStore {
    fn put(&self, account: &str, secret: &[u8]) -> std::result::Result<(), KeyStoreError> {
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(secret));
        self.entry(account)?
            .set_password(&encoded)
            .map_err(|e| KeyStoreError(format!("store key: {e}")))
    }

    fn get(&self, account: &str) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        let encoded = match self.entry(account)?.get_password() {
            Ok(encoded) => Zeroizing::new(encoded),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(KeyStoreError(format!("load key: {e}"))),
        };
        let decoded = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| KeyStoreError(format!("decode key: {e}")))?;
        Ok(Some(Zeroizing::new(decoded)))
    }

    fn delete(&self, account: &str) -> std::result::Result<(), KeyStoreError> {
        match self.entry(account)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyStoreError(format!("delete key: {e}"))),
        }
    }
}

// ── Restricted key files ────────────────────────────────────────────────────

/// Headless fallback: one owner-only file per key in a directory kept apart
/// from the database and blob roots.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        set_owner_only(&dir, 0o700)?;
        Ok(Self { dir })
    }

    fn key_path(&self, account: &str) -> std::result::Result<PathBuf, KeyStoreError> {
        if account.is_empty()
            || !account
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(KeyStoreError(format!("invalid key account: {account:?}")));
        }
        Ok(self.dir.join(format!("{account}.{KEY_FILE_EXT}")))
    }
}

impl SecureKeyStore for FileKeyStore {
    fn put(&self, account: &str, secret: &[u8]) -> std::result::Result<(), KeyStoreError> {
        let path = self.key_path(account)?;
        let io_err = |e: std::io::Error| KeyStoreError(format!("write key file: {e}"));
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        set_owner_only(tmp.path(), 0o600).map_err(|e| KeyStoreError(e.to_string()))?;
        tmp.write_all(secret).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path)
            .map_err(|e| KeyStoreError(format!("persist key file: {}", e.error)))?;
        Ok(())
    }

    fn get(&self, account: &str) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        let path = self.key_path(account)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyStoreError(format!("read key file: {e}"))),
        }
    }

    fn delete(&self, account: &str) -> std::result::Result<(), KeyStoreError> {
        let path = self.key_path(account)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyStoreError(format!("remove key file: {e}"))),
        }
    }
}

#[cfg(unix)]
pub(crate) fn set_owner_only(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn set_owner_only(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Process-local store for tests and throwaway vaults.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn put(&self, account: &str, secret: &[u8]) -> std::result::Result<(), KeyStoreError> {
        self.entries
            .lock()
            .insert(account.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn get(&self, account: &str) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        Ok(self.entries.lock().get(account).cloned())
    }

    fn delete(&self, account: &str) -> std::result::Result<(), KeyStoreError> {
        self.entries.lock().remove(account);
        Ok(())
    }
}
