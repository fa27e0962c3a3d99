//! Shared fixtures for vault integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use zeroize::Zeroizing;

use timelock_core::blob_store::BlobStore;
use timelock_core::keys::{KeyStoreError, MemoryKeyStore, SecureKeyStore};
use timelock_core::notify::{NotificationGateway, UnlockNotice};
use timelock_core::repository::{
    GuardedUpdate, ItemFilter, ItemRepository, SortOrder, SqliteRepository,
};
use timelock_core::scheduler::FixedClock;
use timelock_core::{ItemId, ItemMutation, Result, TimeVault, VaultError, VaultItem};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 5, 1, 8, 0, 0).unwrap()
}

// ── Notification gateway ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeEvent {
    Scheduled(UnlockNotice),
    Cancelled(ItemId),
}

#[derive(Default)]
pub struct RecordingGateway {
    events: Mutex<Vec<NoticeEvent>>,
    pub fail: AtomicBool,
}

impl RecordingGateway {
    pub fn events(&self) -> Vec<NoticeEvent> {
        self.events.lock().clone()
    }

    /// The notice that would currently fire for `item`, if any.
    pub fn pending(&self, item: &ItemId) -> Option<UnlockNotice> {
        let mut pending = None;
        for event in self.events.lock().iter() {
            match event {
                NoticeEvent::Scheduled(n) if n.item == *item => pending = Some(n.clone()),
                NoticeEvent::Cancelled(id) if id == item => pending = None,
                _ => {}
            }
        }
        pending
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VaultError::NotificationFailed("gateway offline".into()));
        }
        Ok(())
    }
}

impl NotificationGateway for RecordingGateway {
    fn schedule(&self, notice: &UnlockNotice) -> Result<()> {
        self.check()?;
        self.events
            .lock()
            .push(NoticeEvent::Scheduled(notice.clone()));
        Ok(())
    }

    fn cancel(&self, item: &ItemId) -> Result<()> {
        self.check()?;
        self.events.lock().push(NoticeEvent::Cancelled(*item));
        Ok(())
    }
}

// ── Repository with injectable failures ─────────────────────────────────────

pub struct FailingRepository {
    inner: SqliteRepository,
    pub fail_insert: AtomicBool,
    pub fail_commit: AtomicBool,
}

impl FailingRepository {
    pub fn new() -> Self {
        Self {
            inner: SqliteRepository::open_in_memory().unwrap(),
            fail_insert: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
        }
    }
}

impl ItemRepository for FailingRepository {
    fn insert(&self, item: &VaultItem) -> Result<()> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(VaultError::RepositoryWriteFailed("injected insert failure".into()));
        }
        self.inner.insert(item)
    }

    fn get(&self, id: &ItemId) -> Result<VaultItem> {
        self.inner.get(id)
    }

    fn query(&self, filter: &ItemFilter, order: SortOrder) -> Result<Vec<VaultItem>> {
        self.inner.query(filter, order)
    }

    fn update(&self, id: &ItemId, mutation: &ItemMutation) -> Result<VaultItem> {
        self.inner.update(id, mutation)
    }

    fn delete(&self, id: &ItemId) -> Result<bool> {
        self.inner.delete(id)
    }

    fn commit_batch(&self, updates: &[GuardedUpdate]) -> Result<Vec<ItemId>> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(VaultError::RepositoryWriteFailed("injected commit failure".into()));
        }
        self.inner.commit_batch(updates)
    }
}

// ── Key store with injectable delete failure ────────────────────────────────

#[derive(Default)]
pub struct FlakyKeyStore {
    pub inner: MemoryKeyStore,
    pub fail_delete: AtomicBool,
}

impl SecureKeyStore for FlakyKeyStore {
    fn put(&self, account: &str, secret: &[u8]) -> std::result::Result<(), KeyStoreError> {
        self.inner.put(account, secret)
    }

    fn get(&self, account: &str) -> std::result::Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        self.inner.get(account)
    }

    fn delete(&self, account: &str) -> std::result::Result<(), KeyStoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(KeyStoreError("keychain locked".into()));
        }
        self.inner.delete(account)
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<FixedClock>,
    pub keys: Arc<FlakyKeyStore>,
    pub repo: Arc<FailingRepository>,
    pub notifier: Arc<RecordingGateway>,
    pub vault: TimeVault,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(epoch()));
        let keys = Arc::new(FlakyKeyStore::default());
        let repo = Arc::new(FailingRepository::new());
        let notifier = Arc::new(RecordingGateway::default());
        let blobs = BlobStore::new(dir.path().join("blobs")).unwrap();
        let vault = TimeVault::new(
            repo.clone(),
            blobs,
            keys.clone(),
            notifier.clone(),
            clock.clone(),
        );
        Self {
            dir,
            clock,
            keys,
            repo,
            notifier,
            vault,
        }
    }

    pub fn blob_root(&self) -> PathBuf {
        self.dir.path().join("blobs")
    }

    pub fn blob_path(&self, id: &ItemId) -> PathBuf {
        self.blob_root().join(id.to_string()).join("blob")
    }

    /// Number of item directories left under the blob root.
    pub fn blob_dirs(&self) -> usize {
        std::fs::read_dir(self.blob_root()).unwrap().count()
    }
}
