//! The time-locked vault: creation, editing, consumption and deletion of
//! sealed items, wired over the key custodian, sealer, blob store,
//! repository and notification gateway.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::blob_store::BlobStore;
use crate::crypto::Sealer;
use crate::error::{Result, VaultError};
use crate::keys::{FileKeyStore, KeyCustodian, KeyringStore, SecureKeyStore};
use crate::models::{
    normalize_timestamp, BlobRef, Countdown, ItemId, ItemMutation, ItemStatus, MediaType,
    VaultItem,
};
use crate::notify::{NotificationGateway, UnlockNotice, DEFAULT_NOTICE_TITLE};
use crate::paths::VaultPaths;
use crate::repository::{ItemFilter, ItemRepository, SortOrder, SqliteRepository};
use crate::scheduler::{Clock, DeferredTask, SystemClock, UnlockReport, UnlockScheduler};
use crate::settings::{KeyBackend, VaultSettings};

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Everything needed to seal a new item. Plaintext is wiped on drop.
pub struct NewItem {
    pub media_type: MediaType,
    pub content: Zeroizing<Vec<u8>>,
    pub unlock_at: DateTime<Utc>,
    pub custom_message: Option<String>,
    pub metadata: Option<Vec<u8>>,
    pub thumbnail: Option<Zeroizing<Vec<u8>>>,
}

impl NewItem {
    pub fn new(media_type: MediaType, content: impl Into<Vec<u8>>, unlock_at: DateTime<Utc>) -> Self {
        Self {
            media_type,
            content: Zeroizing::new(content.into()),
            unlock_at,
            custom_message: None,
            metadata: None,
            thumbnail: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.custom_message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<Vec<u8>>) -> Self {
        self.thumbnail = Some(Zeroizing::new(thumbnail.into()));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(VaultError::InvalidContent("content is empty".into()));
        }
        if self.media_type.is_textual() {
            let text = std::str::from_utf8(&self.content).map_err(|_| {
                VaultError::InvalidContent(format!(
                    "{} content must be UTF-8",
                    self.media_type.display_name()
                ))
            })?;
            if text.trim().is_empty() {
                return Err(VaultError::InvalidContent("content is blank".into()));
            }
            if self.media_type == MediaType::Url && !looks_like_url(text.trim()) {
                return Err(VaultError::InvalidContent(format!("not a valid URL: {text}")));
            }
        }
        if let Some(thumbnail) = &self.thumbnail {
            if !self.media_type.is_visual() {
                return Err(VaultError::InvalidContent(format!(
                    "{} items cannot carry a thumbnail",
                    self.media_type.display_name()
                )));
            }
            if thumbnail.is_empty() {
                return Err(VaultError::InvalidContent("thumbnail is empty".into()));
            }
        }
        Ok(())
    }
}

/// `scheme://rest`, scheme per RFC 3986, no whitespace.
fn looks_like_url(text: &str) -> bool {
    let Some((scheme, rest)) = text.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !text.chars().any(char::is_whitespace)
}

/// Decrypted content of a readable item. Wiped on drop.
pub struct UnlockedContent {
    pub item: VaultItem,
    bytes: Zeroizing<Vec<u8>>,
}

impl UnlockedContent {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The content as text, for textual media types.
    pub fn as_text(&self) -> Option<&str> {
        if !self.item.media_type.is_textual() {
            return None;
        }
        std::str::from_utf8(&self.bytes).ok()
    }
}

impl std::fmt::Debug for UnlockedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedContent")
            .field("item", &self.item.id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ============================================================================
// Vault
// ============================================================================

pub struct TimeVault {
    repo: Arc<dyn ItemRepository>,
    blobs: BlobStore,
    sealer: Sealer,
    notifier: Arc<dyn NotificationGateway>,
    scheduler: UnlockScheduler,
    clock: Arc<dyn Clock>,
    notice_title: String,
}

impl TimeVault {
    pub fn new(
        repo: Arc<dyn ItemRepository>,
        blobs: BlobStore,
        key_store: Arc<dyn SecureKeyStore>,
        notifier: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler: UnlockScheduler::new(repo.clone(), clock.clone()),
            repo,
            blobs,
            sealer: Sealer::new(KeyCustodian::new(key_store)),
            notifier,
            clock,
            notice_title: DEFAULT_NOTICE_TITLE.to_string(),
        }
    }

    pub fn with_notice_title(mut self, title: impl Into<String>) -> Self {
        self.notice_title = title.into();
        self
    }

    /// Open the on-disk vault with the key backend chosen in `settings`.
    /// Due items are unlocked before this returns.
    pub fn open(
        paths: &VaultPaths,
        settings: &VaultSettings,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Result<Self> {
        let key_store: Arc<dyn SecureKeyStore> = match settings.keys.backend {
            KeyBackend::Keyring => Arc::new(KeyringStore::new(settings.keys.keyring_service.clone())),
            KeyBackend::File => Arc::new(FileKeyStore::new(paths.key_dir())?),
        };
        Self::open_with(paths, settings, key_store, notifier, Arc::new(SystemClock))
    }

    pub fn open_with(
        paths: &VaultPaths,
        settings: &VaultSettings,
        key_store: Arc<dyn SecureKeyStore>,
        notifier: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let repo = Arc::new(SqliteRepository::open(&paths.db_path())?);
        let blobs = BlobStore::new(paths.blob_root())?;
        let vault = Self::new(repo, blobs, key_store, notifier, clock)
            .with_notice_title(settings.notifications.title.clone());
        vault.startup()?;
        Ok(vault)
    }

    /// Unlock everything that came due while the process was not running.
    pub fn startup(&self) -> Result<UnlockReport> {
        let report = self.scheduler.run()?;
        info!(unlocked = report.unlocked.len(), "startup unlock scan complete");
        Ok(report)
    }

    pub fn scheduler(&self) -> UnlockScheduler {
        self.scheduler.clone()
    }

    pub fn run_deferred(&self, task: DeferredTask) {
        self.scheduler.run_deferred(task);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Creation ────────────────────────────────────────────────────────────

    /// Seal and store a new item. All-or-nothing: on failure no key or blob
    /// for the attempt is left behind.
    pub fn create(&self, new: NewItem) -> Result<VaultItem> {
        new.validate()?;

        let id = ItemId::new();
        let item = VaultItem::new_locked(
            id,
            new.media_type,
            self.clock.now(),
            new.unlock_at,
            BlobRef::new(&id, "blob"),
            new.custom_message.clone(),
            new.metadata.clone(),
            new.thumbnail.as_ref().map(|_| BlobRef::new(&id, "thumbnail")),
        )?;

        // Seal cleans up its own key on failure.
        let sealed = self.sealer.seal(&new.content, &id)?;

        let thumbnail = new.thumbnail.as_deref().map(Vec::as_slice);
        if let Err(e) = self.persist_sealed(&item, &sealed, thumbnail) {
            self.roll_back(&id);
            return Err(e);
        }

        if let Err(e) = self
            .notifier
            .schedule(&UnlockNotice::for_item(&item, &self.notice_title))
        {
            warn!(item = %id, error = %e, "failed to schedule unlock notification");
        }

        info!(item = %id, media = %item.media_type, unlock_at = %item.unlock_at, "item sealed");
        Ok(item)
    }

    fn persist_sealed(
        &self,
        item: &VaultItem,
        sealed: &[u8],
        thumbnail: Option<&[u8]>,
    ) -> Result<()> {
        self.blobs.write(&item.id, sealed)?;
        if let Some(thumbnail) = thumbnail {
            let sealed_thumb = self.sealer.seal_thumbnail(thumbnail, &item.id)?;
            self.blobs.write_thumbnail(&item.id, &sealed_thumb)?;
        }
        self.repo.insert(item)
    }

    fn roll_back(&self, id: &ItemId) {
        if let Err(e) = self.blobs.delete_all(id) {
            warn!(item = %id, error = %e, "rollback: failed to remove blobs");
        }
        if let Err(e) = self.sealer.custodian().delete(id) {
            warn!(item = %id, error = %e, "rollback: failed to remove key");
        }
    }

    // ── Edits ───────────────────────────────────────────────────────────────

    /// Move the unlock date of a locked item and reschedule its notice.
    pub fn edit_unlock_date(&self, id: &ItemId, unlock_at: DateTime<Utc>) -> Result<VaultItem> {
        let item = self.repo.update(id, &ItemMutation::unlock_at(unlock_at))?;
        self.refresh_notice(&item);
        info!(item = %id, unlock_at = %item.unlock_at, "unlock date changed");
        Ok(item)
    }

    /// Set or clear the custom message. A pending notice picks up the change.
    pub fn set_custom_message(&self, id: &ItemId, message: Option<String>) -> Result<VaultItem> {
        let item = self.repo.update(id, &ItemMutation::custom_message(message))?;
        if item.status == ItemStatus::Locked {
            self.refresh_notice(&item);
        }
        Ok(item)
    }

    /// Retire an unlocked item. Locked items cannot be archived.
    pub fn archive(&self, id: &ItemId) -> Result<VaultItem> {
        let item = self.repo.update(id, &ItemMutation::status(ItemStatus::Archived))?;
        info!(item = %id, "item archived");
        Ok(item)
    }

    fn refresh_notice(&self, item: &VaultItem) {
        if let Err(e) = self
            .notifier
            .update(&UnlockNotice::for_item(item, &self.notice_title))
        {
            warn!(item = %item.id, error = %e, "failed to reschedule unlock notification");
        }
    }

    // ── Deletion ────────────────────────────────────────────────────────────

    /// Remove record, blobs, key and pending notice. Every step is attempted
    /// even if an earlier one fails. Returns whether a record existed.
    pub fn delete(&self, id: &ItemId) -> Result<bool> {
        let mut failures = Vec::new();

        if let Err(e) = self.notifier.cancel(id) {
            failures.push(format!("notification: {e}"));
        }
        let existed = match self.repo.delete(id) {
            Ok(existed) => existed,
            Err(e) => {
                failures.push(format!("record: {e}"));
                true
            }
        };
        if let Err(e) = self.blobs.delete_all(id) {
            failures.push(format!("blobs: {e}"));
        }
        if let Err(e) = self.sealer.custodian().delete(id) {
            failures.push(format!("key: {e}"));
        }

        if !failures.is_empty() {
            warn!(item = %id, failures = failures.len(), "item deletion incomplete");
            return Err(VaultError::DeletionIncomplete {
                item: *id,
                failures,
            });
        }
        info!(item = %id, existed, "item deleted");
        Ok(existed)
    }

    // ── Consumption ─────────────────────────────────────────────────────────

    pub fn get(&self, id: &ItemId) -> Result<VaultItem> {
        self.repo.get(id)
    }

    /// Decrypt an unlocked or archived item.
    pub fn open_content(&self, id: &ItemId) -> Result<UnlockedContent> {
        let item = self.readable(id)?;
        let bytes = self
            .blobs
            .read(&item.blob_ref)
            .and_then(|blob| self.sealer.open(&blob, id))
            .inspect_err(|e| warn!(item = %id, error = %e, "content unavailable"))?;
        Ok(UnlockedContent { item, bytes })
    }

    /// Decrypted preview, if the item has one. Same access rule as content.
    pub fn read_thumbnail(&self, id: &ItemId) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let item = self.readable(id)?;
        let Some(thumbnail_ref) = &item.thumbnail_ref else {
            return Ok(None);
        };
        let blob = self.blobs.read(thumbnail_ref)?;
        self.sealer.open_thumbnail(&blob, id).map(Some)
    }

    fn readable(&self, id: &ItemId) -> Result<VaultItem> {
        let item = self.repo.get(id)?;
        if !item.status.is_readable() {
            return Err(VaultError::StillLocked {
                item: *id,
                unlock_at: item.unlock_at,
            });
        }
        Ok(item)
    }

    pub fn countdown(&self, item: &VaultItem) -> Option<Countdown> {
        match item.status {
            ItemStatus::Locked => item.countdown(normalize_timestamp(self.clock.now())),
            ItemStatus::Unlocked | ItemStatus::Archived => None,
        }
    }

    // ── Listing ─────────────────────────────────────────────────────────────

    /// Locked items, soonest unlock first.
    pub fn list_locked(&self) -> Result<Vec<VaultItem>> {
        self.repo
            .query(&ItemFilter::Status(ItemStatus::Locked), SortOrder::UnlockAscending)
    }

    /// Unlocked items, most recently unlocked first.
    pub fn list_unlocked(&self) -> Result<Vec<VaultItem>> {
        self.repo
            .query(&ItemFilter::Status(ItemStatus::Unlocked), SortOrder::UnlockDescending)
    }

    pub fn list_archived(&self) -> Result<Vec<VaultItem>> {
        self.repo
            .query(&ItemFilter::Status(ItemStatus::Archived), SortOrder::UnlockDescending)
    }

    pub fn list_all(&self, order: SortOrder) -> Result<Vec<VaultItem>> {
        self.repo.query(&ItemFilter::All, order)
    }

    pub fn by_media_type(&self, media_type: MediaType) -> Result<Vec<VaultItem>> {
        self.repo
            .query(&ItemFilter::MediaType(media_type), SortOrder::CreatedDescending)
    }

    pub fn search(&self, text: &str) -> Result<Vec<VaultItem>> {
        self.repo
            .query(&ItemFilter::Search(text.to_string()), SortOrder::CreatedDescending)
    }
}
