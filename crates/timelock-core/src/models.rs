//! Vault item model: identifiers, closed status/media enums and the
//! validated mutations the repository applies.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Longest custom message accepted, in characters.
pub const MAX_CUSTOM_MESSAGE_CHARS: usize = 500;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque item identifier. Join key across key store, blob store and
/// notification gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ItemId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| VaultError::UnknownVariant {
                kind: "item id",
                value: s.to_string(),
            })
    }
}

/// Relative reference into the blob store, `{item_id}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub(crate) fn new(item: &ItemId, name: &str) -> Self {
        Self(format!("{item}/{name}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Kind of content sealed in an item. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Text,
    Url,
    Image,
    Video,
    Audio,
    Voice,
    Code,
}

impl MediaType {
    pub const ALL: [MediaType; 7] = [
        Self::Text,
        Self::Url,
        Self::Image,
        Self::Video,
        Self::Audio,
        Self::Voice,
        Self::Code,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Code => "code",
        }
    }

    /// Human-facing label, also the target of free-text search.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Url => "URL",
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Voice => "Voice Memo",
            Self::Code => "Code File",
        }
    }

    /// Media types that may carry a preview thumbnail.
    pub fn is_visual(&self) -> bool {
        match self {
            Self::Image | Self::Video => true,
            Self::Text | Self::Url | Self::Audio | Self::Voice | Self::Code => false,
        }
    }

    /// Media types whose plaintext is UTF-8.
    pub fn is_textual(&self) -> bool {
        match self {
            Self::Text | Self::Url | Self::Code => true,
            Self::Image | Self::Video | Self::Audio | Self::Voice => false,
        }
    }

    /// Case-insensitive substring match against the display label.
    pub fn matches_label(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        !needle.is_empty() && self.display_name().to_lowercase().contains(&needle)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "url" => Ok(Self::Url),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "voice" => Ok(Self::Voice),
            "code" => Ok(Self::Code),
            other => Err(VaultError::UnknownVariant {
                kind: "media type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state. Forward-only: `Locked -> Unlocked -> Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Locked,
    Unlocked,
    /// Terminal. Only set by an explicit user action.
    Archived,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Archived => "archived",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Locked => 0,
            Self::Unlocked => 1,
            Self::Archived => 2,
        }
    }

    /// Whether `self -> next` is a legal single step. Staying put is allowed.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        let (from, to) = (self.rank(), next.rank());
        to == from || to == from + 1
    }

    /// Whether decrypted content may be handed out in this state.
    pub fn is_readable(&self) -> bool {
        match self {
            Self::Locked => false,
            Self::Unlocked | Self::Archived => true,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            "archived" => Ok(Self::Archived),
            other => Err(VaultError::UnknownVariant {
                kind: "item status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Vault item
// ============================================================================

/// A sealed, time-locked artifact. Holds no plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultItem {
    pub id: ItemId,
    pub media_type: MediaType,
    pub created_at: DateTime<Utc>,
    pub unlock_at: DateTime<Utc>,
    pub status: ItemStatus,
    pub blob_ref: BlobRef,
    pub custom_message: Option<String>,
    pub metadata: Option<Vec<u8>>,
    pub thumbnail_ref: Option<BlobRef>,
    /// Backup eligibility. Always false until a backup feature exists.
    #[serde(default)]
    pub backed_up: bool,
}

/// Whole days, hours and minutes left until an item unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl VaultItem {
    /// Build a freshly sealed, locked item, enforcing the date invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn new_locked(
        id: ItemId,
        media_type: MediaType,
        created_at: DateTime<Utc>,
        unlock_at: DateTime<Utc>,
        blob_ref: BlobRef,
        custom_message: Option<String>,
        metadata: Option<Vec<u8>>,
        thumbnail_ref: Option<BlobRef>,
    ) -> Result<Self> {
        let created_at = normalize_timestamp(created_at);
        let unlock_at = normalize_timestamp(unlock_at);
        check_unlock_date(created_at, unlock_at)?;
        if thumbnail_ref.is_some() && !media_type.is_visual() {
            return Err(VaultError::InvalidContent(format!(
                "{} items cannot carry a thumbnail",
                media_type.display_name()
            )));
        }
        Ok(Self {
            id,
            media_type,
            created_at,
            unlock_at,
            status: ItemStatus::Locked,
            blob_ref,
            custom_message: normalize_message(custom_message)?,
            metadata,
            thumbnail_ref,
            backed_up: false,
        })
    }

    /// True when the item is locked and its unlock time is at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Locked && self.unlock_at <= now
    }

    pub fn countdown(&self, now: DateTime<Utc>) -> Option<Countdown> {
        let remaining = self.unlock_at - now;
        if remaining <= Duration::zero() {
            return None;
        }
        let minutes = remaining.num_minutes();
        Some(Countdown {
            days: minutes / (24 * 60),
            hours: (minutes / 60) % 24,
            minutes: minutes % 60,
        })
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// A partial update. `None` leaves the field untouched; for
/// `custom_message`, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMutation {
    pub unlock_at: Option<DateTime<Utc>>,
    pub custom_message: Option<Option<String>>,
    pub status: Option<ItemStatus>,
}

impl ItemMutation {
    pub fn unlock_at(at: DateTime<Utc>) -> Self {
        Self {
            unlock_at: Some(at),
            ..Self::default()
        }
    }

    pub fn custom_message(message: Option<String>) -> Self {
        Self {
            custom_message: Some(message),
            ..Self::default()
        }
    }

    pub fn status(status: ItemStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Produce the updated item, or reject the mutation without touching
    /// anything. The unlock date is checked against the pre-mutation status.
    pub fn apply(&self, current: &VaultItem) -> Result<VaultItem> {
        let mut next = current.clone();

        if let Some(unlock_at) = self.unlock_at {
            let unlock_at = normalize_timestamp(unlock_at);
            if current.status != ItemStatus::Locked && unlock_at != current.unlock_at {
                return Err(VaultError::InvalidTransition {
                    item: current.id,
                    from: current.status,
                    to: ItemStatus::Locked,
                });
            }
            check_unlock_date(current.created_at, unlock_at)?;
            next.unlock_at = unlock_at;
        }

        if let Some(message) = &self.custom_message {
            next.custom_message = normalize_message(message.clone())?;
        }

        if let Some(status) = self.status {
            if !current.status.can_transition_to(status) {
                return Err(VaultError::InvalidTransition {
                    item: current.id,
                    from: current.status,
                    to: status,
                });
            }
            next.status = status;
        }

        Ok(next)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Truncate to millisecond precision, the resolution the repository stores.
pub fn normalize_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

fn check_unlock_date(created_at: DateTime<Utc>, unlock_at: DateTime<Utc>) -> Result<()> {
    if unlock_at < created_at {
        return Err(VaultError::InvalidUnlockDate {
            unlock_at,
            created_at,
        });
    }
    Ok(())
}

fn normalize_message(message: Option<String>) -> Result<Option<String>> {
    match message {
        Some(m) if m.trim().is_empty() => Ok(None),
        Some(m) if m.chars().count() > MAX_CUSTOM_MESSAGE_CHARS => Err(
            VaultError::InvalidContent(format!(
                "custom message longer than {MAX_CUSTOM_MESSAGE_CHARS} characters"
            )),
        ),
        other => Ok(other),
    }
}
