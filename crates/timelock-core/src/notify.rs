//! Unlock notifications.
//!
//! The vault only ever writes to the gateway; it never reads scheduled
//! notices back. Delivery itself belongs to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ItemId, MediaType, VaultItem};

pub const DEFAULT_NOTICE_TITLE: &str = "Your time capsule is ready!";

/// What the user sees when an item unlocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockNotice {
    pub item: ItemId,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl UnlockNotice {
    pub fn for_item(item: &VaultItem, title: &str) -> Self {
        let body = match &item.custom_message {
            Some(message) => message.clone(),
            None => {
                let media = item.media_type;
                format!(
                    "{} {} has unlocked.",
                    indefinite_article(media),
                    media.display_name()
                )
            }
        };
        Self {
            item: item.id,
            fire_at: item.unlock_at,
            title: title.to_string(),
            body,
        }
    }
}

// By sound, not spelling: "a URL".
fn indefinite_article(media: MediaType) -> &'static str {
    match media {
        MediaType::Image | MediaType::Audio => "An",
        MediaType::Text
        | MediaType::Url
        | MediaType::Video
        | MediaType::Voice
        | MediaType::Code => "A",
    }
}

/// One-shot notification scheduling, keyed by item id.
pub trait NotificationGateway: Send + Sync {
    fn schedule(&self, notice: &UnlockNotice) -> Result<()>;

    /// Cancelling an item with nothing scheduled is not an error.
    fn cancel(&self, item: &ItemId) -> Result<()>;

    fn update(&self, notice: &UnlockNotice) -> Result<()> {
        self.cancel(&notice.item)?;
        self.schedule(notice)
    }
}

/// Drops every notice. For hosts without notification support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGateway;

impl NotificationGateway for NoopGateway {
    fn schedule(&self, _notice: &UnlockNotice) -> Result<()> {
        Ok(())
    }

    fn cancel(&self, _item: &ItemId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlobRef, MediaType};
    use chrono::Duration;

    fn item(media: MediaType, message: Option<&str>) -> VaultItem {
        let id = ItemId::new();
        let now = Utc::now();
        VaultItem::new_locked(
            id,
            media,
            now,
            now + Duration::hours(1),
            BlobRef::new(&id, "blob"),
            message.map(str::to_string),
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn custom_message_becomes_body() {
        let item = item(MediaType::Text, Some("Open me on your birthday"));
        let notice = UnlockNotice::for_item(&item, DEFAULT_NOTICE_TITLE);
        assert_eq!(notice.title, "Your time capsule is ready!");
        assert_eq!(notice.body, "Open me on your birthday");
        assert_eq!(notice.fire_at, item.unlock_at);
    }

    #[test]
    fn default_body_names_the_media_type() {
        let notice = UnlockNotice::for_item(&item(MediaType::Voice, None), DEFAULT_NOTICE_TITLE);
        assert_eq!(notice.body, "A Voice Memo has unlocked.");
        let notice = UnlockNotice::for_item(&item(MediaType::Image, None), DEFAULT_NOTICE_TITLE);
        assert_eq!(notice.body, "An Image has unlocked.");
        let notice = UnlockNotice::for_item(&item(MediaType::Audio, None), DEFAULT_NOTICE_TITLE);
        assert_eq!(notice.body, "An Audio has unlocked.");
        let notice = UnlockNotice::for_item(&item(MediaType::Code, None), DEFAULT_NOTICE_TITLE);
        assert_eq!(notice.body, "A Code File has unlocked.");
        let notice = UnlockNotice::for_item(&item(MediaType::Url, None), DEFAULT_NOTICE_TITLE);
        assert_eq!(notice.body, "A URL has unlocked.");
    }
}
