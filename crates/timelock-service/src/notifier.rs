//! Notification gateway for the command-line host.
//!
//! There is no desktop notification center to hand notices to, so scheduled
//! notices are written to the log instead.

use timelock_core::notify::{NotificationGateway, UnlockNotice};
use timelock_core::{ItemId, Result};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationGateway for LogNotifier {
    fn schedule(&self, notice: &UnlockNotice) -> Result<()> {
        info!(
            item = %notice.item,
            fire_at = %notice.fire_at,
            title = %notice.title,
            body = %notice.body,
            "unlock notice scheduled"
        );
        Ok(())
    }

    fn cancel(&self, item: &ItemId) -> Result<()> {
        info!(item = %item, "unlock notice cancelled");
        Ok(())
    }
}
