//! End-to-end behaviour of the time-locked vault.
//!
//! Covers:
//!  1. Seal → unlock → open round trip
//!  2. Locked items refuse to open
//!  3. Tamper and key isolation on disk
//!  4. Batch consistency and idempotent unlocking
//!  5. Creation atomicity
//!  6. Edits before and after unlock
//!  7. Deletion completeness
//!  8. Deferred runs: expiration and commit failure
//!  9. Archive, listing and search
//! 10. Thumbnails
//! 11. Persistence across reopen

mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};

use chrono::Duration;
use timelock_core::keys::{FileKeyStore, SecureKeyStore};
use timelock_core::notify::DEFAULT_NOTICE_TITLE;
use timelock_core::paths::VaultPaths;
use timelock_core::scheduler::{DeferredTask, ExpirationHandle, FixedClock, TaskOutcome};
use timelock_core::settings::VaultSettings;
use timelock_core::{ItemStatus, MediaType, NewItem, TimeVault, VaultError};

use common::{epoch, Harness, NoticeEvent, RecordingGateway};

fn text(body: &str, unlock_in: Duration) -> NewItem {
    NewItem::new(MediaType::Text, body, epoch() + unlock_in)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ─── Test 1: Round trip ─────────────────────────────────────────────────────

#[test]
fn test_sealed_text_opens_after_unlock() {
    let h = Harness::new();
    let item = h
        .vault
        .create(text("see you next year", Duration::hours(1)).with_message("happy new year"))
        .unwrap();
    assert_eq!(item.status, ItemStatus::Locked);
    assert_eq!(item.custom_message.as_deref(), Some("happy new year"));

    h.clock.advance(Duration::hours(1));
    let report = h.vault.startup().unwrap();
    assert_eq!(report.unlocked, vec![item.id]);

    let content = h.vault.open_content(&item.id).unwrap();
    assert_eq!(content.as_text(), Some("see you next year"));
    assert_eq!(content.item.status, ItemStatus::Unlocked);
}

#[test]
fn test_binary_media_round_trips_byte_exact() {
    let h = Harness::new();
    let audio: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
    let item = h
        .vault
        .create(NewItem::new(MediaType::Audio, audio.clone(), epoch()))
        .unwrap();
    h.vault.startup().unwrap();

    let content = h.vault.open_content(&item.id).unwrap();
    assert_eq!(content.bytes(), &audio[..]);
    assert_eq!(content.as_text(), None);
}

#[test]
fn test_nothing_is_stored_in_cleartext() {
    let h = Harness::new();
    let secret = b"the combination is 12-34-56";
    let item = h
        .vault
        .create(NewItem::new(MediaType::Text, &secret[..], epoch() + Duration::days(1)))
        .unwrap();
    let on_disk = fs::read(h.blob_path(&item.id)).unwrap();
    assert!(!contains(&on_disk, secret));
}

// ─── Test 2: Locked items refuse to open ────────────────────────────────────

#[test]
fn test_locked_item_cannot_be_opened() {
    let h = Harness::new();
    let item = h.vault.create(text("not yet", Duration::days(7))).unwrap();

    let err = h.vault.open_content(&item.id).unwrap_err();
    assert!(matches!(err, VaultError::StillLocked { item: id, .. } if id == item.id));

    // Due, but no scan has flipped it yet: the record is authoritative.
    h.clock.advance(Duration::days(8));
    assert!(matches!(
        h.vault.open_content(&item.id),
        Err(VaultError::StillLocked { .. })
    ));
}

// ─── Test 3: Tamper and key isolation ───────────────────────────────────────

#[test]
fn test_tampered_blob_is_content_unavailable() {
    let h = Harness::new();
    let item = h.vault.create(text("integrity matters", Duration::zero())).unwrap();
    h.vault.startup().unwrap();

    let path = h.blob_path(&item.id);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    let err = h.vault.open_content(&item.id).unwrap_err();
    assert!(matches!(err, VaultError::DecryptionFailed));
    assert!(err.is_content_unavailable());
}

#[test]
fn test_blob_moved_to_another_item_does_not_open() {
    let h = Harness::new();
    let a = h.vault.create(text("for a", Duration::zero())).unwrap();
    let b = h.vault.create(text("for b", Duration::zero())).unwrap();
    h.vault.startup().unwrap();

    fs::copy(h.blob_path(&a.id), h.blob_path(&b.id)).unwrap();
    assert!(matches!(
        h.vault.open_content(&b.id),
        Err(VaultError::DecryptionFailed)
    ));
    assert_eq!(h.vault.open_content(&a.id).unwrap().as_text(), Some("for a"));
}

#[test]
fn test_lost_key_is_content_unavailable() {
    let h = Harness::new();
    let item = h.vault.create(text("restored without keys", Duration::zero())).unwrap();
    h.vault.startup().unwrap();
    h.keys.inner.delete(&item.id.to_string()).unwrap();

    let err = h.vault.open_content(&item.id).unwrap_err();
    assert!(matches!(err, VaultError::KeyNotFound(_)));
    assert!(err.is_content_unavailable());
}

#[test]
fn test_deleting_one_item_leaves_other_keys_intact() {
    let h = Harness::new();
    let a = h.vault.create(text("a", Duration::hours(1))).unwrap();
    let b = h.vault.create(text("b", Duration::hours(1))).unwrap();

    assert!(h.vault.delete(&a.id).unwrap());
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.vault.startup().unwrap().unlocked, vec![b.id]);
    assert_eq!(h.vault.open_content(&b.id).unwrap().as_text(), Some("b"));
}

// ─── Test 4: Batch consistency and idempotence ──────────────────────────────

#[test]
fn test_single_run_unlocks_exactly_the_due_items() {
    let h = Harness::new();
    let due: Vec<_> = (1..=3)
        .map(|i| h.vault.create(text("due", Duration::minutes(i))).unwrap().id)
        .collect();
    let pending: Vec<_> = (1..=2)
        .map(|i| h.vault.create(text("later", Duration::days(i))).unwrap().id)
        .collect();

    h.clock.advance(Duration::hours(1));
    let report = h.vault.startup().unwrap();
    assert_eq!(report.unlocked, due);

    for id in &due {
        assert_eq!(h.vault.get(id).unwrap().status, ItemStatus::Unlocked);
    }
    for id in &pending {
        assert_eq!(h.vault.get(id).unwrap().status, ItemStatus::Locked);
    }

    // Same instant, then later: nothing more changes for already-unlocked items.
    assert!(h.vault.startup().unwrap().unlocked.is_empty());
    h.clock.advance(Duration::hours(2));
    assert!(h.vault.startup().unwrap().unlocked.is_empty());
}

// ─── Test 5: Creation atomicity ─────────────────────────────────────────────

#[test]
fn test_failed_insert_leaves_no_key_or_blob() {
    let h = Harness::new();
    h.repo.fail_insert.store(true, Ordering::SeqCst);

    let err = h
        .vault
        .create(NewItem::new(MediaType::Image, vec![9u8; 64], epoch() + Duration::hours(1))
            .with_thumbnail(vec![1u8; 8]))
        .unwrap_err();
    assert!(matches!(err, VaultError::RepositoryWriteFailed(_)));

    assert!(h.keys.inner.is_empty());
    assert_eq!(h.blob_dirs(), 0);
    assert!(h.notifier.events().is_empty());
    assert!(h.vault.list_locked().unwrap().is_empty());
}

#[test]
fn test_unlock_date_before_creation_is_rejected_up_front() {
    let h = Harness::new();
    let err = h
        .vault
        .create(text("too late", -Duration::seconds(1)))
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidUnlockDate { .. }));
    assert!(h.keys.inner.is_empty());
    assert_eq!(h.blob_dirs(), 0);
}

#[test]
fn test_invalid_content_is_rejected() {
    let h = Harness::new();
    for new in [
        NewItem::new(MediaType::Text, "", epoch()),
        NewItem::new(MediaType::Url, "example dot com", epoch()),
        NewItem::new(MediaType::Voice, vec![1, 2, 3], epoch()).with_thumbnail(vec![1]),
    ] {
        assert!(matches!(
            h.vault.create(new),
            Err(VaultError::InvalidContent(_))
        ));
    }
    assert!(h.keys.inner.is_empty());
}

#[test]
fn test_notification_failure_does_not_undo_creation() {
    let h = Harness::new();
    h.notifier.fail.store(true, Ordering::SeqCst);
    let item = h.vault.create(text("still sealed", Duration::hours(1))).unwrap();
    assert_eq!(h.vault.get(&item.id).unwrap(), item);
    assert_eq!(h.keys.inner.len(), 1);
}

#[test]
fn test_creation_schedules_unlock_notice() {
    let h = Harness::new();
    let item = h
        .vault
        .create(NewItem::new(MediaType::Video, vec![0u8; 16], epoch() + Duration::hours(5)))
        .unwrap();
    let notice = h.notifier.pending(&item.id).unwrap();
    assert_eq!(notice.title, DEFAULT_NOTICE_TITLE);
    assert_eq!(notice.body, "A Video has unlocked.");
    assert_eq!(notice.fire_at, item.unlock_at);
}

// ─── Test 6: Edits ──────────────────────────────────────────────────────────

#[test]
fn test_edit_before_unlock_moves_the_unlock_point() {
    let h = Harness::new();
    let item = h.vault.create(text("edit me", Duration::hours(2))).unwrap();

    let edited = h
        .vault
        .edit_unlock_date(&item.id, epoch() + Duration::hours(1))
        .unwrap();
    assert_eq!(edited.unlock_at, epoch() + Duration::hours(1));
    assert_eq!(h.notifier.pending(&item.id).unwrap().fire_at, edited.unlock_at);

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.vault.startup().unwrap().unlocked, vec![item.id]);
}

#[test]
fn test_postponed_item_stays_locked_at_its_old_date() {
    let h = Harness::new();
    let item = h.vault.create(text("not yet", Duration::hours(1))).unwrap();
    h.vault
        .edit_unlock_date(&item.id, epoch() + Duration::hours(5))
        .unwrap();

    let scheduler = h.vault.scheduler();
    let early = scheduler.run_at(epoch() + Duration::hours(1)).unwrap();
    assert!(early.unlocked.is_empty());
    assert_eq!(h.vault.get(&item.id).unwrap().status, ItemStatus::Locked);
    assert!(matches!(
        h.vault.open_content(&item.id),
        Err(VaultError::StillLocked { .. })
    ));

    let due = scheduler.run_at(epoch() + Duration::hours(5)).unwrap();
    assert_eq!(due.unlocked, vec![item.id]);
    assert_eq!(h.vault.get(&item.id).unwrap().status, ItemStatus::Unlocked);
}

#[test]
fn test_edit_cannot_precede_creation() {
    let h = Harness::new();
    let item = h.vault.create(text("x", Duration::hours(2))).unwrap();
    let err = h
        .vault
        .edit_unlock_date(&item.id, epoch() - Duration::minutes(1))
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidUnlockDate { .. }));
    assert_eq!(h.vault.get(&item.id).unwrap().unlock_at, item.unlock_at);
}

#[test]
fn test_unlock_date_is_frozen_after_unlock() {
    let h = Harness::new();
    let item = h.vault.create(text("x", Duration::minutes(1))).unwrap();
    h.clock.advance(Duration::minutes(1));
    h.vault.startup().unwrap();

    let err = h
        .vault
        .edit_unlock_date(&item.id, epoch() + Duration::days(1))
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidTransition { .. }));
}

#[test]
fn test_message_edit_refreshes_pending_notice() {
    let h = Harness::new();
    let item = h.vault.create(text("x", Duration::hours(1))).unwrap();
    assert_eq!(
        h.notifier.pending(&item.id).unwrap().body,
        "A Text has unlocked."
    );

    h.vault
        .set_custom_message(&item.id, Some("open with coffee".into()))
        .unwrap();
    assert_eq!(h.notifier.pending(&item.id).unwrap().body, "open with coffee");

    let cleared = h.vault.set_custom_message(&item.id, Some("  ".into())).unwrap();
    assert_eq!(cleared.custom_message, None);
}

// ─── Test 7: Deletion completeness ──────────────────────────────────────────

#[test]
fn test_delete_removes_record_blob_key_and_notice() {
    let h = Harness::new();
    let item = h
        .vault
        .create(NewItem::new(MediaType::Image, vec![5u8; 32], epoch() + Duration::hours(1))
            .with_thumbnail(vec![6u8; 4]))
        .unwrap();

    assert!(h.vault.delete(&item.id).unwrap());

    assert!(matches!(
        h.vault.get(&item.id),
        Err(VaultError::RepositoryNotFound(_))
    ));
    assert!(h.keys.inner.is_empty());
    assert_eq!(h.blob_dirs(), 0);
    assert!(h.notifier.pending(&item.id).is_none());
    assert!(h
        .notifier
        .events()
        .contains(&NoticeEvent::Cancelled(item.id)));

    // Deleting again is harmless.
    assert!(!h.vault.delete(&item.id).unwrap());
}

#[test]
fn test_delete_attempts_every_step_despite_failures() {
    let h = Harness::new();
    let item = h.vault.create(text("sticky", Duration::hours(1))).unwrap();
    h.keys.fail_delete.store(true, Ordering::SeqCst);

    let err = h.vault.delete(&item.id).unwrap_err();
    match err {
        VaultError::DeletionIncomplete { item: id, failures } => {
            assert_eq!(id, item.id);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("key:"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Record and blobs went regardless.
    assert!(h.vault.get(&item.id).is_err());
    assert_eq!(h.blob_dirs(), 0);
}

// ─── Test 8: Deferred runs ──────────────────────────────────────────────────

#[test]
fn test_expired_deferred_run_leaves_items_locked() {
    let h = Harness::new();
    let ids: Vec<_> = (0..3)
        .map(|_| h.vault.create(text("x", Duration::minutes(5))).unwrap().id)
        .collect();
    h.clock.advance(Duration::hours(1));

    let expiration = ExpirationHandle::new();
    expiration.expire();
    let (tx, rx) = mpsc::channel();
    h.vault.run_deferred(DeferredTask::new(expiration, None, move |o| {
        tx.send(o).unwrap();
    }));
    assert_eq!(rx.recv().unwrap(), TaskOutcome::Expired);
    for id in &ids {
        assert_eq!(h.vault.get(id).unwrap().status, ItemStatus::Locked);
    }

    // The next trigger picks them up.
    assert_eq!(h.vault.startup().unwrap().unlocked.len(), 3);
}

#[test]
fn test_commit_failure_is_reported_and_applies_nothing() {
    let h = Harness::new();
    let id = h.vault.create(text("x", Duration::minutes(5))).unwrap().id;
    h.clock.advance(Duration::hours(1));
    h.repo.fail_commit.store(true, Ordering::SeqCst);

    let (tx, rx) = mpsc::channel();
    h.vault.run_deferred(DeferredTask::new(ExpirationHandle::new(), None, move |o| {
        tx.send(o).unwrap();
    }));
    let outcome = rx.recv().unwrap();
    assert!(!outcome.is_success());
    assert!(matches!(outcome, TaskOutcome::Failed(_)));
    assert_eq!(h.vault.get(&id).unwrap().status, ItemStatus::Locked);
}

// ─── Test 9: Archive, listing and search ────────────────────────────────────

#[test]
fn test_archive_only_from_unlocked() {
    let h = Harness::new();
    let item = h.vault.create(text("keepsake", Duration::hours(1))).unwrap();

    assert!(matches!(
        h.vault.archive(&item.id),
        Err(VaultError::InvalidTransition { from: ItemStatus::Locked, to: ItemStatus::Archived, .. })
    ));

    h.clock.advance(Duration::hours(1));
    h.vault.startup().unwrap();
    let archived = h.vault.archive(&item.id).unwrap();
    assert_eq!(archived.status, ItemStatus::Archived);

    // Archived content stays readable; the scheduler never touches it.
    assert_eq!(h.vault.open_content(&item.id).unwrap().as_text(), Some("keepsake"));
    assert!(h.vault.startup().unwrap().unlocked.is_empty());
    assert_eq!(h.vault.list_archived().unwrap().len(), 1);
    assert!(h.vault.list_unlocked().unwrap().is_empty());
}

#[test]
fn test_lists_are_sorted_for_display() {
    let h = Harness::new();
    let late = h.vault.create(text("late", Duration::hours(3))).unwrap().id;
    let soon = h.vault.create(text("soon", Duration::hours(1))).unwrap().id;
    let mid = h.vault.create(text("mid", Duration::hours(2))).unwrap().id;

    let locked: Vec<_> = h.vault.list_locked().unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(locked, vec![soon, mid, late]);

    h.clock.advance(Duration::hours(5));
    h.vault.startup().unwrap();
    let unlocked: Vec<_> = h.vault.list_unlocked().unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(unlocked, vec![late, mid, soon]);
}

#[test]
fn test_search_and_media_filters() {
    let h = Harness::new();
    let memo = h
        .vault
        .create(NewItem::new(MediaType::Voice, vec![1u8; 10], epoch()))
        .unwrap()
        .id;
    let link = h
        .vault
        .create(NewItem::new(MediaType::Url, "https://example.org", epoch()))
        .unwrap()
        .id;

    let found: Vec<_> = h.vault.search("voice").unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(found, vec![memo]);
    assert_eq!(h.vault.search("url").unwrap()[0].id, link);
    assert!(h.vault.search("").unwrap().is_empty());
    assert_eq!(h.vault.by_media_type(MediaType::Url).unwrap().len(), 1);
}

#[test]
fn test_countdown_tracks_the_clock() {
    let h = Harness::new();
    let item = h
        .vault
        .create(text("x", Duration::days(2) + Duration::hours(3) + Duration::minutes(4)))
        .unwrap();
    let left = h.vault.countdown(&item).unwrap();
    assert_eq!((left.days, left.hours, left.minutes), (2, 3, 4));

    h.clock.advance(Duration::days(3));
    assert!(h.vault.countdown(&item).is_none());
}

// ─── Test 10: Thumbnails ────────────────────────────────────────────────────

#[test]
fn test_thumbnail_is_sealed_and_gated() {
    let h = Harness::new();
    let preview = b"tiny-jpeg-preview".to_vec();
    let item = h
        .vault
        .create(NewItem::new(MediaType::Image, vec![7u8; 128], epoch() + Duration::hours(1))
            .with_thumbnail(preview.clone()))
        .unwrap();
    assert!(item.thumbnail_ref.is_some());

    let thumb_path = h.blob_root().join(item.id.to_string()).join("thumbnail");
    assert!(!contains(&fs::read(thumb_path).unwrap(), &preview));

    assert!(matches!(
        h.vault.read_thumbnail(&item.id),
        Err(VaultError::StillLocked { .. })
    ));

    h.clock.advance(Duration::hours(1));
    h.vault.startup().unwrap();
    assert_eq!(&h.vault.read_thumbnail(&item.id).unwrap().unwrap()[..], &preview[..]);
}

// ─── Test 11: Persistence across reopen ─────────────────────────────────────

#[test]
fn test_reopened_vault_unlocks_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let paths = VaultPaths::new(dir.path());
    let settings = VaultSettings::default();
    let notifier = Arc::new(RecordingGateway::default());
    let key_store = || -> Arc<dyn SecureKeyStore> {
        Arc::new(FileKeyStore::new(paths.key_dir()).unwrap())
    };

    let id = {
        let vault = TimeVault::open_with(
            &paths,
            &settings,
            key_store(),
            notifier.clone(),
            Arc::new(FixedClock::new(epoch())),
        )
        .unwrap();
        vault
            .create(text("written before restart", Duration::days(1)))
            .unwrap()
            .id
    };

    let later = Arc::new(FixedClock::new(epoch() + Duration::days(2)));
    let vault = TimeVault::open_with(&paths, &settings, key_store(), notifier, later).unwrap();
    assert_eq!(vault.get(&id).unwrap().status, ItemStatus::Unlocked);
    assert_eq!(
        vault.open_content(&id).unwrap().as_text(),
        Some("written before restart")
    );
    assert!(paths.key_dir().join(format!("{id}.key")).exists());
}
