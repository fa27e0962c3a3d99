//! Unlock state machine driver.
//!
//! Each run captures `now` once, finds locked items that are due, and flips
//! them in a single guarded batch. Nothing is decrypted. A run that is
//! cancelled before the commit changes nothing; the next run picks up the
//! remaining items.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, VaultError};
use crate::models::{normalize_timestamp, ItemId};
use crate::repository::{GuardedUpdate, ItemFilter, ItemRepository, SortOrder};

/// Identifier hosts register the deferred unlock task under.
pub const UNLOCK_TASK_ID: &str = "com.timelock.unlock";

// ── Clock ───────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

// ── Deferred execution ──────────────────────────────────────────────────────

/// Shared flag the host flips when it revokes a running task.
#[derive(Debug, Default, Clone)]
pub struct ExpirationHandle(Arc<AtomicBool>);

impl ExpirationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expire(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_expired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockReport {
    /// The single instant every due check in the run was made against.
    pub now: DateTime<Utc>,
    pub unlocked: Vec<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(UnlockReport),
    /// The host revoked the task, or its deadline passed, before the commit.
    Expired,
    Failed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// A host-granted opportunity to run the scheduler in the background.
pub struct DeferredTask {
    pub identifier: String,
    pub expiration: ExpirationHandle,
    pub deadline: Option<Instant>,
    completion: Box<dyn FnOnce(TaskOutcome) + Send>,
}

impl DeferredTask {
    pub fn new<F>(expiration: ExpirationHandle, deadline: Option<Instant>, completion: F) -> Self
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        Self {
            identifier: UNLOCK_TASK_ID.to_string(),
            expiration,
            deadline,
            completion: Box::new(completion),
        }
    }

    fn is_expired(&self) -> bool {
        self.expiration.is_expired() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct UnlockScheduler {
    repo: Arc<dyn ItemRepository>,
    clock: Arc<dyn Clock>,
}

impl UnlockScheduler {
    pub fn new(repo: Arc<dyn ItemRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// One uninterruptible scan against the current clock.
    pub fn run(&self) -> Result<UnlockReport> {
        self.run_until(self.clock.now(), || false)
    }

    /// Scan as of `now`. Useful for replaying a missed trigger.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<UnlockReport> {
        self.run_until(now, || false)
    }

    /// Entry point for host background execution. The completion callback
    /// always fires exactly once.
    pub fn run_deferred(&self, task: DeferredTask) {
        let outcome = match self.run_until(self.clock.now(), || task.is_expired()) {
            Ok(report) => TaskOutcome::Completed(report),
            Err(VaultError::Cancelled) => {
                warn!(task = %task.identifier, "deferred unlock run expired before commit");
                TaskOutcome::Expired
            }
            Err(e) => {
                warn!(task = %task.identifier, error = %e, "deferred unlock run failed");
                TaskOutcome::Failed(e.to_string())
            }
        };
        (task.completion)(outcome);
    }

    fn run_until(&self, now: DateTime<Utc>, expired: impl Fn() -> bool) -> Result<UnlockReport> {
        let now = normalize_timestamp(now);
        let due = self
            .repo
            .query(&ItemFilter::DueForUnlock { now }, SortOrder::UnlockAscending)?;

        let updates: Vec<GuardedUpdate> = due
            .iter()
            .map(|item| GuardedUpdate::unlock(item.id, now))
            .collect();

        // Last point at which giving up is free.
        if expired() {
            return Err(VaultError::Cancelled);
        }

        let unlocked = if updates.is_empty() {
            Vec::new()
        } else {
            self.repo.commit_batch(&updates)?
        };

        if !unlocked.is_empty() {
            info!(count = unlocked.len(), now = %now, "items unlocked");
        }
        Ok(UnlockReport { now, unlocked })
    }
}
