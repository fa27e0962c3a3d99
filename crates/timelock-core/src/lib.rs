//! timelock-core - time-locked secure vault
//!
//! Content is sealed under a fresh per-item key and becomes readable only
//! once its unlock time has passed and the scheduler has flipped it.
//!
//! # Module layout
//! - `models`      - item record, status/media enums, validated mutations
//! - `keys`        - per-item key custody over a pluggable secure key store
//! - `crypto`      - XChaCha20-Poly1305 sealing bound to the item id
//! - `blob_store`  - atomic on-disk storage of sealed blobs
//! - `repository`  - SQLite item records, guarded batch updates
//! - `scheduler`   - unlock runs, clock, deferred host tasks
//! - `background`  - tokio loop driving the scheduler
//! - `notify`      - unlock notices and the gateway trait
//! - `vault`       - `TimeVault` facade tying it together
//! - `settings` / `paths` - configuration and on-disk layout

pub mod background;
pub mod blob_store;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod models;
pub mod notify;
pub mod paths;
pub mod repository;
pub mod scheduler;
pub mod settings;
pub mod vault;

pub use error::{Result, VaultError};
pub use models::{ItemId, ItemMutation, ItemStatus, MediaType, VaultItem};
pub use vault::{NewItem, TimeVault, UnlockedContent};
