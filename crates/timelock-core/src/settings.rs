use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::background::DEFAULT_UNLOCK_INTERVAL;
use crate::error::{Result, VaultError};
use crate::keys::DEFAULT_KEYRING_SERVICE;
use crate::notify::DEFAULT_NOTICE_TITLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBackend {
    /// OS credential store.
    Keyring,
    /// Owner-only files under the data directory.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySettings {
    pub backend: KeyBackend,
    #[serde(default = "default_service")]
    pub keyring_service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockSettings {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    pub keys: KeySettings,
    pub unlock: UnlockSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

fn default_service() -> String {
    DEFAULT_KEYRING_SERVICE.to_string()
}

fn default_title() -> String {
    DEFAULT_NOTICE_TITLE.to_string()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
        }
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            keys: KeySettings {
                backend: KeyBackend::Keyring,
                keyring_service: default_service(),
            },
            unlock: UnlockSettings {
                interval_secs: DEFAULT_UNLOCK_INTERVAL.as_secs(),
            },
            notifications: NotificationSettings::default(),
        }
    }
}

impl VaultSettings {
    /// Read settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let settings: Self = serde_json::from_slice(&bytes)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn unlock_interval(&self) -> Duration {
        Duration::from_secs(self.unlock.interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.unlock.interval_secs == 0 {
            return Err(VaultError::Config("unlock.interval_secs must be positive".into()));
        }
        if self.keys.keyring_service.trim().is_empty() {
            return Err(VaultError::Config("keys.keyring_service must not be empty".into()));
        }
        Ok(())
    }
}
