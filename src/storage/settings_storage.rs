use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, sync::RwLock};

use crate::user_settings::UserSettings;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("settings file could not be accessed: {0}")]
    Io(#[from] io::Error),

    #[error("settings file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the stored record, or complete defaults if none was written yet.
    async fn get_user_settings(&self) -> Result<UserSettings, StorageError>;

    /// Overwrites the single settings record. Does not reschedule anything.
    async fn update_user_settings(&self, settings: &UserSettings) -> Result<(), StorageError>;

    /// When the last reminder went out, if one ever did.
    async fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StorageError>;

    async fn record_notified_at(&self, at: DateTime<Utc>) -> Result<(), StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRecord {
    /// Milliseconds since the unix epoch.
    last_notification_time: i64,
}

pub struct InMemorySettingsStorage {
    store: RwLock<UserSettings>,
    last_notified: RwLock<Option<DateTime<Utc>>>,
}

impl InMemorySettingsStorage {
    pub fn new(settings: UserSettings) -> Self {
        Self {
            store: RwLock::new(settings),
            last_notified: RwLock::new(None),
        }
    }
}

impl Default for InMemorySettingsStorage {
    fn default() -> Self {
        Self::new(UserSettings::default())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStorage {
    async fn get_user_settings(&self) -> Result<UserSettings, StorageError> {
        Ok(self.store.read().await.clone())
    }

    async fn update_user_settings(&self, settings: &UserSettings) -> Result<(), StorageError> {
        *self.store.write().await = settings.clone();
        Ok(())
    }

    async fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(*self.last_notified.read().await)
    }

    async fn record_notified_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        *self.last_notified.write().await = Some(at);
        Ok(())
    }
}

/// Settings kept as a single pretty-printed JSON document. The time of the
/// last reminder lives in a sibling `*.last_notification.json` file.
pub struct JsonFileSettingsStorage {
    path: PathBuf,
    notification_path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileSettingsStorage {
    /// Opens the store, writing the defaults on first launch.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path: PathBuf = path.into();
        let storage = Self {
            notification_path: path.with_extension("last_notification.json"),
            path,
            write_lock: tokio::sync::Mutex::new(()),
        };

        if !fs::try_exists(&storage.path).await? {
            log::info!(
                "Creating settings file with defaults at {}",
                storage.path.display()
            );
            storage
                .update_user_settings(&UserSettings::default())
                .await?;
        }

        Ok(storage)
    }

    async fn write_atomically(&self, path: &Path, text: String) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_path = path.to_path_buf().into_os_string();
        tmp_path.push(".tmp");

        fs::write(&tmp_path, text).await?;
        fs::rename(&tmp_path, path).await?;

        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStorage {
    async fn get_user_settings(&self) -> Result<UserSettings, StorageError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                log::warn!(
                    "Settings file {} is missing, using defaults",
                    self.path.display()
                );
                return Ok(UserSettings::default());
            }
            Err(error) => return Err(error.into()),
        };

        Ok(serde_json::from_str(&text)?)
    }

    async fn update_user_settings(&self, settings: &UserSettings) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(settings)?;
        self.write_atomically(&self.path, text).await
    }

    async fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let text = match fs::read_to_string(&self.notification_path).await {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let record: NotificationRecord = serde_json::from_str(&text)?;
        Ok(DateTime::from_timestamp_millis(record.last_notification_time))
    }

    async fn record_notified_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        let record = NotificationRecord {
            last_notification_time: at.timestamp_millis(),
        };
        let text = serde_json::to_string_pretty(&record)?;
        self.write_atomically(&self.notification_path, text).await
    }
}
