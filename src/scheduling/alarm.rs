use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Stable identity of a registered alarm. Registering again under the same
/// key replaces the pending alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmKey(&'static str);

impl AlarmKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }
}

impl fmt::Display for AlarmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Delivered once per registration when its time has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmFired {
    pub key: AlarmKey,
}

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("exact alarms are not permitted")]
    Denied,

    #[error("alarm service is unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AlarmPort: Send + Sync + 'static {
    /// Fires `key` once at or after `at`. `exact = false` lets the
    /// implementation defer the alarm to batch wake-ups.
    async fn register(&self, key: AlarmKey, at: DateTime<Utc>, exact: bool)
    -> Result<(), AlarmError>;

    /// Removes the pending alarm for `key`, if any.
    async fn cancel(&self, key: AlarmKey) -> Result<(), AlarmError>;
}
