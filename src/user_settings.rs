use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::window::TimeWindow;

pub const DEFAULT_INTERVAL_MINUTES: u32 = 180;
pub const DEFAULT_REMINDER_TEXT: &str = "How are you feeling right now? Tap to log your mood!";

/// The single settings record the scheduler decides from.
///
/// Serialized as `{startTime, endTime, intervalMinutes, enabled, reminderText}`.
/// Missing fields take their defaults, so an older or partially written record
/// still yields a complete value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    #[serde(flatten)]
    pub window: TimeWindow,
    /// `0` fires a single reminder right away and then stops.
    pub interval_minutes: u32,
    pub enabled: bool,
    pub reminder_text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsValidationError {
    #[error("reminder text must not be empty")]
    BlankReminderText,
}

impl UserSettings {
    pub fn interval(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.interval_minutes))
    }

    pub fn is_one_shot(&self) -> bool {
        self.interval_minutes == 0
    }

    pub fn validate(&self) -> Result<(), SettingsValidationError> {
        if self.reminder_text.trim().is_empty() {
            return Err(SettingsValidationError::BlankReminderText);
        }

        Ok(())
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            window: TimeWindow::default(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            enabled: true,
            reminder_text: DEFAULT_REMINDER_TEXT.to_owned(),
        }
    }
}
