use std::{path::PathBuf, time::Duration};

use chrono::TimeDelta;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::scheduling::{AlarmOptions, scheduler::DEFAULT_COOLDOWN_MINUTES};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    File,
    Memory,
}

#[derive(Deserialize, Debug)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub settings_path: PathBuf,
}

#[derive(Deserialize, Debug)]
pub struct AlarmSettings {
    pub exact_alarms: bool,
    pub inexact_window_secs: u64,
    pub max_sleep_slice_secs: u64,
}

impl AlarmSettings {
    pub fn options(&self) -> AlarmOptions {
        AlarmOptions {
            exact_alarms: self.exact_alarms,
            inexact_window: Duration::from_secs(self.inexact_window_secs),
            max_sleep_slice: Duration::from_secs(self.max_sleep_slice_secs.max(1)),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct SchedulerSettings {
    /// Reminders closer together than this are dropped.
    pub cooldown_minutes: u32,
}

impl SchedulerSettings {
    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.cooldown_minutes))
    }
}

#[derive(Deserialize, Debug)]
pub struct AppSettings {
    pub log_level: String,
    pub timezone: String,
    pub storage: StorageSettings,
    pub alarms: AlarmSettings,
    pub scheduler: SchedulerSettings,
}

impl AppSettings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("appsettings").required(false))
                .add_source(File::with_name("appsettings.local").required(false))
                .add_source(
                    Environment::with_prefix("APP")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings = builder
            .set_default("log_level", "info")?
            .set_default("timezone", "UTC")?
            .set_default("storage.kind", "file")?
            .set_default("storage.settings_path", "data/user_settings.json")?
            .set_default("alarms.exact_alarms", true)?
            .set_default("alarms.inexact_window_secs", 60)?
            .set_default("alarms.max_sleep_slice_secs", 30)?
            .set_default("scheduler.cooldown_minutes", i64::from(DEFAULT_COOLDOWN_MINUTES))?
            .build()?;

        settings.try_deserialize()
    }

    /// The zone the daily reminder window is evaluated in.
    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|error| anyhow::anyhow!("unknown timezone '{}': {error}", self.timezone))
    }
}
