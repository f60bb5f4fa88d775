use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::{
    delivery::ReminderNotifier,
    scheduling::{
        ReminderScheduler,
        alarm::{AlarmError, AlarmKey, AlarmPort},
        test_clock::ManualClock,
    },
    storage::{InMemorySettingsStorage, SettingsStore, StorageError},
    user_settings::UserSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub at: DateTime<Utc>,
    pub exact: bool,
}

/// Records registrations instead of arming real timers.
#[derive(Default)]
pub struct FakeAlarmPort {
    registrations: Mutex<HashMap<AlarmKey, Registration>>,
    deny_exact: Mutex<bool>,
    deny_all: Mutex<bool>,
}

impl FakeAlarmPort {
    pub fn deny_exact(&self) {
        *self.deny_exact.lock().unwrap() = true;
    }

    pub fn deny_all(&self) {
        *self.deny_all.lock().unwrap() = true;
    }

    pub fn registrations(&self) -> HashMap<AlarmKey, Registration> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn registration(&self, key: AlarmKey) -> Option<Registration> {
        self.registrations.lock().unwrap().get(&key).copied()
    }
}

#[async_trait]
impl AlarmPort for FakeAlarmPort {
    async fn register(
        &self,
        key: AlarmKey,
        at: DateTime<Utc>,
        exact: bool,
    ) -> Result<(), AlarmError> {
        if *self.deny_all.lock().unwrap() {
            return Err(AlarmError::Unavailable("denied by test".to_owned()));
        }
        if exact && *self.deny_exact.lock().unwrap() {
            return Err(AlarmError::Denied);
        }

        self.registrations
            .lock()
            .unwrap()
            .insert(key, Registration { at, exact });
        Ok(())
    }

    async fn cancel(&self, key: AlarmKey) -> Result<(), AlarmError> {
        self.registrations.lock().unwrap().remove(&key);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReminderNotifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.received.lock().unwrap().push(text.to_owned());
        Ok(())
    }
}

/// Store whose reads start failing once `fail_reads` is called.
#[derive(Default)]
pub struct FlakySettingsStore {
    inner: InMemorySettingsStorage,
    failing: Mutex<bool>,
}

impl FlakySettingsStore {
    pub fn fail_reads(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl SettingsStore for FlakySettingsStore {
    async fn get_user_settings(&self) -> Result<UserSettings, StorageError> {
        if *self.failing.lock().unwrap() {
            return Err(io::Error::other("disk unplugged").into());
        }
        self.inner.get_user_settings().await
    }

    async fn update_user_settings(&self, settings: &UserSettings) -> Result<(), StorageError> {
        self.inner.update_user_settings(settings).await
    }

    async fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.inner.last_notified_at().await
    }

    async fn record_notified_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.inner.record_notified_at(at).await
    }
}

pub fn utc(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2025, 5, day)
        .unwrap()
        .and_time(NaiveTime::from_hms_opt(hour, minute, second).unwrap())
        .and_utc()
}

pub struct TestContext {
    pub settings: Arc<FlakySettingsStore>,
    pub alarms: Arc<FakeAlarmPort>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ReminderScheduler>,
}

impl TestContext {
    pub async fn new(settings: UserSettings, now: DateTime<Utc>) -> Self {
        Self::with_timezone(settings, now, chrono_tz::UTC).await
    }

    pub async fn with_timezone(
        settings: UserSettings,
        now: DateTime<Utc>,
        timezone: chrono_tz::Tz,
    ) -> Self {
        let store = Arc::new(FlakySettingsStore::default());
        store.update_user_settings(&settings).await.unwrap();
        let alarms = Arc::new(FakeAlarmPort::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(now));
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            alarms.clone(),
            notifier.clone(),
            clock.clone(),
            timezone,
        ));

        Self {
            settings: store,
            alarms,
            notifier,
            clock,
            scheduler,
        }
    }

    /// Same collaborators, fresh scheduler: what a restarted process sees.
    pub fn restart(&self, timezone: chrono_tz::Tz) -> Arc<ReminderScheduler> {
        Arc::new(ReminderScheduler::new(
            self.settings.clone(),
            self.alarms.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            timezone,
        ))
    }

    pub async fn save(&self, settings: UserSettings) {
        self.settings.update_user_settings(&settings).await.unwrap();
    }
}
