use std::{fmt, sync::Arc};

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{
    alarm::{AlarmError, AlarmKey, AlarmPort},
    clock::Clock,
};
use crate::{
    delivery::ReminderNotifier,
    policy::{Decision, ReminderPolicy, floor_to_minute},
    storage::{SettingsStore, StorageError},
    user_settings::UserSettings,
};

/// The one alarm slot this installation ever uses.
pub const REMINDER_ALARM_KEY: AlarmKey = AlarmKey::new("mood_reminder");

pub const DEFAULT_COOLDOWN_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    Idle,
    Armed,
    Firing,
}

/// Cached view of what is registered with the alarm port. Always derivable
/// from the settings and the current time, so losing it is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub phase: SchedulePhase,
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl ScheduleState {
    fn idle() -> Self {
        Self {
            phase: SchedulePhase::Idle,
            next_fire_at: None,
        }
    }

    fn armed(next_fire_at: DateTime<Utc>) -> Self {
        Self {
            phase: SchedulePhase::Armed,
            next_fire_at: Some(next_fire_at),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.phase == SchedulePhase::Armed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    AppStart,
    SettingsSaved,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::AppStart => f.write_str("app start"),
            Trigger::SettingsSaved => f.write_str("settings saved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Idle,
    Armed {
        next_fire_at: DateTime<Utc>,
        exact: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The reminder was emitted.
    Notified(ScheduleOutcome),
    /// Nothing was emitted: disabled meanwhile, fired outside the window or
    /// within the cooldown of the previous reminder.
    Skipped(ScheduleOutcome),
    /// A stale callback that arrived before the armed time; state untouched.
    Ignored,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("reminder settings could not be read: {0}")]
    Persistence(#[from] StorageError),

    #[error("reminder could not be scheduled: {0}")]
    SchedulingDenied(#[source] AlarmError),
}

pub struct ReminderScheduler {
    key: AlarmKey,
    timezone: Tz,
    settings: Arc<dyn SettingsStore>,
    alarms: Arc<dyn AlarmPort>,
    notifier: Arc<dyn ReminderNotifier>,
    clock: Arc<dyn Clock>,
    cooldown: TimeDelta,
    state: Mutex<ScheduleState>,
}

impl ReminderScheduler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        alarms: Arc<dyn AlarmPort>,
        notifier: Arc<dyn ReminderNotifier>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
    ) -> Self {
        Self {
            key: REMINDER_ALARM_KEY,
            timezone,
            settings,
            alarms,
            notifier,
            clock,
            cooldown: TimeDelta::minutes(i64::from(DEFAULT_COOLDOWN_MINUTES)),
            state: Mutex::new(ScheduleState::idle()),
        }
    }

    /// Minimum gap between two reminders. Recurring reminders use the shorter
    /// of this and their interval.
    pub fn with_cooldown(mut self, cooldown: TimeDelta) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn key(&self) -> AlarmKey {
        self.key
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub async fn state(&self) -> ScheduleState {
        *self.state.lock().await
    }

    /// Brings the registered alarm in line with the stored settings.
    ///
    /// Safe to call any number of times: the single alarm key is replaced, never
    /// duplicated.
    pub async fn schedule(&self, trigger: Trigger) -> Result<ScheduleOutcome, SchedulerError> {
        let mut state = self.state.lock().await;
        let settings = self.read_settings(&mut state).await?;
        let now = self.clock.now();
        let decision = ReminderPolicy::decide(self.local_time(now), &settings);

        log::info!("[SCHEDULE] Trigger = {trigger}, decision = {decision:?}");

        match decision {
            Decision::Disabled => {
                self.disarm(&mut state).await;
                Ok(ScheduleOutcome::Idle)
            }
            Decision::FireImmediately => self.arm(&mut state, now).await,
            Decision::Wait(delay) if delay <= TimeDelta::zero() => {
                self.arm(&mut state, now).await
            }
            Decision::Wait(delay) => self.arm(&mut state, floor_to_minute(now) + delay).await,
        }
    }

    /// Handles the alarm callback: re-validates against fresh settings, emits
    /// the reminder when still due and re-arms for the next occurrence.
    ///
    /// The notifier runs after the next registration is recorded and the state
    /// lock is released.
    pub async fn on_alarm_fired(&self) -> Result<FireOutcome, SchedulerError> {
        let mut reminder_text = None;
        let outcome = self.settle_fire(&mut reminder_text).await;

        if let Some(text) = reminder_text {
            if let Err(error) = self.notifier.notify(&text).await {
                log::error!("[FIRE] Reminder could not be delivered. error = {error:#}");
            }
        }

        outcome
    }

    async fn settle_fire(
        &self,
        reminder_text: &mut Option<String>,
    ) -> Result<FireOutcome, SchedulerError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let fired_at = match (state.phase, state.next_fire_at) {
            (SchedulePhase::Armed, Some(next_fire_at)) if now < next_fire_at => {
                log::info!("[FIRE] Ignoring alarm delivered before {next_fire_at}");
                return Ok(FireOutcome::Ignored);
            }
            (SchedulePhase::Armed, Some(next_fire_at)) => next_fire_at,
            _ => now,
        };

        state.phase = SchedulePhase::Firing;
        let settings = self.read_settings(&mut state).await?;

        match ReminderPolicy::decide(self.local_time(now), &settings) {
            Decision::Disabled => {
                log::info!("[FIRE] Reminders were disabled, not notifying");
                self.disarm(&mut state).await;
                Ok(FireOutcome::Skipped(ScheduleOutcome::Idle))
            }
            Decision::FireImmediately => {
                let due = self.claim_notification(fired_at, &settings).await;
                self.disarm(&mut state).await;
                if !due {
                    return Ok(FireOutcome::Skipped(ScheduleOutcome::Idle));
                }

                log::info!("[FIRE] One-shot reminder due, going idle");
                *reminder_text = Some(settings.reminder_text);
                Ok(FireOutcome::Notified(ScheduleOutcome::Idle))
            }
            Decision::Wait(delay) if delay > TimeDelta::zero() => {
                log::info!("[FIRE] Outside the reminder window, waiting {delay} for it to open");
                let outcome = self.arm(&mut state, floor_to_minute(now) + delay).await?;
                Ok(FireOutcome::Skipped(outcome))
            }
            Decision::Wait(_) => {
                let due = self.claim_notification(fired_at, &settings).await;
                let next_fire_at =
                    ReminderPolicy::next_fire_after(fired_at, now, &settings, &self.timezone);
                if due {
                    *reminder_text = Some(settings.reminder_text);
                }

                let outcome = self.arm(&mut state, next_fire_at).await?;
                if due {
                    Ok(FireOutcome::Notified(outcome))
                } else {
                    Ok(FireOutcome::Skipped(outcome))
                }
            }
        }
    }

    /// Records `fired_at` as the last reminder unless one went out within the
    /// cooldown. Returns whether the reminder should be emitted.
    async fn claim_notification(&self, fired_at: DateTime<Utc>, settings: &UserSettings) -> bool {
        let cooldown = if settings.is_one_shot() {
            self.cooldown
        } else {
            self.cooldown.min(settings.interval())
        };

        let last_notified_at = match self.settings.last_notified_at().await {
            Ok(last) => last,
            Err(error) => {
                log::warn!("[FIRE] Last reminder time unreadable, ignoring cooldown. error = {error}");
                None
            }
        };

        if let Some(last) = last_notified_at {
            if fired_at - last < cooldown {
                log::info!("[FIRE] Last reminder went out at {last}, within the {cooldown} cooldown");
                return false;
            }
        }

        if let Err(error) = self.settings.record_notified_at(fired_at).await {
            log::warn!("[FIRE] Could not record the reminder time. error = {error}");
        }

        true
    }

    /// Removes any pending alarm without consulting the settings.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        self.disarm(&mut state).await;
    }

    fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.timezone).time()
    }

    async fn read_settings(
        &self,
        state: &mut ScheduleState,
    ) -> Result<UserSettings, SchedulerError> {
        match self.settings.get_user_settings().await {
            Ok(settings) => Ok(settings),
            Err(error) => {
                log::error!("[SCHEDULE] Could not read settings, disarming. error = {error}");
                self.disarm(state).await;
                Err(error.into())
            }
        }
    }

    async fn arm(
        &self,
        state: &mut ScheduleState,
        fire_at: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let exact = match self.alarms.register(self.key, fire_at, true).await {
            Ok(()) => true,
            Err(exact_error) => {
                log::warn!(
                    "[SCHEDULE] Exact alarm refused ({exact_error}), falling back to inexact"
                );
                if let Err(error) = self.alarms.register(self.key, fire_at, false).await {
                    log::error!("[SCHEDULE] Inexact alarm refused as well. error = {error}");
                    self.disarm(state).await;
                    return Err(SchedulerError::SchedulingDenied(error));
                }
                false
            }
        };

        log::info!("[SCHEDULE] Next reminder at {fire_at} (exact = {exact})");
        *state = ScheduleState::armed(fire_at);

        Ok(ScheduleOutcome::Armed {
            next_fire_at: fire_at,
            exact,
        })
    }

    async fn disarm(&self, state: &mut ScheduleState) {
        if let Err(error) = self.alarms.cancel(self.key).await {
            log::error!("[CANCEL] Alarm {} could not be cancelled. error = {error}", self.key);
        }

        if state.is_armed() {
            log::info!("[CANCEL] Reminder alarm cancelled");
        }
        *state = ScheduleState::idle();
    }
}
