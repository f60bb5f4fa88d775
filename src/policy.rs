use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};

use crate::{user_settings::UserSettings, window::ClockTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Reminders are off; no alarm may stay registered.
    Disabled,
    /// One-shot configuration: fire once now and do not repeat.
    FireImmediately,
    /// Fire after the given delay. Zero means the window is open right now.
    Wait(TimeDelta),
}

pub struct ReminderPolicy;

impl ReminderPolicy {
    pub fn decide(now: NaiveTime, settings: &UserSettings) -> Decision {
        if !settings.enabled {
            return Decision::Disabled;
        }

        if settings.is_one_shot() {
            return Decision::FireImmediately;
        }

        let now = ClockTime::from(now);
        let minutes = if settings.window.contains(now) {
            0
        } else {
            settings.window.minutes_until_open(now)
        };

        Decision::Wait(TimeDelta::minutes(i64::from(minutes)))
    }

    /// Next fire time after a reminder that was due at `fired_at`.
    ///
    /// Counts from the due time rather than from `now`, so late callbacks do
    /// not push the schedule back. Occurrences lost while the machine was
    /// asleep are skipped, and a result that falls outside the window moves to
    /// the next window opening. Expects a recurring (non zero) interval.
    pub fn next_fire_after<Tz: TimeZone>(
        fired_at: DateTime<Utc>,
        now: DateTime<Utc>,
        settings: &UserSettings,
        timezone: &Tz,
    ) -> DateTime<Utc> {
        let step = settings.interval().num_milliseconds().max(1);
        let mut candidate = fired_at + TimeDelta::milliseconds(step);

        if candidate <= now {
            let missed = (now - fired_at).num_milliseconds() / step;
            log::warn!(
                "Skipping {} missed reminder occurrence(s) since {}",
                missed,
                fired_at
            );
            candidate = fired_at + TimeDelta::milliseconds(step * (missed + 1));
        }

        let local = ClockTime::from(candidate.with_timezone(timezone).time());
        if settings.window.contains(local) {
            return candidate;
        }

        let until_open = settings.window.minutes_until_open(local);
        floor_to_minute(candidate) + TimeDelta::minutes(i64::from(until_open))
    }
}

pub fn floor_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at - TimeDelta::seconds(i64::from(at.second()))
        - TimeDelta::nanoseconds(i64::from(at.nanosecond()))
}
