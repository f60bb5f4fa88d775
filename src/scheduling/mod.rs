pub(crate) mod alarm;
mod clock;
pub(crate) mod scheduler;
mod tokio_alarm;

pub use clock::SystemClock;
pub use scheduler::{ReminderScheduler, ScheduleOutcome, SchedulerError, Trigger};
pub use tokio_alarm::{AlarmOptions, TokioAlarmPort};

#[cfg(test)]
pub(crate) use clock::test_clock;
