use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::{
    sync::{Mutex, mpsc},
    task::{self, JoinHandle},
    time,
};
use tokio_util::sync::CancellationToken;

use super::{
    alarm::{AlarmError, AlarmFired, AlarmKey, AlarmPort},
    clock::Clock,
};

const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);
const FIRED_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct AlarmOptions {
    /// When false every exact registration is denied.
    pub exact_alarms: bool,
    /// Inexact alarms are deferred to the next multiple of this window.
    pub inexact_window: Duration,
    /// Longest single sleep before the wall clock is checked again.
    pub max_sleep_slice: Duration,
}

impl Default for AlarmOptions {
    fn default() -> Self {
        Self {
            exact_alarms: true,
            inexact_window: Duration::from_secs(60),
            max_sleep_slice: Duration::from_secs(30),
        }
    }
}

struct ScheduledAlarm {
    task_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl ScheduledAlarm {
    async fn cancel(self, timeout: Duration) {
        self.cancellation_token.cancel();
        let cancel_with_timeout = time::timeout(timeout, self.task_handle);
        let _ = cancel_with_timeout.await;
    }
}

/// In-process alarm service backed by tokio tasks.
///
/// Deadlines are wall-clock instants. Each alarm task sleeps in bounded slices
/// and re-reads the clock, so a wall clock that jumped forward while the
/// machine was suspended is noticed within one slice.
pub struct TokioAlarmPort {
    alarms: Mutex<HashMap<AlarmKey, ScheduledAlarm>>,
    fired_tx: mpsc::Sender<AlarmFired>,
    clock: Arc<dyn Clock>,
    options: AlarmOptions,
}

impl TokioAlarmPort {
    pub fn new(clock: Arc<dyn Clock>, options: AlarmOptions) -> (Self, mpsc::Receiver<AlarmFired>) {
        let (fired_tx, fired_rx) = mpsc::channel(FIRED_CHANNEL_CAPACITY);
        let port = Self {
            alarms: Mutex::new(HashMap::new()),
            fired_tx,
            clock,
            options,
        };

        (port, fired_rx)
    }

    /// Keys with an alarm that has neither fired nor been cancelled.
    #[cfg(test)]
    pub async fn pending(&self) -> Vec<AlarmKey> {
        self.alarms
            .lock()
            .await
            .iter()
            .filter(|(_, alarm)| !alarm.task_handle.is_finished())
            .map(|(key, _)| *key)
            .collect()
    }

    fn inexact_deadline(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.options.inexact_window.as_millis() as i64;
        if window == 0 {
            return at;
        }

        let requested = at.timestamp_millis();
        let remainder = requested.rem_euclid(window);
        if remainder == 0 {
            return at;
        }

        at + TimeDelta::milliseconds(window - remainder)
    }

    fn spawn_alarm(&self, key: AlarmKey, deadline: DateTime<Utc>) -> ScheduledAlarm {
        let cancellation_token = CancellationToken::new();
        let task_cancellation_token = cancellation_token.child_token();
        let clock = Arc::clone(&self.clock);
        let fired_tx = self.fired_tx.clone();
        let max_sleep_slice = self.options.max_sleep_slice;

        let task_handle = task::spawn(async move {
            run_alarm(
                key,
                deadline,
                clock,
                max_sleep_slice,
                task_cancellation_token,
                fired_tx,
            )
            .await
        });

        ScheduledAlarm {
            task_handle,
            cancellation_token,
        }
    }
}

#[async_trait]
impl AlarmPort for TokioAlarmPort {
    async fn register(
        &self,
        key: AlarmKey,
        at: DateTime<Utc>,
        exact: bool,
    ) -> Result<(), AlarmError> {
        if exact && !self.options.exact_alarms {
            return Err(AlarmError::Denied);
        }

        if self.fired_tx.is_closed() {
            return Err(AlarmError::Unavailable(
                "nobody is listening for alarms".to_owned(),
            ));
        }

        let deadline = if exact { at } else { self.inexact_deadline(at) };

        let mut alarms = self.alarms.lock().await;
        if let Some(previous) = alarms.remove(&key) {
            previous.cancel(CANCEL_TIMEOUT).await;
        }

        log::debug!("Registering alarm {key} at {deadline} (exact = {exact})");
        alarms.insert(key, self.spawn_alarm(key, deadline));

        Ok(())
    }

    async fn cancel(&self, key: AlarmKey) -> Result<(), AlarmError> {
        if let Some(alarm) = self.alarms.lock().await.remove(&key) {
            log::debug!("Cancelling alarm {key}");
            alarm.cancel(CANCEL_TIMEOUT).await;
        }

        Ok(())
    }
}

async fn run_alarm(
    key: AlarmKey,
    deadline: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    max_sleep_slice: Duration,
    cancellation_token: CancellationToken,
    fired_tx: mpsc::Sender<AlarmFired>,
) {
    loop {
        let remaining = deadline - clock.now();
        if remaining <= TimeDelta::zero() {
            break;
        }

        let slice = remaining.to_std().unwrap_or_default().min(max_sleep_slice);
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                log::debug!("Alarm {key} was cancelled before firing");
                return;
            }
            _ = time::sleep(slice) => {}
        }
    }

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            log::debug!("Alarm {key} was cancelled while firing");
        }
        result = fired_tx.send(AlarmFired { key }) => {
            if result.is_err() {
                log::warn!("Alarm {key} fired but nobody is listening");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;
    use test_strategy::proptest;

    use crate::scheduling::clock::test_clock::TokioClock;

    const KEY: AlarmKey = AlarmKey::new("test");

    struct TestContext {
        clock: Arc<TokioClock>,
        port: TokioAlarmPort,
        fired_rx: mpsc::Receiver<AlarmFired>,
    }

    impl TestContext {
        fn new(options: AlarmOptions) -> Self {
            let origin = NaiveDate::from_ymd_opt(2025, 5, 31)
                .unwrap()
                .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
                .and_utc();
            let clock = Arc::new(TokioClock::starting_at(origin));
            let (port, fired_rx) = TokioAlarmPort::new(clock.clone(), options);

            Self {
                clock,
                port,
                fired_rx,
            }
        }

        fn in_minutes(&self, minutes: i64) -> DateTime<Utc> {
            self.clock.now() + TimeDelta::minutes(minutes)
        }

        fn fired_count(&mut self) -> usize {
            let mut count = 0;
            while self.fired_rx.try_recv().is_ok() {
                count += 1;
            }
            count
        }
    }

    async fn wait_minutes(minutes: u64) {
        time::sleep(Duration::from_secs(minutes * 60)).await;
    }

    fn tokio_ct(
        future: impl std::future::Future<Output = Result<(), TestCaseError>>,
    ) -> Result<(), TestCaseError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(future)
    }

    #[tokio::test(start_paused = true)]
    pub async fn alarm_fires_at_deadline_and_not_before() {
        let mut ctx = TestContext::new(AlarmOptions::default());
        let at = ctx.in_minutes(10);

        ctx.port.register(KEY, at, true).await.unwrap();

        wait_minutes(9).await;
        assert_eq!(ctx.fired_count(), 0);

        wait_minutes(2).await;
        assert_eq!(ctx.fired_count(), 1);
        assert!(ctx.port.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    pub async fn registering_again_replaces_pending_alarm() {
        let mut ctx = TestContext::new(AlarmOptions::default());
        let first = ctx.in_minutes(5);
        let second = ctx.in_minutes(10);

        ctx.port.register(KEY, first, true).await.unwrap();
        ctx.port.register(KEY, second, true).await.unwrap();
        assert_eq!(ctx.port.pending().await, vec![KEY]);

        wait_minutes(6).await;
        assert_eq!(ctx.fired_count(), 0);

        wait_minutes(5).await;
        assert_eq!(ctx.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    pub async fn cancelled_alarm_never_fires() {
        let mut ctx = TestContext::new(AlarmOptions::default());
        let at = ctx.in_minutes(5);

        ctx.port.register(KEY, at, true).await.unwrap();
        ctx.port.cancel(KEY).await.unwrap();

        wait_minutes(10).await;
        assert_eq!(ctx.fired_count(), 0);
        assert!(ctx.port.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    pub async fn cancelling_unknown_key_is_a_no_op() {
        let ctx = TestContext::new(AlarmOptions::default());

        ctx.port.cancel(KEY).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    pub async fn exact_alarm_denied_when_not_permitted() {
        let mut ctx = TestContext::new(AlarmOptions {
            exact_alarms: false,
            ..AlarmOptions::default()
        });
        let at = ctx.in_minutes(5);

        let result = ctx.port.register(KEY, at, true).await;
        assert!(matches!(result, Err(AlarmError::Denied)));

        ctx.port.register(KEY, at, false).await.unwrap();
        wait_minutes(6).await;
        assert_eq!(ctx.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    pub async fn inexact_alarm_is_deferred_to_window_boundary() {
        let mut ctx = TestContext::new(AlarmOptions {
            inexact_window: Duration::from_secs(15 * 60),
            ..AlarmOptions::default()
        });
        // 12:00 + 5 minutes is rounded up to 12:15.
        let at = ctx.in_minutes(5);

        ctx.port.register(KEY, at, false).await.unwrap();

        wait_minutes(14).await;
        assert_eq!(ctx.fired_count(), 0);

        wait_minutes(2).await;
        assert_eq!(ctx.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    pub async fn wall_clock_jump_fires_after_one_slice() {
        let options = AlarmOptions::default();
        let mut ctx = TestContext::new(options);
        let at = ctx.in_minutes(120);

        ctx.port.register(KEY, at, true).await.unwrap();
        ctx.clock.jump(TimeDelta::hours(3));

        time::sleep(options.max_sleep_slice + Duration::from_secs(1)).await;
        assert_eq!(ctx.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    pub async fn register_fails_once_receiver_is_gone() {
        let ctx = TestContext::new(AlarmOptions::default());
        let TestContext { port, fired_rx, clock } = ctx;
        drop(fired_rx);

        let result = port
            .register(KEY, clock.now() + TimeDelta::minutes(1), false)
            .await;

        assert!(matches!(result, Err(AlarmError::Unavailable(_))));
    }

    #[proptest(async = tokio_ct)]
    async fn fires_exactly_once_per_registration(
        #[strategy(1i64..24 * 60)] minutes: i64,
        #[strategy(1usize..5)] registrations: usize,
    ) {
        let mut ctx = TestContext::new(AlarmOptions::default());
        let at = ctx.in_minutes(minutes);

        for _ in 0..registrations {
            ctx.port.register(KEY, at, true).await.unwrap();
        }

        wait_minutes(minutes as u64 + 1).await;
        prop_assert_eq!(ctx.fired_count(), 1);
    }
}
