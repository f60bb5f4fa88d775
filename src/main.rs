mod appsettings;
mod console;
mod daemon;
mod delivery;
mod policy;
mod scheduling;
mod storage;
mod user_settings;
mod window;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use appsettings::{AppSettings, StorageKind};
use console::Console;
use delivery::LogNotifier;
use scheduling::{ReminderScheduler, SystemClock, TokioAlarmPort, Trigger};
use storage::{InMemorySettingsStorage, JsonFileSettingsStorage, SettingsStore};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = AppSettings::load()?;
    init_logging(&settings);

    let timezone = settings.timezone()?;
    log::info!("Starting mood reminder daemon, window timezone = {timezone}");

    let store: Arc<dyn SettingsStore> = match settings.storage.kind {
        StorageKind::File => {
            Arc::new(JsonFileSettingsStorage::open(&settings.storage.settings_path).await?)
        }
        StorageKind::Memory => Arc::new(InMemorySettingsStorage::default()),
    };

    let clock = Arc::new(SystemClock);
    let (alarms, fired_rx) = TokioAlarmPort::new(clock.clone(), settings.alarms.options());
    let scheduler = Arc::new(
        ReminderScheduler::new(
            store.clone(),
            Arc::new(alarms),
            Arc::new(LogNotifier),
            clock,
            timezone,
        )
        .with_cooldown(settings.scheduler.cooldown()),
    );

    if let Err(error) = scheduler.schedule(Trigger::AppStart).await {
        log::error!("Initial scheduling failed. error = {error}");
    }

    let console = Console::new(store, scheduler.clone());
    let input = BufReader::new(tokio::io::stdin());
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Received ctrl-c"),
            Err(error) => {
                log::error!("Cannot listen for ctrl-c, only 'quit' stops the daemon. error = {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    daemon::run(scheduler, console, fired_rx, input, shutdown).await;
    log::info!("Mood reminder daemon stopped");

    Ok(())
}

fn init_logging(settings: &AppSettings) {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_level.clone());
    let _ = pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .try_init();
}
