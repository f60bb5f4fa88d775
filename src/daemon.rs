use std::{future::Future, pin::pin, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
};

use crate::{
    console::{Console, ConsoleReply},
    scheduling::{ReminderScheduler, alarm::AlarmFired},
};

/// Multiplexes alarm fires, console lines and `shutdown` until shutdown
/// resolves or the console asks to quit, then cancels the pending alarm.
///
/// `shutdown` is polled across loop iterations, so a signal that arrives while
/// an alarm or a console line is being handled is still observed.
pub async fn run<R>(
    scheduler: Arc<ReminderScheduler>,
    mut console: Console,
    mut fired_rx: mpsc::Receiver<AlarmFired>,
    input: R,
    shutdown: impl Future<Output = ()>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut input_open = true;
    let mut shutdown = pin!(shutdown);

    loop {
        tokio::select! {
            Some(fired) = fired_rx.recv() => {
                if fired.key != scheduler.key() {
                    log::warn!("Ignoring alarm for unknown key {}", fired.key);
                    continue;
                }
                if let Err(error) = scheduler.on_alarm_fired().await {
                    log::error!("Handling the reminder alarm failed. error = {error}");
                }
            }
            line = lines.next_line(), if input_open => {
                match line {
                    Ok(Some(line)) => match console.handle_line(&line).await {
                        ConsoleReply::Message(message) if message.is_empty() => {}
                        ConsoleReply::Message(message) => println!("{message}"),
                        ConsoleReply::Quit => break,
                    },
                    Ok(None) => {
                        log::info!("Console input closed, running until shutdown");
                        input_open = false;
                    }
                    Err(error) => {
                        log::error!("Reading console input failed. error = {error}");
                        input_open = false;
                    }
                }
            }
            _ = &mut shutdown => {
                log::info!("Shutdown requested");
                break;
            }
        }
    }

    scheduler.cancel().await;
}
