use std::{fmt::Write as _, str::FromStr, sync::Arc};

use thiserror::Error;

use crate::{
    scheduling::{ReminderScheduler, ScheduleOutcome, SchedulerError, Trigger},
    storage::SettingsStore,
    user_settings::UserSettings,
    window::{ClockTime, TimeWindow},
};

const HELP: &str = "\
Commands:
  show                  current settings and next reminder
  set start HH:MM       window start
  set end HH:MM         window end
  set interval MINUTES  minutes between reminders, 0 for a single one
  set text TEXT         reminder text
  enable | disable      turn reminders on or off
  save                  store the edited settings and reschedule
  help                  this message
  quit                  stop the daemon";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingField {
    Start(ClockTime),
    End(ClockTime),
    Interval(u32),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Show,
    Set(SettingField),
    Enable,
    Disable,
    Save,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unknown command '{0}', type 'help' for the list")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("interval must be a whole number of minutes, got '{0}'")]
    BadInterval(String),
}

impl FromStr for ConsoleCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match command.to_ascii_lowercase().as_str() {
            "show" => Ok(Self::Show),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "save" => Ok(Self::Save),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "set" => parse_set(rest).map(Self::Set),
            _ => Err(CommandParseError::Unknown(command.to_owned())),
        }
    }
}

fn parse_set(args: &str) -> Result<SettingField, CommandParseError> {
    const USAGE: &str = "set start|end HH:MM, set interval MINUTES, set text TEXT";

    let (field, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let value = value.trim();
    if value.is_empty() {
        return Err(CommandParseError::Usage(USAGE));
    }

    match field.to_ascii_lowercase().as_str() {
        "start" => Ok(SettingField::Start(ClockTime::normalize(value))),
        "end" => Ok(SettingField::End(ClockTime::normalize(value))),
        "interval" => value
            .parse()
            .map(SettingField::Interval)
            .map_err(|_| CommandParseError::BadInterval(value.to_owned())),
        "text" => Ok(SettingField::Text(value.to_owned())),
        _ => Err(CommandParseError::Usage(USAGE)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Message(String),
    Quit,
}

/// Line-oriented settings editor. Edits go to a draft that only reaches the
/// store, and the scheduler, on `save`.
pub struct Console {
    settings: Arc<dyn SettingsStore>,
    scheduler: Arc<ReminderScheduler>,
    draft: Option<UserSettings>,
}

impl Console {
    pub fn new(settings: Arc<dyn SettingsStore>, scheduler: Arc<ReminderScheduler>) -> Self {
        Self {
            settings,
            scheduler,
            draft: None,
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> ConsoleReply {
        if line.trim().is_empty() {
            return ConsoleReply::Message(String::new());
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(error) => return ConsoleReply::Message(error.to_string()),
        };

        log::debug!("Console command: {command:?}");

        let message = match command {
            ConsoleCommand::Quit => return ConsoleReply::Quit,
            ConsoleCommand::Help => HELP.to_owned(),
            ConsoleCommand::Show => self.show().await,
            ConsoleCommand::Set(field) => self.edit(|draft| apply_field(draft, field)).await,
            ConsoleCommand::Enable => self.edit(|draft| draft.enabled = true).await,
            ConsoleCommand::Disable => self.edit(|draft| draft.enabled = false).await,
            ConsoleCommand::Save => self.save().await,
        };

        ConsoleReply::Message(message)
    }

    async fn current_draft(&mut self) -> Result<&mut UserSettings, String> {
        if self.draft.is_none() {
            let stored = self
                .settings
                .get_user_settings()
                .await
                .map_err(|error| format!("Could not read settings: {error}"))?;
            self.draft = Some(stored);
        }

        Ok(self.draft.get_or_insert_with(UserSettings::default))
    }

    async fn edit(&mut self, change: impl FnOnce(&mut UserSettings)) -> String {
        match self.current_draft().await {
            Ok(draft) => {
                change(draft);
                format!("{} (unsaved, type 'save' to apply)", describe(draft))
            }
            Err(notice) => notice,
        }
    }

    async fn show(&mut self) -> String {
        let mut message = match (&self.draft, self.settings.get_user_settings().await) {
            (Some(draft), Ok(stored)) if *draft != stored => {
                format!("{} (unsaved edits)", describe(draft))
            }
            (_, Ok(stored)) => describe(&stored),
            (_, Err(error)) => return format!("Could not read settings: {error}"),
        };

        let state = self.scheduler.state().await;
        let timezone = self.scheduler.timezone();
        let _ = match state.next_fire_at {
            Some(at) if state.is_armed() => {
                write!(message, "\nNext reminder: {}", at.with_timezone(&timezone))
            }
            _ => write!(message, "\nNo reminder scheduled"),
        };

        message
    }

    async fn save(&mut self) -> String {
        let Some(draft) = self.draft.clone() else {
            return "Nothing to save".to_owned();
        };

        if let Err(error) = draft.validate() {
            return format!("Not saved: {error}");
        }

        if let Err(error) = self.settings.update_user_settings(&draft).await {
            log::error!("Saving settings failed. error = {error}");
            return format!("Not saved: {error}");
        }
        self.draft = None;

        match self.scheduler.schedule(Trigger::SettingsSaved).await {
            Ok(ScheduleOutcome::Idle) => "Saved. Reminders are off".to_owned(),
            Ok(ScheduleOutcome::Armed { next_fire_at, exact }) => {
                let timezone = self.scheduler.timezone();
                let mut message = format!(
                    "Saved. Next reminder at {}",
                    next_fire_at.with_timezone(&timezone)
                );
                if !exact {
                    message.push_str(" (may be slightly delayed)");
                }
                message
            }
            Err(error @ SchedulerError::SchedulingDenied(_)) => {
                format!("Saved, but reminders could not be scheduled: {error}")
            }
            Err(error) => format!("Saved, but rescheduling failed: {error}"),
        }
    }
}

fn apply_field(settings: &mut UserSettings, field: SettingField) {
    match field {
        SettingField::Start(start) => {
            settings.window = TimeWindow::new(start, settings.window.end())
        }
        SettingField::End(end) => settings.window = TimeWindow::new(settings.window.start(), end),
        SettingField::Interval(minutes) => settings.interval_minutes = minutes,
        SettingField::Text(text) => settings.reminder_text = text,
    }
}

fn describe(settings: &UserSettings) -> String {
    let interval = if settings.is_one_shot() {
        "once".to_owned()
    } else {
        format!("every {} min", settings.interval_minutes)
    };

    format!(
        "Reminders {}: {} {}, \"{}\"",
        if settings.enabled { "on" } else { "off" },
        settings.window,
        interval,
        settings.reminder_text
    )
}
