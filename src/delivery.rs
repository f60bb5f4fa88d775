use async_trait::async_trait;

/// Surface a due reminder reaches the user through.
#[async_trait]
pub trait ReminderNotifier: Send + Sync + 'static {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// Writes reminders to the log under the `reminder` target.
pub struct LogNotifier;

#[async_trait]
impl ReminderNotifier for LogNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        log::info!(target: "reminder", "{text}");
        Ok(())
    }
}
