use std::time::Duration;

use aurocare_core::{CancelToken, Config, ReminderEvent, ReminderScheduler};
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

#[derive(Subcommand)]
pub enum ReminderAction {
    /// Run the reminder loop and print events as JSON lines
    Run {
        /// Stop after this many seconds (runs until killed otherwise)
        #[arg(long)]
        seconds: Option<u64>,
        /// Show and acknowledge every reminder as soon as it is raised
        #[arg(long)]
        auto_ack: bool,
    },
    /// Print the configured reminder catalog
    Catalog,
}

pub async fn run(action: ReminderAction, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ReminderAction::Catalog => {
            let json = serde_json::to_string_pretty(&config.reminders.catalog)?;
            println!("{json}");
        }
        ReminderAction::Run { seconds, auto_ack } => {
            let scheduler = ReminderScheduler::new(config.reminders.catalog.clone(), config.reminder_config()?);
            let mut events = scheduler.subscribe();
            let cancel = CancelToken::new();
            let task = scheduler.start(cancel.clone());

            let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
            let stop = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(stop);

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            println!("{}", serde_json::to_string(&event)?);
                            if let (true, ReminderEvent::ReminderPending { reminder }) = (auto_ack, &event) {
                                scheduler.mark_shown(reminder.id)?;
                                scheduler.acknowledge(reminder.id)?;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event output lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            cancel.cancel();
            task.await?;
        }
    }
    Ok(())
}
