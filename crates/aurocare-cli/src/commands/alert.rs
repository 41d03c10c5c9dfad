use std::sync::Arc;
use std::time::Duration;

use aurocare_core::escalation::plan_tiers;
use aurocare_core::{
    AlertError, AlertEvent, AlertId, AlertStateMachine, AlertType, Config, Contact,
    LoggingGateway,
};
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinSet;

#[derive(Subcommand)]
pub enum AlertAction {
    /// Raise an alert against the demo contacts and print its events as JSON lines
    Simulate {
        /// Patient identifier
        #[arg(long, default_value = "eleanor-thompson")]
        patient: String,
        /// Alert type: medical, fall, medication or panic
        #[arg(long = "type", default_value = "fall")]
        kind: AlertType,
        /// Where the patient is
        #[arg(long, default_value = "Living Room - 123 Oak Street")]
        location: String,
        /// Contact id that acknowledges the alert
        #[arg(long)]
        ack: Option<String>,
        /// Seconds before the acknowledgment arrives
        #[arg(long, default_value = "3")]
        ack_after: u64,
        /// Seconds before an operator responds
        #[arg(long)]
        respond_after: Option<u64>,
        /// Seconds before the alert is resolved
        #[arg(long)]
        resolve_after: Option<u64>,
        /// Seconds before the alert is cancelled
        #[arg(long)]
        cancel_after: Option<u64>,
        /// Simulated delivery latency in milliseconds
        #[arg(long, default_value = "200")]
        latency_ms: u64,
    },
    /// Print the dispatch tiers planned for the demo contacts
    Contacts,
}

/// Contacts shown on the emergency screen.
fn demo_contacts() -> Vec<Contact> {
    vec![
        Contact::new("dr-wilson", "Dr. Sarah Wilson", "+1 (555) 123-4567", 1)
            .with_role("Primary Care"),
        Contact::new("michael", "Michael Thompson", "+1 (555) 234-5678", 2).with_role("Son"),
        Contact::new("emergency", "Emergency Services", "911", 3).with_role("911"),
    ]
}

pub async fn run(action: AlertAction, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AlertAction::Contacts => {
            let tiers = plan_tiers(&demo_contacts());
            println!("{}", serde_json::to_string_pretty(&tiers)?);
        }
        AlertAction::Simulate {
            patient,
            kind,
            location,
            ack,
            ack_after,
            respond_after,
            resolve_after,
            cancel_after,
            latency_ms,
        } => {
            let gateway = Arc::new(LoggingGateway::with_latency(Duration::from_millis(latency_ms)));
            let escalation = config.escalation_config();
            let machine = AlertStateMachine::new(gateway, escalation);
            machine.register_contacts(&patient, demo_contacts());

            let mut events = machine.subscribe_all();
            let id = machine.activate(&patient, kind, &location)?;

            let mut actions: JoinSet<Result<(), AlertError>> = JoinSet::new();
            if let Some(contact) = ack {
                let m = machine.clone();
                actions.spawn(after(ack_after, async move {
                    m.acknowledge(id, &contact).map(|_| ())
                }));
            }
            if let Some(secs) = respond_after {
                let m = machine.clone();
                actions.spawn(after(secs, async move { m.respond(id).map(|_| ()) }));
            }
            if let Some(secs) = resolve_after {
                let m = machine.clone();
                actions.spawn(after(secs, async move { m.resolve(id).map(|_| ()) }));
            }
            if let Some(secs) = cancel_after {
                let m = machine.clone();
                actions.spawn(after(secs, async move { m.cancel(id).map(|_| ()) }));
            }

            follow(&mut events, &mut actions, id).await?;
            // Cancellation notices trail the state change.
            drain(&mut events, escalation.dispatch_timeout).await?;

            if let Some(alert) = machine.get_state(id) {
                println!("{}", serde_json::to_string(&alert)?);
            }
        }
    }
    Ok(())
}

async fn after<F>(secs: u64, action: F) -> Result<(), AlertError>
where
    F: std::future::Future<Output = Result<(), AlertError>>,
{
    tokio::time::sleep(Duration::from_secs(secs)).await;
    action.await
}

/// Print events until the alert closes, or until escalation has settled and
/// no scheduled operator action is left.
async fn follow(
    events: &mut Receiver<AlertEvent>,
    actions: &mut JoinSet<Result<(), AlertError>>,
    id: AlertId,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut escalation_settled = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    match &event {
                        AlertEvent::StateChanged { alert_id, to, .. }
                            if *alert_id == id && to.is_terminal() => return Ok(()),
                        AlertEvent::EscalationChanged { alert_id, status, .. }
                            if *alert_id == id && status.is_final() => escalation_settled = true,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event output lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
            Some(joined) = actions.join_next(), if !actions.is_empty() => {
                if let Err(e) = joined? {
                    tracing::warn!(error = %e, "operator action rejected");
                }
            }
        }
        if escalation_settled && actions.is_empty() {
            return Ok(());
        }
    }
}

async fn drain(events: &mut Receiver<AlertEvent>, grace: Duration) -> Result<(), Box<dyn std::error::Error>> {
    while let Ok(event) = tokio::time::timeout(grace, events.recv()).await {
        match event {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}
