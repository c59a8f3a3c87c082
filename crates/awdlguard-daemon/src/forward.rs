use awdlguard_core::GuardianEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Log guardian events until cancelled or the guardian goes away. Returns the
/// number of events logged.
pub async fn forward_events(
    mut events: broadcast::Receiver<GuardianEvent>,
    cancel: CancellationToken,
) -> usize {
    let mut forwarded = 0;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                log_event(&event);
                forwarded += 1;
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Event forwarder fell behind; {} events dropped", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
    forwarded
}

fn log_event(event: &GuardianEvent) {
    match event {
        GuardianEvent::AuthorizationChanged(true) => info!("Administrator rights granted"),
        GuardianEvent::AuthorizationChanged(false) => info!("Administrator rights released"),
        GuardianEvent::ErrorOccurred(message) => warn!("Guardian error: {}", message),
    }
}
