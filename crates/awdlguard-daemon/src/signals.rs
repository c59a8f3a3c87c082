use std::io;

use awdlguard_core::ControlHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    StartControl,
    StopControl,
}

/// Translate process signals into guardian requests.
///
/// SIGTERM and SIGINT cancel `cancel`. SIGUSR1 starts interface control and
/// SIGUSR2 stops it, through the same handle any other front end would use.
pub async fn handle_signals(control: ControlHandle, cancel: CancellationToken) -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;

    loop {
        let action = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                SignalAction::Shutdown
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
                SignalAction::Shutdown
            }
            _ = sigusr1.recv() => SignalAction::StartControl,
            _ = sigusr2.recv() => SignalAction::StopControl,
        };

        if !dispatch(&control, action).await {
            cancel.cancel();
            return Ok(());
        }
    }
}

/// Apply one action. Returns `false` once the daemon should shut down.
pub async fn dispatch(control: &ControlHandle, action: SignalAction) -> bool {
    match action {
        SignalAction::Shutdown => false,
        SignalAction::StartControl => match control.start().await {
            Ok(()) => {
                info!("Interface control started on request");
                true
            }
            Err(err) => {
                warn!("Start request failed: {}", err.user_message());
                !control.is_closed()
            }
        },
        SignalAction::StopControl => match control.stop().await {
            Ok(()) => {
                info!("Interface control stopped on request");
                true
            }
            Err(err) => {
                warn!("Stop request failed: {}", err.user_message());
                !control.is_closed()
            }
        },
    }
}
