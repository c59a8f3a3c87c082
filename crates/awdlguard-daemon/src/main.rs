#![deny(unsafe_op_in_unsafe_fn)]

use std::panic;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use awdlguard_core::runner::validate_interface_name;
use awdlguard_core::{control_channel, AwdlGuardian};
use awdlguard_daemon::config::DaemonConfig;
use awdlguard_daemon::{forward, signals, systemd};

// The guardian owns its authorization handle and monitor and is driven from
// this one task. Prompts block the runtime while they are up.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env();
    let log_cfg = awdlguard_logging::fs::read_config(&config.root_path);
    let _logging_guards = awdlguard_logging::init("awdlguardd", &config.root_path, &log_cfg)?;

    install_panic_hook();

    let _log_watcher = match awdlguard_logging::spawn_watcher(&config.root_path) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!("Logging watcher disabled: {:#}", err);
            None
        }
    };

    let span = tracing::info_span!("awdlguardd", interface = %config.guardian.interface);
    let _span_guard = span.enter();

    if let Err(err) = validate_interface_name(&config.guardian.interface) {
        warn!("{}; interface commands will be refused", err);
    }

    let cancel = CancellationToken::new();
    let mut guardian = AwdlGuardian::system(config.guardian.clone());
    let events = tokio::spawn(forward::forward_events(guardian.subscribe(), cancel.clone()));
    spawn_retention_task(config.root_path.clone(), cancel.clone());

    let (control, mut requests) = control_channel(config.control_queue);
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if let Err(err) = signals::handle_signals(control, signal_cancel.clone()).await {
            warn!("Signal handling unavailable: {}", err);
            // Without SIGTERM handling there is no clean way to stop.
            signal_cancel.cancel();
        }
    });

    if config.autostart {
        match guardian.start() {
            Ok(()) => info!("Interface control active at boot"),
            Err(err) => warn!("Autostart failed: {}", err.user_message()),
        }
    }

    systemd::notify_ready();
    let _watchdog = systemd::spawn_watchdog_task();
    info!("awdlguardd ready");

    guardian.run(&mut requests, cancel.clone()).await;
    // Requests still queued or in flight resolve to ControlClosed.
    drop(requests);

    info!("Starting graceful shutdown...");
    systemd::notify_stopping();
    if let Err(err) = guardian.stop() {
        warn!("Restoring {} failed: {}", config.guardian.interface, err);
    }
    drop(guardian);

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), signal_task).await;
    if let Ok(Ok(forwarded)) = tokio::time::timeout(Duration::from_secs(2), events).await {
        info!("Forwarded {} guardian events", forwarded);
    }

    info!("awdlguardd stopped");
    Ok(())
}

fn spawn_retention_task(root: PathBuf, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let cfg = awdlguard_logging::fs::read_config(&root);
                    match awdlguard_logging::run_retention(&root, &cfg) {
                        Ok(0) => {}
                        Ok(removed) => info!("Log retention removed {} files", removed),
                        Err(err) => warn!("Log retention failed: {:#}", err),
                    }
                }
            }
        }
    });
}

/// Log panics with location and backtrace before the default hook runs.
fn install_panic_hook() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        error!(
            target: "awdlguardd::panic",
            location = %location,
            message = %message,
            "PANIC: daemon panicked"
        );

        let backtrace = std::backtrace::Backtrace::capture();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            error!(target: "awdlguardd::panic", backtrace = %backtrace, "Panic backtrace");
        } else {
            error!(
                target: "awdlguardd::panic",
                "Backtrace not available (set RUST_BACKTRACE=1 to enable)"
            );
        }

        default_hook(panic_info);
    }));
}
