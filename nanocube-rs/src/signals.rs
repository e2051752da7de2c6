//! Terminates the platform once the process is asked to stop.
//!
//! Waits for **CTRL+C**, **SIGTERM** or **SIGHUP** and then invokes
//! [Platform::terminate](crate::platform::Platform::terminate), which makes the server shut down
//! gracefully.
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::platform::Platform;

/// Forks a task which terminates the given platform on CTRL+C, SIGTERM or SIGHUP.
///
/// This is invoked by the [Builder](crate::builder::Builder) unless disabled.
pub fn install(platform: Arc<Platform>) {
    let _ = tokio::spawn(async move {
        let (mut sig_term, mut sig_hup) =
            match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
                (Ok(sig_term), Ok(sig_hup)) => (sig_term, sig_hup),
                (Err(error), _) | (_, Err(error)) => {
                    log::warn!(
                        "Cannot install signal handlers ({}). Only CTRL-C is handled.",
                        error
                    );
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::info!("Received CTRL-C. Shutting down...");
                        platform.terminate();
                    }
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Received CTRL-C. Shutting down..."),
            _ = sig_term.recv() => log::info!("Received SIGTERM. Shutting down..."),
            _ = sig_hup.recv() => log::info!("Received SIGHUP. Shutting down..."),
        }

        platform.terminate();
    });
}
