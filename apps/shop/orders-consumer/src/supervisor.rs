//! Restart loop around a consumer run.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Delay before a consumer that stopped with an error is started again.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Run `run_once` until it returns `Ok` or shutdown is signalled.
///
/// Each failed run is logged and retried after `restart_delay`. Returns the
/// number of runs that were started.
pub async fn supervise<F, Fut, E>(
    mut run_once: F,
    mut shutdown_rx: watch::Receiver<bool>,
    restart_delay: Duration,
) -> usize
where
    F: FnMut(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut runs = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        runs += 1;
        match run_once(shutdown_rx.clone()).await {
            Ok(()) => break,
            Err(e) => {
                if *shutdown_rx.borrow() {
                    error!(error = %e, "Consumer failed during shutdown");
                    break;
                }
                error!(
                    error = %e,
                    run = runs,
                    restart_in_ms = restart_delay.as_millis() as u64,
                    "Consumer stopped with an error, restarting"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(runs, "Consumer supervision finished");
    runs
}
