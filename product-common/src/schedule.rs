use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::health::HealthHandle;

/// Run `run_once` every `period`, forever.
///
/// Runs never overlap: a tick that fires while the previous run is still going is skipped.
/// Liveness is reported on every tick, so a long run does not mark the process as stalled.
pub async fn run_stage_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    run_on_startup: bool,
    liveness: HealthHandle,
    run_once: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Live from the start, even when the first run is a whole period away
    liveness.report_healthy().await;
    if !run_on_startup {
        // The first tick completes immediately
        interval.tick().await;
    }

    loop {
        interval.tick().await;
        liveness.report_healthy().await;

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            warn!(stage = name, "previous run still in progress, skipping tick");
            continue;
        };

        debug!(stage = name, "starting scheduled run");
        let run = run_once();
        tokio::spawn(async move {
            run.await;
            drop(permit);
        });
    }
}
