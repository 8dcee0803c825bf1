//! Monitor loop: pings every resolved task until one stops answering.

use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use super::handle::Inner;
use super::{SupervisorError, SupervisorState};

pub(super) async fn run(inner: Arc<Inner>) -> Result<(), SupervisorError> {
    let tasks = inner.tasks_in_order();
    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(deployment = %inner.name(), tasks = tasks.len(), "Starting monitor");

    loop {
        tokio::select! {
            biased;
            () = inner.quitting.cancelled() => {
                debug!(deployment = %inner.name(), "Monitor cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        for task in &tasks {
            if inner.quitting.is_cancelled() {
                return Ok(());
            }
            if let Err(e) = task.ping().await {
                warn!(
                    deployment = %inner.name(),
                    task = %task.name(),
                    error = %e,
                    "Task stopped answering"
                );
                let died = inner.transition(
                    &[SupervisorState::Ready, SupervisorState::Monitoring],
                    SupervisorState::Dead,
                );
                inner.quitting.cancel();
                if died {
                    inner.reap().await;
                }
                return Ok(());
            }
        }
    }
}
