//! Resolve loop: polls the name service until every task is registered.

use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use procfleet_core::LookupError;

use super::handle::{Inner, spawn_loop};
use super::{SupervisorError, SupervisorState, monitor};
use crate::backends::SupervisionBackend;

pub(super) async fn run(inner: Arc<Inner>) -> Result<(), SupervisorError> {
    inner.transition(&[SupervisorState::Spawning], SupervisorState::Resolving);

    let expected = inner.deployment.deployed_task_names();
    let mut consecutive_failures = 0u32;
    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(deployment = %inner.name(), tasks = ?expected, "Resolving tasks");

    loop {
        tokio::select! {
            biased;
            () = inner.quitting.cancelled() => {
                debug!(deployment = %inner.name(), "Resolution cancelled");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        inner.backend.check_startup(&inner.deployment).await?;

        for name in &expected {
            if inner.has_task(name) {
                continue;
            }
            match inner.name_service.get(name).await {
                Ok(task) => {
                    consecutive_failures = 0;
                    debug!(task = %name, ior = %task.ior(), "Task resolved");
                    inner.insert_task(name.clone(), task);
                }
                Err(LookupError::NotYetAvailable(_)) => {}
                Err(LookupError::Communication(reason)) => {
                    consecutive_failures += 1;
                    debug!(task = %name, %reason, consecutive_failures, "Name service unreachable");
                    if inner
                        .config
                        .max_resolve_failures
                        .is_some_and(|max| consecutive_failures >= max)
                    {
                        return Err(SupervisorError::TooManyResolveFailures {
                            task: name.clone(),
                            failures: consecutive_failures,
                        });
                    }
                }
                Err(source @ LookupError::PermanentFailure(_)) => {
                    return Err(SupervisorError::Lookup {
                        task: name.clone(),
                        source,
                    });
                }
            }
        }

        if expected.iter().all(|name| inner.has_task(name)) {
            break;
        }
    }

    if !inner.transition(&[SupervisorState::Resolving], SupervisorState::Ready) {
        return Ok(());
    }
    info!(deployment = %inner.name(), tasks = expected.len(), "All tasks resolved");

    spawn_loop(&inner, "monitor", monitor::run(Arc::clone(&inner)));
    inner.transition(&[SupervisorState::Ready], SupervisorState::Monitoring);
    Ok(())
}
