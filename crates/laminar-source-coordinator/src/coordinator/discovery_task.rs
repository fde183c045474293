//! Split discovery task with exclusive ownership of the scan planner.
//!
//! The planner runs in its own tokio task and pushes batches to the
//! coordination loop through a bounded `mpsc` channel, so a slow planner
//! never blocks task-facing calls. When a poll finds nothing new the task
//! sleeps for the discovery interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use super::event::CoordinatorEvent;
use crate::metrics::CoordinatorMetrics;
use crate::planner::ScanPlanner;

/// Handle returned when the discovery task is spawned.
pub struct DiscoveryTaskHandle {
    /// Task join handle. Yields the planner back on exit.
    pub join: tokio::task::JoinHandle<Box<dyn ScanPlanner>>,
    /// Shutdown signal for this task.
    pub shutdown: Arc<Notify>,
}

/// Spawns the discovery task polling `planner` and sending events to `tx`.
#[must_use]
pub fn spawn_discovery_task(
    mut planner: Box<dyn ScanPlanner>,
    tx: mpsc::Sender<CoordinatorEvent>,
    discovery_interval: Duration,
    metrics: Arc<CoordinatorMetrics>,
) -> DiscoveryTaskHandle {
    let shutdown = Arc::new(Notify::new());
    let shutdown_rx = Arc::clone(&shutdown);

    let join = tokio::spawn(async move {
        tracing::debug!("Discovery task started");

        loop {
            let polled = tokio::select! {
                biased;

                () = shutdown_rx.notified() => {
                    tracing::debug!("Discovery task shutdown");
                    break;
                }

                polled = planner.next_batch() => polled,
            };

            let wait = match polled {
                Ok(Some(batch)) => {
                    // A full channel backpressures discovery.
                    tokio::select! {
                        biased;

                        () = shutdown_rx.notified() => {
                            tracing::debug!("Discovery task shutdown while sending");
                            break;
                        }

                        sent = tx.send(CoordinatorEvent::Discovered(batch)) => {
                            if sent.is_err() {
                                tracing::debug!("Coordinator dropped, stopping discovery");
                                break;
                            }
                        }
                    }
                    false
                }
                Ok(None) if planner.is_finished() => {
                    let _ = tx.send(CoordinatorEvent::Exhausted).await;
                    break;
                }
                Ok(None) => true,
                Err(e) => {
                    CoordinatorMetrics::incr(&metrics.planner_errors);
                    tracing::warn!(error = %e, "Scan planner error");
                    if tx
                        .send(CoordinatorEvent::PlannerError {
                            message: e.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    true
                }
            };

            if wait {
                tokio::select! {
                    biased;

                    () = shutdown_rx.notified() => {
                        tracing::debug!("Discovery task shutdown");
                        break;
                    }

                    () = tokio::time::sleep(discovery_interval) => {}
                }
            }
        }

        planner
    });

    DiscoveryTaskHandle { join, shutdown }
}
