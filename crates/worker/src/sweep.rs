//! Periodic consistency sweep.
//!
//! Events can be lost (a lagged listener, a crash between a mutation and its
//! recompute). The sweep runs an incremental recompute over every project on
//! a fixed interval so stale counters are eventually repaired.

use std::sync::Arc;
use std::time::Duration;

use annotally_core::error::CoreError;
use annotally_core::recompute::RecomputeRequest;
use tokio_util::sync::CancellationToken;

use crate::queue::Dispatcher;
use crate::store::RecomputeStore;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(
    store: Arc<dyn RecomputeStore>,
    dispatcher: Dispatcher,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = every.as_secs(), "Consistency sweep started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Consistency sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep_once(store.as_ref(), &dispatcher).await {
                    Ok(0) => tracing::debug!("Consistency sweep: no projects"),
                    Ok(projects) => tracing::info!(projects, "Consistency sweep dispatched"),
                    Err(e) => tracing::error!(error = %e, "Consistency sweep failed"),
                }
            }
        }
    }
}

/// Dispatch one incremental recompute per project. Returns the number of
/// projects dispatched.
pub async fn sweep_once(
    store: &dyn RecomputeStore,
    dispatcher: &Dispatcher,
) -> Result<usize, CoreError> {
    let projects = store.project_ids().await?;
    for &project_id in &projects {
        dispatcher
            .dispatch(RecomputeRequest::for_project(project_id))
            .await?;
    }
    Ok(projects.len())
}
