//! Event-driven recompute triggering.
//!
//! [`RecomputeListener`] subscribes to the labeling event bus and dispatches
//! one recompute per event. Events reach the bus from in-process publishers
//! and from the database triggers relayed by [`crate::notify`].

use annotally_core::recompute::{RecomputeRequest, SettingsChanges};
use annotally_events::{EventKind, LabelingEvent};
use tokio::sync::broadcast;

use crate::queue::Dispatcher;

/// The recompute a labeling event calls for.
pub fn request_for(event: &LabelingEvent) -> RecomputeRequest {
    let project_id = event.project_id;
    match &event.kind {
        EventKind::AnnotationCreated { task_id }
        | EventKind::AnnotationUpdated { task_id }
        | EventKind::AnnotationDeleted { task_id }
        | EventKind::PredictionCreated { task_id }
        | EventKind::PredictionDeleted { task_id } => {
            RecomputeRequest::for_tasks(project_id, vec![*task_id])
        }
        EventKind::TasksImported { task_ids } => {
            RecomputeRequest::for_tasks(project_id, task_ids.clone()).with_changes(SettingsChanges {
                tasks_number_changed: true,
                ..Default::default()
            })
        }
        EventKind::TasksDeleted { .. } => {
            RecomputeRequest::for_project(project_id).with_changes(SettingsChanges {
                tasks_number_changed: true,
                ..Default::default()
            })
        }
        EventKind::ProjectSettingsChanged {
            maximum_annotations_changed,
            overlap_cohort_percentage_changed,
            use_overlap_changed,
        } => {
            let request = RecomputeRequest::for_project(project_id).with_changes(SettingsChanges {
                maximum_annotations_changed: *maximum_annotations_changed,
                overlap_cohort_percentage_changed: *overlap_cohort_percentage_changed,
                tasks_number_changed: false,
            });
            // Toggling overlap flips is_labeled without touching counters.
            if *use_overlap_changed {
                request.from_scratch()
            } else {
                request
            }
        }
    }
}

/// Background service that turns labeling events into recomputes.
pub struct RecomputeListener {
    dispatcher: Dispatcher,
}

impl RecomputeListener {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Run until the event bus is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<LabelingEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.handle(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Recompute listener lagged, counters may be stale until a full recompute"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, recompute listener shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&self, event: &LabelingEvent) {
        let request = request_for(event);
        match self.dispatcher.dispatch(request).await {
            Ok(handle) => tracing::debug!(
                job_id = %handle.id,
                project_id = event.project_id,
                event_type = event.kind.name(),
                "Recompute dispatched for event"
            ),
            Err(e) => tracing::error!(
                project_id = event.project_id,
                event_type = event.kind.name(),
                error = %e,
                "Failed to dispatch recompute for event"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
