//! Administrative bulk actions over a project's tasks.
//!
//! Each action mutates the store and then dispatches the recompute its
//! mutation calls for, so counters never stay stale after an action.

use std::sync::Arc;

use annotally_core::error::CoreError;
use annotally_core::recompute::{RecomputeRequest, SettingsChanges};
use annotally_core::types::DbId;

use crate::queue::{Dispatcher, JobHandle};
use crate::store::RecomputeStore;

/// Result of an administrative action.
#[derive(Debug)]
pub struct ActionOutcome {
    /// Rows the action created, deleted or merged.
    pub affected: u64,
    /// The follow-up recompute, if one was needed.
    pub job: Option<JobHandle>,
}

pub struct AdminActions {
    store: Arc<dyn RecomputeStore>,
    dispatcher: Dispatcher,
}

fn task_count_changed() -> SettingsChanges {
    SettingsChanges {
        tasks_number_changed: true,
        ..Default::default()
    }
}

impl AdminActions {
    pub fn new(store: Arc<dyn RecomputeStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Delete tasks with their annotations and predictions.
    pub async fn delete_tasks(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<ActionOutcome, CoreError> {
        if task_ids.is_empty() {
            return Ok(empty_outcome());
        }
        let deleted = self.store.delete_tasks(project_id, task_ids).await?;
        tracing::info!(project_id, deleted, "Tasks deleted");
        self.follow_up(
            deleted,
            RecomputeRequest::for_project(project_id).with_changes(task_count_changed()),
        )
        .await
    }

    /// Delete every annotation of the given tasks.
    pub async fn delete_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<ActionOutcome, CoreError> {
        if task_ids.is_empty() {
            return Ok(empty_outcome());
        }
        let deleted = self.store.delete_annotations(project_id, task_ids).await?;
        tracing::info!(
            project_id,
            task_count = task_ids.len(),
            deleted,
            "Annotations deleted"
        );
        let request = RecomputeRequest::for_tasks(project_id, task_ids.to_vec());
        self.follow_up(deleted, request).await
    }

    /// Delete every prediction of the given tasks.
    pub async fn delete_predictions(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<ActionOutcome, CoreError> {
        if task_ids.is_empty() {
            return Ok(empty_outcome());
        }
        let deleted = self.store.delete_predictions(project_id, task_ids).await?;
        tracing::info!(
            project_id,
            task_count = task_ids.len(),
            deleted,
            "Predictions deleted"
        );
        let request = RecomputeRequest::for_tasks(project_id, task_ids.to_vec());
        self.follow_up(deleted, request).await
    }

    /// Copy the newest prediction of each task into a new annotation.
    pub async fn predictions_to_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        completed_by: Option<DbId>,
    ) -> Result<ActionOutcome, CoreError> {
        if task_ids.is_empty() {
            return Ok(empty_outcome());
        }
        let created = self
            .store
            .predictions_to_annotations(project_id, task_ids, completed_by)
            .await?;
        tracing::info!(project_id, created, "Predictions converted to annotations");
        let request = RecomputeRequest::for_tasks(project_id, task_ids.to_vec());
        self.follow_up(created, request).await
    }

    /// Collapse tasks with identical data onto the lowest id of each group.
    ///
    /// Annotations and predictions of the merged tasks move to the kept
    /// task. Returns the number of tasks removed.
    pub async fn merge_duplicate_tasks(
        &self,
        project_id: DbId,
    ) -> Result<ActionOutcome, CoreError> {
        let groups = self.store.duplicate_groups(project_id).await?;
        if groups.is_empty() {
            tracing::debug!(project_id, "No duplicate tasks to merge");
            return Ok(empty_outcome());
        }

        let mut merged = 0;
        for group in &groups {
            let Some((&keep, rest)) = group.split_first() else {
                continue;
            };
            merged += self.store.merge_tasks(project_id, keep, rest).await?;
        }
        tracing::info!(
            project_id,
            groups = groups.len(),
            merged,
            "Duplicate tasks merged"
        );

        self.follow_up(
            merged,
            RecomputeRequest::for_project(project_id)
                .with_changes(task_count_changed())
                .from_scratch(),
        )
        .await
    }

    async fn follow_up(
        &self,
        affected: u64,
        request: RecomputeRequest,
    ) -> Result<ActionOutcome, CoreError> {
        let job = self.dispatcher.dispatch(request).await?;
        Ok(ActionOutcome {
            affected,
            job: Some(job),
        })
    }
}

fn empty_outcome() -> ActionOutcome {
    ActionOutcome {
        affected: 0,
        job: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
