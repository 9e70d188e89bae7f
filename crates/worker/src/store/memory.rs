//! In-memory [`RecomputeStore`] for tests.
//!
//! Mirrors the PostgreSQL semantics closely enough for the orchestrator
//! and the admin actions, and counts every trait call as one store
//! operation so tests can assert on round trips.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use annotally_core::cohort::CohortPartition;
use annotally_core::error::CoreError;
use annotally_core::labeling::{self, LabelingPolicy, TaskCounts, TaskLabelState};
use annotally_core::recompute::TaskScope;
use annotally_core::types::DbId;
use annotally_db::bulk_update::{build_statements, BulkUpdateError, TASK_STATE_FIELDS};
use async_trait::async_trait;

use super::RecomputeStore;

#[derive(Debug, Clone)]
struct MemTask {
    project_id: DbId,
    data: serde_json::Value,
    state: TaskLabelState,
}

#[derive(Debug, Clone)]
struct MemAnnotation {
    task_id: DbId,
    project_id: DbId,
    result: serde_json::Value,
    was_cancelled: bool,
}

#[derive(Debug, Clone)]
struct MemPrediction {
    task_id: DbId,
    project_id: DbId,
    result: serde_json::Value,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: DbId,
    projects: BTreeMap<DbId, LabelingPolicy>,
    tasks: BTreeMap<DbId, MemTask>,
    annotations: BTreeMap<DbId, MemAnnotation>,
    predictions: BTreeMap<DbId, MemPrediction>,
}

impl Tables {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn counts(&self, task_id: DbId) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for a in self.annotations.values().filter(|a| a.task_id == task_id) {
            if a.was_cancelled {
                counts.cancelled_annotations += 1;
            } else {
                counts.total_annotations += 1;
            }
        }
        counts.total_predictions =
            self.predictions.values().filter(|p| p.task_id == task_id).count() as i32;
        counts
    }

    fn project_task_ids(&self, project_id: DbId) -> Vec<DbId> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.project_id == project_id)
            .map(|(&id, _)| id)
            .collect()
    }

    fn remove_tasks(&mut self, project_id: DbId, task_ids: &[DbId]) -> u64 {
        let doomed: Vec<DbId> = task_ids
            .iter()
            .copied()
            .filter(|id| self.tasks.get(id).is_some_and(|t| t.project_id == project_id))
            .collect();
        for id in &doomed {
            self.tasks.remove(id);
        }
        self.annotations.retain(|_, a| !doomed.contains(&a.task_id));
        self.predictions.retain(|_, p| !doomed.contains(&p.task_id));
        doomed.len() as u64
    }
}

/// Test double for [`RecomputeStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    ops: AtomicUsize,
    write_statements: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one round trip, failing if the store was marked unavailable.
    fn op(&self) -> Result<(), CoreError> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::StorageUnavailable("connection refused".to_string()));
        }
        Ok(())
    }

    // -- fixtures -------------------------------------------------------------

    pub fn add_project(&self, policy: LabelingPolicy) -> DbId {
        let mut t = self.tables();
        let id = t.next_id();
        t.projects.insert(id, policy);
        id
    }

    pub fn add_task(&self, project_id: DbId, data: serde_json::Value) -> DbId {
        self.add_task_with_overlap(project_id, data, 1)
    }

    pub fn add_task_with_overlap(
        &self,
        project_id: DbId,
        data: serde_json::Value,
        overlap: i32,
    ) -> DbId {
        let mut t = self.tables();
        let id = t.next_id();
        t.tasks.insert(
            id,
            MemTask {
                project_id,
                data,
                state: TaskLabelState {
                    task_id: id,
                    overlap,
                    counts: TaskCounts::default(),
                    is_labeled: false,
                },
            },
        );
        id
    }

    pub fn add_annotation(&self, task_id: DbId, was_cancelled: bool) -> DbId {
        let mut t = self.tables();
        let project_id = t.tasks[&task_id].project_id;
        let id = t.next_id();
        t.annotations.insert(
            id,
            MemAnnotation {
                task_id,
                project_id,
                result: serde_json::json!([]),
                was_cancelled,
            },
        );
        id
    }

    pub fn set_cancelled(&self, annotation_id: DbId, was_cancelled: bool) {
        if let Some(a) = self.tables().annotations.get_mut(&annotation_id) {
            a.was_cancelled = was_cancelled;
        }
    }

    pub fn add_prediction(&self, task_id: DbId, result: serde_json::Value) -> DbId {
        let mut t = self.tables();
        let project_id = t.tasks[&task_id].project_id;
        let id = t.next_id();
        t.predictions.insert(
            id,
            MemPrediction {
                task_id,
                project_id,
                result,
            },
        );
        id
    }

    /// Overwrite a task's stored state, e.g. to simulate stale counters.
    pub fn put_state(&self, state: TaskLabelState) {
        if let Some(task) = self.tables().tasks.get_mut(&state.task_id) {
            task.state = state;
        }
    }

    pub fn set_policy(&self, project_id: DbId, policy: LabelingPolicy) {
        self.tables().projects.insert(project_id, policy);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    // -- inspection -----------------------------------------------------------

    pub fn state(&self, task_id: DbId) -> Option<TaskLabelState> {
        self.tables().tasks.get(&task_id).map(|t| t.state)
    }

    pub fn task_ids(&self, project_id: DbId) -> Vec<DbId> {
        self.tables().project_task_ids(project_id)
    }

    pub fn annotation_task(&self, annotation_id: DbId) -> Option<DbId> {
        self.tables().annotations.get(&annotation_id).map(|a| a.task_id)
    }

    pub fn annotation_results(&self, task_id: DbId) -> Vec<serde_json::Value> {
        self.tables()
            .annotations
            .values()
            .filter(|a| a.task_id == task_id)
            .map(|a| a.result.clone())
            .collect()
    }

    /// Store operations performed so far.
    pub fn ops(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    /// Bulk `UPDATE` statements issued so far.
    pub fn write_statements(&self) -> usize {
        self.write_statements.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecomputeStore for MemoryStore {
    async fn project_ids(&self) -> Result<Vec<DbId>, CoreError> {
        self.op()?;
        Ok(self.tables().projects.keys().copied().collect())
    }

    async fn labeling_policy(&self, project_id: DbId) -> Result<LabelingPolicy, CoreError> {
        self.op()?;
        self.tables()
            .projects
            .get(&project_id)
            .copied()
            .ok_or(CoreError::NotFound {
                entity: "project",
                id: project_id,
            })
    }

    async fn resolve_scope(
        &self,
        project_id: DbId,
        scope: &TaskScope,
    ) -> Result<Vec<DbId>, CoreError> {
        self.op()?;
        let t = self.tables();
        let mut ids = t.project_task_ids(project_id);
        if let TaskScope::Tasks(wanted) = scope {
            ids.retain(|id| wanted.contains(id));
        }
        Ok(ids)
    }

    async fn find_stale(&self, task_ids: &[DbId]) -> Result<Vec<DbId>, CoreError> {
        self.op()?;
        let t = self.tables();
        Ok(task_ids
            .iter()
            .copied()
            .filter(|id| {
                let Some(task) = t.tasks.get(id) else {
                    return false;
                };
                let counts = t.counts(*id);
                let labeled = t.projects.get(&task.project_id).is_some_and(|policy| {
                    labeling::is_labeled(counts.total_annotations, policy, task.state.in_cohort())
                });
                task.state.counts != counts || task.state.is_labeled != labeled
            })
            .collect())
    }

    async fn aggregate_counts(
        &self,
        task_ids: &[DbId],
    ) -> Result<Vec<(DbId, TaskCounts)>, CoreError> {
        self.op()?;
        let t = self.tables();
        Ok(task_ids
            .iter()
            .filter(|id| t.tasks.contains_key(id))
            .map(|&id| (id, t.counts(id)))
            .collect())
    }

    async fn load_states(&self, task_ids: &[DbId]) -> Result<Vec<TaskLabelState>, CoreError> {
        self.op()?;
        let t = self.tables();
        Ok(task_ids
            .iter()
            .filter_map(|id| t.tasks.get(id).map(|task| task.state))
            .collect())
    }

    async fn write_states(
        &self,
        states: &[TaskLabelState],
        batch_size: usize,
    ) -> Result<u64, CoreError> {
        let statements =
            build_statements(states, TASK_STATE_FIELDS, batch_size).map_err(|e| match e {
                BulkUpdateError::UnknownField { table, field } => {
                    CoreError::Schema { table, field }
                }
                other => CoreError::Validation(other.to_string()),
            })?;
        for _ in &statements {
            self.op()?;
            self.write_statements.fetch_add(1, Ordering::SeqCst);
        }

        let mut t = self.tables();
        let mut updated = 0;
        for state in states {
            if let Some(task) = t.tasks.get_mut(&state.task_id) {
                task.state.counts = state.counts;
                task.state.is_labeled = state.is_labeled;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn cohort_partition(&self, project_id: DbId) -> Result<CohortPartition, CoreError> {
        self.op()?;
        let t = self.tables();
        let mut partition = CohortPartition::default();
        for (&id, task) in t.tasks.iter().filter(|(_, task)| task.project_id == project_id) {
            if task.state.in_cohort() {
                partition.cohort.push(id);
            } else {
                partition.others.push(id);
            }
        }
        Ok(partition)
    }

    async fn set_overlap(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        overlap: i32,
    ) -> Result<u64, CoreError> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        self.op()?;
        let mut t = self.tables();
        let mut changed = 0;
        for id in task_ids {
            if let Some(task) = t.tasks.get_mut(id) {
                if task.project_id == project_id && task.state.overlap != overlap {
                    task.state.overlap = overlap;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn delete_tasks(&self, project_id: DbId, task_ids: &[DbId]) -> Result<u64, CoreError> {
        self.op()?;
        Ok(self.tables().remove_tasks(project_id, task_ids))
    }

    async fn delete_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, CoreError> {
        self.op()?;
        let mut t = self.tables();
        let before = t.annotations.len();
        t.annotations
            .retain(|_, a| !(a.project_id == project_id && task_ids.contains(&a.task_id)));
        Ok((before - t.annotations.len()) as u64)
    }

    async fn delete_predictions(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, CoreError> {
        self.op()?;
        let mut t = self.tables();
        let before = t.predictions.len();
        t.predictions
            .retain(|_, p| !(p.project_id == project_id && task_ids.contains(&p.task_id)));
        Ok((before - t.predictions.len()) as u64)
    }

    async fn predictions_to_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        _completed_by: Option<DbId>,
    ) -> Result<u64, CoreError> {
        self.op()?;
        let mut t = self.tables();
        // Newest prediction per task: highest id wins.
        let mut newest: BTreeMap<DbId, serde_json::Value> = BTreeMap::new();
        for p in t.predictions.values() {
            if p.project_id == project_id && task_ids.contains(&p.task_id) {
                newest.insert(p.task_id, p.result.clone());
            }
        }
        let created = newest.len() as u64;
        for (task_id, result) in newest {
            let id = t.next_id();
            t.annotations.insert(
                id,
                MemAnnotation {
                    task_id,
                    project_id,
                    result,
                    was_cancelled: false,
                },
            );
        }
        Ok(created)
    }

    async fn duplicate_groups(&self, project_id: DbId) -> Result<Vec<Vec<DbId>>, CoreError> {
        self.op()?;
        let t = self.tables();
        let mut by_data: HashMap<String, Vec<DbId>> = HashMap::new();
        for (&id, task) in t.tasks.iter().filter(|(_, task)| task.project_id == project_id) {
            by_data.entry(task.data.to_string()).or_default().push(id);
        }
        let mut groups: Vec<Vec<DbId>> = by_data.into_values().filter(|g| g.len() > 1).collect();
        groups.sort_by_key(|g| g[0]);
        Ok(groups)
    }

    async fn merge_tasks(
        &self,
        project_id: DbId,
        keep: DbId,
        merged: &[DbId],
    ) -> Result<u64, CoreError> {
        self.op()?;
        let mut t = self.tables();
        for a in t.annotations.values_mut() {
            if a.project_id == project_id && merged.contains(&a.task_id) {
                a.task_id = keep;
            }
        }
        for p in t.predictions.values_mut() {
            if p.project_id == project_id && merged.contains(&p.task_id) {
                p.task_id = keep;
            }
        }
        Ok(t.remove_tasks(project_id, merged))
    }
}
