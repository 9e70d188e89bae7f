//! Recompute requests, planning and job state machine.
//!
//! A recompute request names a project, a task scope and which project
//! settings changed. The orchestrator in the worker crate turns it into
//! store calls; the decisions it makes are pure and live here.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle of a recompute job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeStatus {
    Requested,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl RecomputeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and Failed are terminal; a failed job is never retried.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses reachable from `self` in one step.
    pub fn valid_transitions(self) -> &'static [RecomputeStatus] {
        match self {
            Self::Requested => &[Self::Scheduled],
            Self::Scheduled => &[Self::Running],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition(self, to: RecomputeStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a move to `to`, returning the new status.
    pub fn transition(self, to: RecomputeStatus) -> Result<RecomputeStatus, CoreError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Which project settings changed since the last recompute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsChanges {
    pub maximum_annotations_changed: bool,
    pub overlap_cohort_percentage_changed: bool,
    pub tasks_number_changed: bool,
}

impl SettingsChanges {
    pub fn any(&self) -> bool {
        self.maximum_annotations_changed
            || self.overlap_cohort_percentage_changed
            || self.tasks_number_changed
    }
}

/// The set of tasks a recompute covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "task_ids")]
pub enum TaskScope {
    /// Every task of the project.
    Project,
    /// An explicit id set. Ids outside the project are ignored.
    Tasks(Vec<DbId>),
}

impl TaskScope {
    /// `true` for an explicit empty id set, which needs no store access.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Tasks(ids) if ids.is_empty())
    }

    /// Size of an explicit id set; `None` for the whole project.
    pub fn task_count(&self) -> Option<usize> {
        match self {
            Self::Project => None,
            Self::Tasks(ids) => Some(ids.len()),
        }
    }
}

/// How much work a recompute does after resolving its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeMode {
    /// Re-derive every task in scope.
    Full,
    /// Re-derive only tasks whose stored counters disagree with the data.
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomputeRequest {
    pub project_id: DbId,
    pub scope: TaskScope,
    pub changes: SettingsChanges,
    pub from_scratch: bool,
}

impl RecomputeRequest {
    /// Incremental recompute of the given tasks.
    pub fn for_tasks(project_id: DbId, task_ids: Vec<DbId>) -> Self {
        Self {
            project_id,
            scope: TaskScope::Tasks(task_ids),
            changes: SettingsChanges::default(),
            from_scratch: false,
        }
    }

    /// Incremental recompute of the whole project.
    pub fn for_project(project_id: DbId) -> Self {
        Self {
            project_id,
            scope: TaskScope::Project,
            changes: SettingsChanges::default(),
            from_scratch: false,
        }
    }

    /// Record changed settings.
    ///
    /// Settings changes move tasks in or out of the overlap cohort anywhere
    /// in the project, so the scope widens to the whole project.
    pub fn with_changes(mut self, changes: SettingsChanges) -> Self {
        if changes.any() {
            self.scope = TaskScope::Project;
        }
        self.changes = changes;
        self
    }

    pub fn from_scratch(mut self) -> Self {
        self.from_scratch = true;
        self
    }

    pub fn mode(&self) -> RecomputeMode {
        if self.from_scratch || self.changes.any() {
            RecomputeMode::Full
        } else {
            RecomputeMode::Incremental
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome counts of a finished recompute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomputeReport {
    /// Tasks in the resolved scope.
    pub resolved: usize,
    /// Tasks whose counters were re-derived.
    pub examined: usize,
    /// Tasks whose stored state actually changed.
    pub updated: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
