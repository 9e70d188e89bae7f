//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`LabelingEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use annotally_core::types::{DbId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// LabelingEvent
// ---------------------------------------------------------------------------

/// What changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    AnnotationCreated { task_id: DbId },
    AnnotationUpdated { task_id: DbId },
    AnnotationDeleted { task_id: DbId },
    PredictionCreated { task_id: DbId },
    PredictionDeleted { task_id: DbId },
    /// An empty `task_ids` means "some tasks, ids unknown".
    TasksImported {
        #[serde(default)]
        task_ids: Vec<DbId>,
    },
    TasksDeleted { count: u64 },
    ProjectSettingsChanged {
        maximum_annotations_changed: bool,
        overlap_cohort_percentage_changed: bool,
        use_overlap_changed: bool,
    },
}

impl EventKind {
    /// Dot-separated event name, e.g. `"annotation.created"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnnotationCreated { .. } => "annotation.created",
            Self::AnnotationUpdated { .. } => "annotation.updated",
            Self::AnnotationDeleted { .. } => "annotation.deleted",
            Self::PredictionCreated { .. } => "prediction.created",
            Self::PredictionDeleted { .. } => "prediction.deleted",
            Self::TasksImported { .. } => "tasks.imported",
            Self::TasksDeleted { .. } => "tasks.deleted",
            Self::ProjectSettingsChanged { .. } => "project.settings_changed",
        }
    }
}

/// A mutation that affects task counters in one project.
///
/// Constructed via [`LabelingEvent::new`] and optionally enriched with
/// [`with_actor`](LabelingEvent::with_actor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingEvent {
    pub project_id: DbId,

    #[serde(flatten)]
    pub kind: EventKind,

    /// Optional id of the user that triggered the event.
    #[serde(default)]
    pub actor_user_id: Option<DbId>,

    /// When the event was created (UTC). Defaults to the time of decoding.
    #[serde(default = "Utc::now")]
    pub timestamp: Timestamp,
}

impl LabelingEvent {
    pub fn new(project_id: DbId, kind: EventKind) -> Self {
        Self {
            project_id,
            kind,
            actor_user_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the acting user to the event.
    pub fn with_actor(mut self, user_id: DbId) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`LabelingEvent`].
///
/// # Usage
///
/// ```rust
/// use annotally_events::bus::{EventBus, EventKind, LabelingEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(LabelingEvent::new(1, EventKind::AnnotationCreated { task_id: 7 }));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<LabelingEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that will see it. With no
    /// subscribers the event is dropped and a debug line is logged.
    pub fn publish(&self, event: LabelingEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(
                    project_id = event.project_id,
                    event_type = event.kind.name(),
                    "No subscribers for labeling event"
                );
                0
            }
        }
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<LabelingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
