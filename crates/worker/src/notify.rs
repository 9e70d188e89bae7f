//! PostgreSQL notification relay.
//!
//! Triggers on `annotations`, `predictions`, `tasks` and `projects` publish a
//! JSON [`LabelingEvent`] on [`CHANNEL`] for every counter-affecting
//! mutation. [`run`] listens on that channel and republishes each payload on
//! the in-process [`EventBus`], reconnecting with exponential backoff when
//! the connection drops.

use std::sync::Arc;
use std::time::Duration;

use annotally_events::{EventBus, LabelingEvent};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Channel the notify triggers publish on.
pub const CHANNEL: &str = "labeling_events";

/// Tunable parameters for the reconnect backoff.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Next delay after `current`, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// Decode one notification payload.
pub fn parse_event(payload: &str) -> Result<LabelingEvent, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Publish a payload on `bus`. Malformed payloads are logged and skipped.
///
/// Returns whether an event was published.
pub fn relay(bus: &EventBus, payload: &str) -> bool {
    match parse_event(payload) {
        Ok(event) => {
            tracing::debug!(
                project_id = event.project_id,
                event_type = event.kind.name(),
                "Relaying labeling notification"
            );
            bus.publish(event);
            true
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                payload,
                "Ignoring malformed labeling notification"
            );
            false
        }
    }
}

/// Open a dedicated connection listening on [`CHANNEL`].
pub async fn listen(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANNEL).await?;
    Ok(listener)
}

/// Relay notifications from `listener` until `cancel` fires or the
/// connection fails.
pub async fn forward(
    listener: &mut PgListener,
    bus: &EventBus,
    cancel: &CancellationToken,
) -> Result<(), sqlx::Error> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = listener.recv() => {
                let notification = received?;
                relay(bus, notification.payload());
            }
        }
    }
}

/// Run the relay until `cancel` is triggered.
pub async fn run(pool: PgPool, bus: Arc<EventBus>, cancel: CancellationToken) {
    let backoff = Backoff::default();

    loop {
        let Some(mut listener) = connect(&pool, &backoff, &cancel).await else {
            break;
        };
        tracing::info!(channel = CHANNEL, "Notification relay listening");

        match forward(&mut listener, &bus, &cancel).await {
            Ok(()) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Notification relay lost its connection");
            }
        }
    }

    tracing::info!("Notification relay stopped");
}

/// Retry [`listen`] with backoff. Returns `None` once `cancel` fires.
async fn connect(
    pool: &PgPool,
    backoff: &Backoff,
    cancel: &CancellationToken,
) -> Option<PgListener> {
    let mut delay = backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = listen(pool) => match result {
                Ok(listener) => return Some(listener),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Notification relay failed to connect"
                    );
                }
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = backoff.next_delay(delay);
    }
}
