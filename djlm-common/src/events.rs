//! Event types for the analysis engine
//!
//! Provides the shared event definitions and the broadcast `EventBus` used by
//! the dispatcher, orchestrator, cue and duplicate engines. Consumers (UI,
//! logging) subscribe; producers never block on slow subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::AnalysisStatus;

/// Engine event types
///
/// Serialized with an external `type` tag so they can be forwarded verbatim
/// to a UI channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// One analyzer job was handed to the backend
    AnalysisStarted {
        job_id: Uuid,
        track_id: Uuid,
        analyzer: String,
        timestamp: DateTime<Utc>,
    },

    /// Analyzer reported progress (strictly increasing per job)
    AnalysisProgress {
        job_id: Uuid,
        track_id: Uuid,
        /// Percentage as printed by the analyzer
        progress: u32,
    },

    /// Analyzer job reached a terminal status
    AnalysisCompleted {
        job_id: Uuid,
        track_id: Uuid,
        analyzer: String,
        status: AnalysisStatus,
        /// Failure detail when `status` is failed
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Multi-track analysis batch started
    BatchStarted {
        batch_id: Uuid,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Multi-track analysis batch finished
    BatchCompleted {
        batch_id: Uuid,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Cue points derived and stored for a track
    CuesGenerated {
        track_id: Uuid,
        count: usize,
        /// Cues the track already had before this derivation
        previous_cue_count: usize,
        /// True when previous cues were replaced instead of appended to
        replaced: bool,
    },

    /// Duplicate scan started
    DuplicateScanStarted {
        track_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Duplicate scan finished
    DuplicateScanCompleted {
        group_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Duplicate scan could not run
    DuplicateScanFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Wire name used by UI consumers (`analysis:progress` etc.)
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::AnalysisStarted { .. } | EngineEvent::BatchStarted { .. } => {
                "analysis:started"
            }
            EngineEvent::AnalysisProgress { .. } => "analysis:progress",
            EngineEvent::AnalysisCompleted { .. } | EngineEvent::BatchCompleted { .. } => {
                "analysis:completed"
            }
            EngineEvent::CuesGenerated { .. } => "cues:generated",
            EngineEvent::DuplicateScanStarted { .. } => "duplicates:scan:started",
            EngineEvent::DuplicateScanCompleted { .. } => "duplicates:scan:completed",
            EngineEvent::DuplicateScanFailed { .. } => "duplicates:scan:failed",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses `tokio::sync::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use djlm_common::events::{EventBus, EngineEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(EngineEvent::DuplicateScanStarted {
///     track_count: 3,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(EngineEvent::DuplicateScanStarted { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
