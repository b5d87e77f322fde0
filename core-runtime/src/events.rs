//! # Event Bus System
//!
//! Provides an event-driven architecture for the notification platform core
//! using `tokio::sync::broadcast`. This module enables decoupled communication
//! between core modules through typed events.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for different domains
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//! - **Subscription Management**: Multiple subscribers can listen independently
//!
//! ## Usage
//!
//! ### Creating an Event Bus
//!
//! ```rust
//! use core_runtime::events::EventBus;
//!
//! let event_bus = EventBus::new(100); // Buffer size of 100 events
//! ```
//!
//! ### Publishing Events
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, CacheEvent};
//!
//! # let event_bus = EventBus::new(100);
//! let event = CoreEvent::Cache(CacheEvent::DownloadCompleted {
//!     url: "https://cdn.example.com/a.png".to_string(),
//!     media_type: "image".to_string(),
//!     size_bytes: 1024,
//! });
//!
//! event_bus.emit(event).ok();
//! ```
//!
//! ### Subscribing to Events
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent};
//! use tokio::sync::broadcast::error::RecvError;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! tokio::spawn(async move {
//!     loop {
//!         match stream.recv().await {
//!             Ok(event) => println!("Received: {:?}", event),
//!             Err(RecvError::Lagged(n)) => {
//!                 eprintln!("Missed {} events", n);
//!             }
//!             Err(RecvError::Closed) => break,
//!         }
//!     }
//! });
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The event bus uses `tokio::sync::broadcast`, which can produce two types of
//! errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates
//!   shutdown.
//!
//! Subscribers should handle `Lagged` gracefully and treat `Closed` as a
//! signal to exit.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// This value balances memory usage with the ability to handle bursts of
/// events. Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
///
/// This is the main event type published and received through the event bus.
/// It wraps domain-specific event types for different modules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Media cache events
    Cache(CacheEvent),
    /// Sync and reconciliation events
    Sync(SyncEvent),
    /// Database recovery events
    Recovery(RecoveryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Recovery(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Cache(CacheEvent::DownloadFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::ReconcileFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::IncrementalSyncFailed { .. }) => EventSeverity::Error,
            CoreEvent::Recovery(RecoveryEvent::CorruptionDetected { .. }) => EventSeverity::Error,
            CoreEvent::Recovery(RecoveryEvent::RecoveryFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ReconcileCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Recovery(RecoveryEvent::RecoveryCompleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events related to the media attachment cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A media download started.
    DownloadStarted {
        /// Source URL of the asset.
        url: String,
        /// Media type label ("image", "video", ...).
        media_type: String,
    },
    /// A media download completed and the file is on disk.
    DownloadCompleted {
        /// Source URL of the asset.
        url: String,
        /// Media type label.
        media_type: String,
        /// Size of the cached file in bytes.
        size_bytes: u64,
    },
    /// A media download failed after exhausting retries.
    DownloadFailed {
        /// Source URL of the asset.
        url: String,
        /// Media type label.
        media_type: String,
        /// Human-readable failure message.
        message: String,
        /// Whether the failure is permanent (remote asset gone).
        permanent: bool,
    },
    /// A cached item was soft-deleted by the user.
    ItemDeleted {
        /// Source URL of the asset.
        url: String,
        /// Media type label.
        media_type: String,
    },
    /// The entire cache was cleared.
    Cleared {
        /// Number of items removed.
        items_removed: u64,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::DownloadStarted { .. } => "Media download started",
            CacheEvent::DownloadCompleted { .. } => "Media download completed",
            CacheEvent::DownloadFailed { .. } => "Media download failed",
            CacheEvent::ItemDeleted { .. } => "Cached item deleted",
            CacheEvent::Cleared { .. } => "Cache cleared",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Scope of a read-model invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationScope {
    /// Notification read-models need refreshing.
    Notifications,
    /// Bucket read-models need refreshing.
    Buckets,
    /// Everything needs refreshing.
    All,
}

/// Events related to bucket reconciliation and incremental sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Full bucket/notification reconciliation started.
    ReconcileStarted,
    /// Reconciliation finished and the read-model was republished.
    ReconcileCompleted {
        /// Buckets in the published read-model.
        buckets: u64,
        /// Notifications newly inserted during the merge.
        notifications_inserted: u64,
        /// Buckets synthesized from local notifications only.
        orphan_buckets: u64,
        /// Total wall time of the run in milliseconds.
        duration_ms: u64,
    },
    /// Reconciliation failed entirely (both fetches unusable).
    ReconcileFailed {
        /// Human-readable failure message.
        message: String,
    },
    /// An incremental platform sync started.
    IncrementalSyncStarted {
        /// The record-change reason that triggered it.
        reason: String,
    },
    /// An incremental platform sync completed.
    IncrementalSyncCompleted {
        /// Records updated by the sync.
        updated_count: u64,
    },
    /// An incremental platform sync failed.
    IncrementalSyncFailed {
        /// Human-readable failure message.
        message: String,
    },
    /// Read-models derived from the durable store must be re-queried.
    ReadModelInvalidated {
        /// Which projections are stale.
        scope: InvalidationScope,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::ReconcileStarted => "Reconciliation started",
            SyncEvent::ReconcileCompleted { .. } => "Reconciliation completed",
            SyncEvent::ReconcileFailed { .. } => "Reconciliation failed",
            SyncEvent::IncrementalSyncStarted { .. } => "Incremental sync started",
            SyncEvent::IncrementalSyncCompleted { .. } => "Incremental sync completed",
            SyncEvent::IncrementalSyncFailed { .. } => "Incremental sync failed",
            SyncEvent::ReadModelInvalidated { .. } => "Read-model invalidated",
        }
    }
}

// ============================================================================
// Recovery Events
// ============================================================================

/// Events related to database corruption and recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RecoveryEvent {
    /// A storage operation surfaced a corruption-class error.
    CorruptionDetected {
        /// Component that hit the error ("cache", "notifications", ...).
        source: String,
        /// The underlying driver message.
        message: String,
    },
    /// A recovery attempt started.
    RecoveryStarted {
        /// Recovery strategy ("local", "backend", "icloud").
        strategy: String,
    },
    /// A recovery attempt finished successfully.
    RecoveryCompleted {
        /// Recovery strategy that succeeded.
        strategy: String,
    },
    /// A recovery attempt failed terminally.
    RecoveryFailed {
        /// Recovery strategy that failed.
        strategy: String,
        /// Human-readable failure message.
        message: String,
    },
}

impl RecoveryEvent {
    fn description(&self) -> &str {
        match self {
            RecoveryEvent::CorruptionDetected { .. } => "Database corruption detected",
            RecoveryEvent::RecoveryStarted { .. } => "Recovery started",
            RecoveryEvent::RecoveryCompleted { .. } => "Recovery completed",
            RecoveryEvent::RecoveryFailed { .. } => "Recovery failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future
    /// events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering
/// capabilities.
///
/// This provides a more ergonomic API for consuming events with optional
/// filtering by event type or severity.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
/// let stream = EventStream::new(event_bus.subscribe());
///
/// // Filter for recovery events only
/// let mut recovery_stream = stream.filter(|event| {
///     matches!(event, CoreEvent::Recovery(_))
/// });
/// # }
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// This will skip events that don't match the filter and return the next
    /// matching event.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events. Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }

            // Event didn't match filter, continue to next event
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }

                    // Event didn't match filter, continue
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
