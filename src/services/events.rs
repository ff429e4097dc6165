//! Event bus for learner progression
//!
//! Services emit an event for every state transition they commit. Listeners
//! are best-effort: a full channel drops the oldest events and no listener can
//! block or fail a write.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Events emitted by services after a write commits
#[derive(Debug, Clone)]
pub enum LearningEvent {
    CourseUpserted {
        course_id: String,
        item_count: usize,
    },

    // Progress events
    ProgressRecorded {
        user_id: String,
        content_item_id: String,
        completed: bool,
    },
    ItemCompleted {
        user_id: String,
        content_item_id: String,
        course_id: String,
    },
    ItemsUnlocked {
        user_id: String,
        item_ids: Vec<String>,
    },

    // Quiz events
    QuizSubmitted {
        user_id: String,
        quiz_item_id: String,
        score: i32,
        passed: bool,
    },

    // Certificate events
    CertificateIssued {
        user_id: String,
        course_id: String,
        certificate_id: String,
    },
    CertificateRevoked {
        user_id: String,
        course_id: String,
    },

    // Package events
    PackageStored {
        content_item_id: String,
        storage_locator: String,
        replaced: bool,
    },
    PackageCleanupFailed {
        storage_locator: String,
        error: String,
    },

    // SCORM runtime events
    ScormSessionOpened {
        session_id: String,
        user_id: String,
        content_item_id: String,
    },
    ScormSessionClosed {
        session_id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LearningEvent);
}

/// Broadcast channel of learning events
pub struct EventBus {
    sender: broadcast::Sender<LearningEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LearningEvent) {
        trace!(event = ?event, "Emitting learning event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LearningEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every event for the audit trail
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LearningEvent) {
        match event {
            LearningEvent::ItemCompleted {
                user_id,
                content_item_id,
                course_id,
            } => {
                debug!(user_id = %user_id, content_item_id = %content_item_id, course_id = %course_id, "Item completed");
            }
            LearningEvent::ItemsUnlocked { user_id, item_ids } => {
                debug!(user_id = %user_id, items = ?item_ids, "Items unlocked");
            }
            LearningEvent::CertificateIssued {
                user_id,
                course_id,
                certificate_id,
            } => {
                debug!(user_id = %user_id, course_id = %course_id, certificate_id = %certificate_id, "Certificate issued");
            }
            LearningEvent::PackageStored {
                content_item_id,
                storage_locator,
                replaced,
            } => {
                debug!(content_item_id = %content_item_id, locator = %storage_locator, replaced, "Package stored");
            }
            LearningEvent::PackageCleanupFailed {
                storage_locator,
                error,
            } => {
                debug!(locator = %storage_locator, error = %error, "Package cleanup failed");
            }
            _ => {
                trace!(event = ?event, "Learning event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
