//! Progression Tracker - records learner activity and derives completion
//!
//! Measured items (video) derive `completed` from the watched percentage
//! and never accept a direct completion flag. Quiz and SCORM items report
//! completion directly, and only once the learner has access to them.
//! Every write is a monotonic upsert; a false->true transition re-evaluates
//! unlocks and fires a certification check for the course.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::certification_service::CertificationService;
use super::events::{EventBus, LearningEvent};
use super::unlock_service::UnlockService;
use crate::db::models::{ContentItem, ProgressRecord};
use crate::db::{courses, progress, ProgressDb};
use crate::error::LearningError;

/// Result of a progress write
#[derive(Debug, Clone, Serialize)]
pub struct ProgressOutcome {
    pub record: ProgressRecord,
    /// This write flipped the item to completed
    pub newly_completed: bool,
    /// Items that became accessible through this write
    pub unlocked: Vec<String>,
}

/// Completion summary for one learner in one course
#[derive(Debug, Clone, Serialize)]
pub struct CourseProgress {
    pub course_id: String,
    pub total: usize,
    pub completed: usize,
    pub percent: f64,
}

pub struct ProgressService {
    db: Arc<ProgressDb>,
    unlock: Arc<UnlockService>,
    certification: Arc<CertificationService>,
    events: Arc<EventBus>,
}

impl ProgressService {
    pub fn new(
        db: Arc<ProgressDb>,
        unlock: Arc<UnlockService>,
        certification: Arc<CertificationService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            unlock,
            certification,
            events,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_progress(
        &self,
        user_id: &str,
        content_item_id: &str,
    ) -> Result<Option<ProgressRecord>, LearningError> {
        self.db
            .with_conn(|conn| progress::get_progress(conn, user_id, content_item_id))
    }

    pub fn course_progress(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<CourseProgress, LearningError> {
        self.db.with_conn(|conn| {
            courses::get_course(conn, course_id)?
                .ok_or_else(|| LearningError::NotFound(format!("course {}", course_id)))?;
            let ids: Vec<String> = courses::list_items_for_course(conn, course_id)?
                .into_iter()
                .map(|i| i.id)
                .collect();
            let completed = progress::completed_count(conn, user_id, &ids)? as usize;
            let percent = if ids.is_empty() {
                0.0
            } else {
                completed as f64 / ids.len() as f64 * 100.0
            };

            Ok(CourseProgress {
                course_id: course_id.to_string(),
                total: ids.len(),
                completed,
                percent,
            })
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Record a raw measure (seconds watched, or percent for items without a
    /// duration). Non-finite and negative measures are stored as 0.
    pub fn record_progress(
        &self,
        user_id: &str,
        content_item_id: &str,
        measure: f64,
    ) -> Result<ProgressOutcome, LearningError> {
        let measure = sanitize_measure(measure);
        self.write(user_id, content_item_id, WriteKind::Measured, |item, _| {
            (measure, measured_completion(item, measure))
        })
    }

    /// Mark a quiz or SCORM item completed directly, keeping the stored
    /// measure. Videos are refused; locked items fail with `Locked`.
    pub fn record_completion(
        &self,
        user_id: &str,
        content_item_id: &str,
    ) -> Result<ProgressOutcome, LearningError> {
        self.write(user_id, content_item_id, WriteKind::Reported, |_, previous| {
            (previous.map(|p| p.elapsed_measure).unwrap_or(0.0), true)
        })
    }

    /// Measure plus a directly reported completion flag (SCORM commits).
    /// Same restrictions as `record_completion`.
    pub fn record_signal(
        &self,
        user_id: &str,
        content_item_id: &str,
        measure: f64,
        completed: bool,
    ) -> Result<ProgressOutcome, LearningError> {
        let measure = sanitize_measure(measure);
        self.write(user_id, content_item_id, WriteKind::Reported, |item, _| {
            (measure, completed || measured_completion(item, measure))
        })
    }

    fn write<F>(
        &self,
        user_id: &str,
        content_item_id: &str,
        kind: WriteKind,
        derive: F,
    ) -> Result<ProgressOutcome, LearningError>
    where
        F: FnOnce(&ContentItem, Option<&ProgressRecord>) -> (f64, bool),
    {
        if user_id.is_empty() {
            return Err(LearningError::InvalidInput("user_id is required".into()));
        }
        if kind == WriteKind::Reported {
            self.unlock.require_access(user_id, content_item_id)?;
        }

        // The read and the upsert share one IMMEDIATE transaction so exactly one
        // concurrent writer observes the false->true transition
        let (item, write) = self.db.with_write_tx(|conn| {
            let item = courses::require_item(conn, content_item_id)?;
            if kind == WriteKind::Reported && item.is_video() {
                return Err(LearningError::InvalidInput(format!(
                    "video {} completes from its watched measure only",
                    content_item_id
                )));
            }
            let previous = progress::get_progress(conn, user_id, content_item_id)?;
            let (measure, completed) = derive(&item, previous.as_ref());
            let write = progress::upsert_progress(conn, user_id, content_item_id, measure, completed)?;
            Ok((item, write))
        })?;

        debug!(
            user_id = %user_id,
            content_item_id = %content_item_id,
            measure = write.record.elapsed_measure,
            completed = write.record.completed,
            "Progress recorded"
        );
        self.events.emit(LearningEvent::ProgressRecorded {
            user_id: user_id.to_string(),
            content_item_id: content_item_id.to_string(),
            completed: write.record.completed,
        });

        let newly_completed = write.newly_completed();
        let unlocked = if newly_completed {
            self.on_completed(user_id, &item)
        } else {
            vec![]
        };

        Ok(ProgressOutcome {
            record: write.record,
            newly_completed,
            unlocked,
        })
    }

    /// Follow-up work for a completion transition. Neither step can fail the
    /// progress write that triggered it.
    fn on_completed(&self, user_id: &str, item: &ContentItem) -> Vec<String> {
        info!(user_id = %user_id, content_item_id = %item.id, course_id = %item.course_id, "Item completed");
        self.events.emit(LearningEvent::ItemCompleted {
            user_id: user_id.to_string(),
            content_item_id: item.id.clone(),
            course_id: item.course_id.clone(),
        });

        let unlocked = self.unlock.unlocked_by(user_id, item).unwrap_or_else(|e| {
            warn!(user_id = %user_id, content_item_id = %item.id, error = %e, "Unlock re-evaluation failed");
            vec![]
        });
        if !unlocked.is_empty() {
            self.events.emit(LearningEvent::ItemsUnlocked {
                user_id: user_id.to_string(),
                item_ids: unlocked.clone(),
            });
        }

        self.spawn_certification_check(user_id, &item.course_id);
        unlocked
    }

    /// Check on the blocking pool when a runtime is available, inline otherwise
    fn spawn_certification_check(&self, user_id: &str, course_id: &str) {
        let certification = self.certification.clone();
        let user_id = user_id.to_string();
        let course_id = course_id.to_string();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || certification.certify_if_complete(&user_id, &course_id));
            }
            Err(_) => certification.certify_if_complete(&user_id, &course_id),
        }
    }
}

/// Whether a write carries a raw measure or a learner-reported completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Measured,
    Reported,
}

fn sanitize_measure(measure: f64) -> f64 {
    if measure.is_finite() && measure > 0.0 {
        measure
    } else {
        0.0
    }
}

/// Completion derived from a measure; only videos are measured
fn measured_completion(item: &ContentItem, measure: f64) -> bool {
    item.is_video() && item.percent_watched(measure) >= item.required_percent()
}
