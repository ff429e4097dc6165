//! Unlock Resolver - decides whether a learner may open a content item
//!
//! Two gates apply, in order:
//!
//! 1. Chain gating: the predecessor must be completed. The predecessor is the
//!    item whose `next_item_id` names this one; failing that, in a sequential
//!    course, the previous item of the same module. The first item of a module
//!    has no predecessor.
//! 2. Companion gating: a SCORM item whose metadata names a companion video
//!    needs that video completed and watched to the required percentage.
//!
//! Resolution is read-only; calling it on every page load is expected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use diesel::SqliteConnection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::models::{ContentItem, Course, ProgressRecord};
use crate::db::{courses, progress, ProgressDb};
use crate::error::LearningError;

/// Why access was granted or denied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AccessReason {
    /// First item, or an item with no gate
    NoPrerequisite,
    PrerequisiteCompleted {
        prerequisite_id: String,
    },
    /// Missing progress counts as incomplete
    PrerequisiteIncomplete {
        prerequisite_id: String,
    },
    CompanionVideoIncomplete {
        companion_id: String,
        current_percent: f64,
        required_percent: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
}

impl AccessReason {
    /// Short human-readable form for error messages
    pub fn describe(&self) -> String {
        match self {
            AccessReason::NoPrerequisite => "no prerequisite".to_string(),
            AccessReason::PrerequisiteCompleted { prerequisite_id } => {
                format!("prerequisite {} completed", prerequisite_id)
            }
            AccessReason::PrerequisiteIncomplete { prerequisite_id } => {
                format!("prerequisite {} is incomplete", prerequisite_id)
            }
            AccessReason::CompanionVideoIncomplete {
                companion_id,
                current_percent,
                required_percent,
            } => format!(
                "companion video {} watched {:.0}% of the required {:.0}%",
                companion_id, current_percent, required_percent
            ),
        }
    }
}

impl AccessDecision {
    fn allow(reason: AccessReason) -> Self {
        Self { allowed: true, reason }
    }

    fn deny(reason: AccessReason) -> Self {
        Self { allowed: false, reason }
    }
}

/// One row of a course outline
#[derive(Debug, Clone, Serialize)]
pub struct OutlineEntry {
    pub item_id: String,
    pub title: String,
    pub kind: String,
    pub module_id: String,
    pub position: i32,
    pub is_final_exam: bool,
    pub completed: bool,
    pub access: AccessDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseOutline {
    pub course_id: String,
    pub title: String,
    pub items: Vec<OutlineEntry>,
}

pub struct UnlockService {
    db: Arc<ProgressDb>,
    config: Arc<Config>,
}

impl UnlockService {
    pub fn new(db: Arc<ProgressDb>, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    /// Decide whether `user_id` may open `content_item_id`
    pub fn can_access(
        &self,
        user_id: &str,
        content_item_id: &str,
    ) -> Result<AccessDecision, LearningError> {
        self.db.with_conn(|conn| {
            let item = courses::require_item(conn, content_item_id)?;
            let course = courses::get_course(conn, &item.course_id)?;
            let decision = self.decide(conn, course.as_ref(), user_id, &item)?;
            debug!(
                user_id = %user_id,
                content_item_id = %content_item_id,
                allowed = decision.allowed,
                "Access resolved"
            );
            Ok(decision)
        })
    }

    /// Like `can_access`, but a denial becomes `LearningError::Locked`
    pub fn require_access(&self, user_id: &str, content_item_id: &str) -> Result<(), LearningError> {
        let decision = self.can_access(user_id, content_item_id)?;
        if decision.allowed {
            Ok(())
        } else {
            Err(LearningError::Locked(format!(
                "{}: {}",
                content_item_id,
                decision.reason.describe()
            )))
        }
    }

    /// Every item of a course with its completion flag and access decision
    pub fn course_outline(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<CourseOutline, LearningError> {
        self.db.with_conn(|conn| {
            let course = courses::get_course(conn, course_id)?
                .ok_or_else(|| LearningError::NotFound(format!("course {}", course_id)))?;
            let items = courses::list_items_for_course(conn, course_id)?;
            let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            let completed: HashSet<String> = progress::get_progress_for_items(conn, user_id, &ids)?
                .into_iter()
                .filter(|r| r.completed)
                .map(|r| r.content_item_id)
                .collect();

            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let access = self.decide(conn, Some(&course), user_id, &item)?;
                entries.push(OutlineEntry {
                    completed: completed.contains(&item.id),
                    item_id: item.id,
                    title: item.title,
                    kind: item.kind,
                    module_id: item.module_id,
                    position: item.position,
                    is_final_exam: item.is_final_exam,
                    access,
                });
            }

            Ok(CourseOutline {
                course_id: course.id,
                title: course.title,
                items: entries,
            })
        })
    }

    /// Items of the same course gated on `completed_item` that are now open.
    ///
    /// Called after a completion transition; items that stay locked behind a
    /// different gate are left out.
    pub fn unlocked_by(
        &self,
        user_id: &str,
        completed_item: &ContentItem,
    ) -> Result<Vec<String>, LearningError> {
        self.db.with_conn(|conn| {
            let course = courses::get_course(conn, &completed_item.course_id)?;
            let items = courses::list_items_for_course(conn, &completed_item.course_id)?;

            let mut unlocked = Vec::new();
            for item in items.iter().filter(|i| i.id != completed_item.id) {
                let gated_on_it = item.metadata().companion_video_id.as_deref()
                    == Some(completed_item.id.as_str())
                    || self
                        .predecessor(conn, course.as_ref(), item)?
                        .map(|p| p.id == completed_item.id)
                        .unwrap_or(false);

                if gated_on_it && self.decide(conn, course.as_ref(), user_id, item)?.allowed {
                    unlocked.push(item.id.clone());
                }
            }
            Ok(unlocked)
        })
    }

    fn predecessor(
        &self,
        conn: &mut SqliteConnection,
        course: Option<&Course>,
        item: &ContentItem,
    ) -> Result<Option<ContentItem>, LearningError> {
        if let Some(explicit) = courses::find_explicit_predecessor(conn, &item.id)? {
            return Ok(Some(explicit));
        }
        match course {
            Some(course) if course.sequential => courses::find_module_predecessor(conn, item),
            _ => Ok(None),
        }
    }

    fn decide(
        &self,
        conn: &mut SqliteConnection,
        course: Option<&Course>,
        user_id: &str,
        item: &ContentItem,
    ) -> Result<AccessDecision, LearningError> {
        let mut reason = AccessReason::NoPrerequisite;

        if let Some(prerequisite) = self.predecessor(conn, course, item)? {
            let done = progress::get_progress(conn, user_id, &prerequisite.id)?
                .map(|r| r.completed)
                .unwrap_or(false);
            if !done {
                return Ok(AccessDecision::deny(AccessReason::PrerequisiteIncomplete {
                    prerequisite_id: prerequisite.id,
                }));
            }
            reason = AccessReason::PrerequisiteCompleted {
                prerequisite_id: prerequisite.id,
            };
        }

        if item.is_scorm() {
            let metadata = item.metadata();
            if let Some(companion_id) = metadata.companion_video_id {
                let required = metadata
                    .companion_required_percent
                    .unwrap_or(self.config.companion_video_percent)
                    .clamp(0.0, 100.0);
                let companion = courses::get_item(conn, &companion_id)?;
                if companion.is_none() {
                    warn!(item = %item.id, companion = %companion_id, "Companion video does not exist");
                }
                let record = progress::get_progress(conn, user_id, &companion_id)?;
                let current = companion_percent(companion.as_ref(), record.as_ref());
                let done = record.map(|r| r.completed).unwrap_or(false);

                if !done || current < required {
                    return Ok(AccessDecision::deny(AccessReason::CompanionVideoIncomplete {
                        companion_id,
                        current_percent: current,
                        required_percent: required,
                    }));
                }
                if reason == AccessReason::NoPrerequisite {
                    reason = AccessReason::PrerequisiteCompleted {
                        prerequisite_id: companion_id,
                    };
                }
            }
        }

        Ok(AccessDecision::allow(reason))
    }
}

/// Watched percentage of a companion video; nothing watched without a record
fn companion_percent(companion: Option<&ContentItem>, record: Option<&ProgressRecord>) -> f64 {
    match (companion, record) {
        (Some(item), Some(record)) => item.percent_watched(record.elapsed_measure),
        _ => 0.0,
    }
}

/// Completion lookup keyed by item id, for callers holding a batch of records
pub fn completion_map(records: &[ProgressRecord]) -> HashMap<&str, bool> {
    records
        .iter()
        .map(|r| (r.content_item_id.as_str(), r.completed))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::courses::fixtures::{course, item};
    use crate::db::models::content_kinds;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Arc<ProgressDb>, UnlockService) {
        let config = Arc::new(Config::with_storage_dir(dir.path()));
        let db = Arc::new(ProgressDb::open(&config).unwrap());
        (db.clone(), UnlockService::new(db, config))
    }

    fn complete(db: &ProgressDb, user: &str, item: &str, measure: f64) {
        db.with_conn(|conn| progress::upsert_progress(conn, user, item, measure, true))
            .unwrap();
    }

    #[test]
    fn test_first_item_is_always_open() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let input = course("c1", vec![item("a", content_kinds::VIDEO, 0), item("b", content_kinds::VIDEO, 1)]);
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        let decision = unlock.can_access("u1", "a").unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reason, AccessReason::NoPrerequisite);
    }

    #[test]
    fn test_chain_gating_with_missing_record() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let input = course("c1", vec![item("a", content_kinds::VIDEO, 0), item("b", content_kinds::VIDEO, 1)]);
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        let denied = unlock.can_access("u1", "b").unwrap();
        assert!(!denied.allowed);
        assert_eq!(
            denied.reason,
            AccessReason::PrerequisiteIncomplete { prerequisite_id: "a".into() }
        );

        complete(&db, "u1", "a", 100.0);
        let allowed = unlock.can_access("u1", "b").unwrap();
        assert!(allowed.allowed);
        assert_eq!(
            allowed.reason,
            AccessReason::PrerequisiteCompleted { prerequisite_id: "a".into() }
        );
    }

    #[test]
    fn test_explicit_link_crosses_modules() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let mut a = item("a", content_kinds::VIDEO, 0);
        a.next_item_id = Some("z".into());
        let mut z = item("z", content_kinds::VIDEO, 0);
        z.module_id = "second".into();
        let mut input = course("c1", vec![a, z]);
        input.sequential = false;
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        assert!(!unlock.can_access("u1", "z").unwrap().allowed);
        complete(&db, "u1", "a", 100.0);
        assert!(unlock.can_access("u1", "z").unwrap().allowed);
    }

    #[test]
    fn test_non_sequential_course_has_no_implicit_chain() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let mut input = course("c1", vec![item("a", content_kinds::VIDEO, 0), item("b", content_kinds::VIDEO, 1)]);
        input.sequential = false;
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        assert!(unlock.can_access("u1", "b").unwrap().allowed);
    }

    #[test]
    fn test_companion_video_percentage_gate() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let mut video = item("v", content_kinds::VIDEO, 0);
        video.module_id = "videos".into();
        video.duration_seconds = Some(100.0);
        video.threshold_value = Some(50.0);
        let mut package = item("s", content_kinds::SCORM_PACKAGE, 0);
        package.metadata = Some(serde_json::json!({ "companion_video_id": "v" }));
        let input = course("c1", vec![video, package]);
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        // Completed at 60% but the companion gate wants the configured 80%
        complete(&db, "u1", "v", 60.0);
        let denied = unlock.can_access("u1", "s").unwrap();
        assert!(!denied.allowed);
        assert_eq!(
            denied.reason,
            AccessReason::CompanionVideoIncomplete {
                companion_id: "v".into(),
                current_percent: 60.0,
                required_percent: 80.0,
            }
        );

        complete(&db, "u1", "v", 85.0);
        assert!(unlock.can_access("u1", "s").unwrap().allowed);
    }

    #[test]
    fn test_unlocked_by_and_outline() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let input = course(
            "c1",
            vec![
                item("a", content_kinds::VIDEO, 0),
                item("b", content_kinds::VIDEO, 1),
                item("c", content_kinds::VIDEO, 2),
            ],
        );
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();
        complete(&db, "u1", "a", 100.0);

        let a = db.with_conn(|conn| courses::require_item(conn, "a")).unwrap();
        assert_eq!(unlock.unlocked_by("u1", &a).unwrap(), vec!["b".to_string()]);

        let outline = unlock.course_outline("u1", "c1").unwrap();
        let flags: Vec<(bool, bool)> = outline
            .items
            .iter()
            .map(|e| (e.completed, e.access.allowed))
            .collect();
        assert_eq!(flags, vec![(true, true), (false, true), (false, false)]);
    }

    #[test]
    fn test_unknown_item_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_db, unlock) = setup(&dir);
        assert!(matches!(
            unlock.can_access("u1", "missing"),
            Err(LearningError::NotFound(_))
        ));
    }

    #[test]
    fn test_require_access_reports_lock_reason() {
        let dir = TempDir::new().unwrap();
        let (db, unlock) = setup(&dir);
        let input = course("c1", vec![item("a", content_kinds::VIDEO, 0), item("b", content_kinds::QUIZ, 1)]);
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        match unlock.require_access("u1", "b") {
            Err(LearningError::Locked(msg)) => assert!(msg.contains("prerequisite a is incomplete")),
            other => panic!("expected Locked, got {:?}", other),
        }
        complete(&db, "u1", "a", 10.0);
        unlock.require_access("u1", "b").unwrap();
    }
}
