//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Field order of every Queryable struct matches its `table!` column order.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Microsecond timestamp for rows ordered by recency (quiz attempts)
pub fn precise_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

// ============================================================================
// Course Structure Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = courses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Course {
    pub id: String,
    pub title: String,
    pub pass_threshold: Option<i32>,
    pub sequential: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = courses)]
#[diesel(treat_none_as_null = true)]
pub struct NewCourse<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub pass_threshold: Option<i32>,
    pub sequential: bool,
}

/// One unit of course content (video, quiz or SCORM package)
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = content_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ContentItem {
    pub id: String,
    pub course_id: String,
    pub module_id: String,
    pub position: i32,
    pub kind: String,
    pub title: String,
    pub threshold_kind: String,
    pub threshold_value: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub next_item_id: Option<String>,
    pub is_final_exam: bool,
    pub metadata_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentItem {
    pub fn is_video(&self) -> bool {
        self.kind == content_kinds::VIDEO
    }

    pub fn is_quiz(&self) -> bool {
        self.kind == content_kinds::QUIZ
    }

    pub fn is_scorm(&self) -> bool {
        self.kind == content_kinds::SCORM_PACKAGE
    }

    /// Authoring metadata; malformed JSON reads as empty metadata
    pub fn metadata(&self) -> ItemMetadata {
        self.metadata_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Convert a raw measure into a watched percentage in [0, 100].
    ///
    /// With a known duration the measure is seconds watched; without one it
    /// is already a percentage.
    pub fn percent_watched(&self, measure: f64) -> f64 {
        let measure = if measure.is_finite() { measure.max(0.0) } else { 0.0 };
        let percent = match self.duration_seconds {
            Some(duration) if duration > 0.0 => measure / duration * 100.0,
            _ => measure,
        };
        percent.clamp(0.0, 100.0)
    }

    /// Percentage a measured item needs to count as completed
    pub fn required_percent(&self) -> f64 {
        self.threshold_value.unwrap_or(100.0).clamp(0.0, 100.0)
    }
}

/// Authoring metadata carried in `content_items.metadata_json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Video that must be watched before this SCORM item opens
    #[serde(default)]
    pub companion_video_id: Option<String>,
    /// Watch percentage the companion needs; falls back to configuration
    #[serde(default)]
    pub companion_required_percent: Option<f64>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = content_items)]
#[diesel(treat_none_as_null = true)]
pub struct NewContentItem<'a> {
    pub id: &'a str,
    pub course_id: &'a str,
    pub module_id: &'a str,
    pub position: i32,
    pub kind: &'a str,
    pub title: &'a str,
    pub threshold_kind: &'a str,
    pub threshold_value: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub next_item_id: Option<&'a str>,
    pub is_final_exam: bool,
    pub metadata_json: Option<&'a str>,
}

/// Answer key entry for one quiz question
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = quiz_questions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QuizQuestion {
    pub id: String,
    pub quiz_item_id: String,
    pub position: i32,
    pub question_kind: String,
    pub prompt: String,
    pub correct_answers_json: String,
}

impl QuizQuestion {
    /// Correct option ids; a malformed key yields an empty set, which no answer matches
    pub fn correct_answers(&self) -> Vec<String> {
        serde_json::from_str(&self.correct_answers_json).unwrap_or_default()
    }
}

// ============================================================================
// Progress Models
// ============================================================================

/// Per-learner, per-item progress. `completed` never reverts once true.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = progress_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressRecord {
    pub id: String,
    pub user_id: String,
    pub content_item_id: String,
    pub elapsed_measure: f64,
    pub completed: bool,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = progress_records)]
pub struct NewProgressRecord<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub content_item_id: &'a str,
    pub elapsed_measure: f64,
    pub completed: bool,
    pub completed_at: Option<&'a str>,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = quiz_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QuizAttempt {
    pub id: String,
    pub user_id: String,
    pub quiz_item_id: String,
    pub score: i32,
    pub passed: bool,
    pub pass_threshold: i32,
    pub answers_json: String,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quiz_attempts)]
pub struct NewQuizAttempt<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub quiz_item_id: &'a str,
    pub score: i32,
    pub passed: bool,
    pub pass_threshold: i32,
    pub answers_json: &'a str,
    pub submitted_at: &'a str,
}

// ============================================================================
// Certificate Models
// ============================================================================

/// Issued credential; at most one per (user_id, course_id)
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = certificates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Certificate {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub verification_token: String,
    pub serial: String,
    pub issued_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = certificates)]
pub struct NewCertificate<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub course_id: &'a str,
    pub verification_token: &'a str,
    pub serial: &'a str,
    pub issued_at: &'a str,
}

// ============================================================================
// SCORM Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = scorm_packages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScormPackageRecord {
    pub id: String,
    pub content_item_id: String,
    /// Package directory relative to the packages root
    pub storage_locator: String,
    pub runtime_version: String,
    pub archive_hash: String,
    pub launch_href: String,
    pub title: Option<String>,
    pub file_count: i32,
    pub size_bytes: i64,
    pub uploaded_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = scorm_packages)]
#[diesel(treat_none_as_null = true)]
pub struct NewScormPackage<'a> {
    pub id: &'a str,
    pub content_item_id: &'a str,
    pub storage_locator: &'a str,
    pub runtime_version: &'a str,
    pub archive_hash: &'a str,
    pub launch_href: &'a str,
    pub title: Option<&'a str>,
    pub file_count: i32,
    pub size_bytes: i64,
    pub uploaded_at: &'a str,
    pub updated_at: &'a str,
}

/// Persisted runtime data a package reads back on its next launch
#[derive(Debug, Clone, Default, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = scorm_runtime_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RuntimeState {
    pub user_id: String,
    pub content_item_id: String,
    pub lesson_status: String,
    pub lesson_location: String,
    pub suspend_data: String,
    pub total_seconds: f64,
    pub session_count: i32,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = scorm_runtime_state)]
pub struct NewRuntimeState<'a> {
    pub user_id: &'a str,
    pub content_item_id: &'a str,
    pub lesson_status: &'a str,
    pub lesson_location: &'a str,
    pub suspend_data: &'a str,
    pub total_seconds: f64,
    pub session_count: i32,
    pub updated_at: &'a str,
}

// ============================================================================
// Vocabulary Constants
// ============================================================================

/// Content item kinds
pub mod content_kinds {
    pub const VIDEO: &str = "video";
    pub const QUIZ: &str = "quiz";
    pub const SCORM_PACKAGE: &str = "scorm_package";

    pub const ALL: [&str; 3] = [VIDEO, QUIZ, SCORM_PACKAGE];

    pub fn is_valid(kind: &str) -> bool {
        ALL.contains(&kind)
    }
}

/// How an item's completion is decided
pub mod threshold_kinds {
    /// Video: watched percentage >= threshold_value (default 100)
    pub const PERCENT_WATCHED: &str = "percent_watched";
    /// Quiz: any submission completes the item
    pub const ANY_ATTEMPT: &str = "any_attempt";
    /// Quiz: score >= threshold_value, else course, else configured default
    pub const PASSING_SCORE: &str = "passing_score";
    /// SCORM: package reports completed or passed
    pub const PACKAGE_STATUS: &str = "package_status";

    pub const ALL: [&str; 4] = [PERCENT_WATCHED, ANY_ATTEMPT, PASSING_SCORE, PACKAGE_STATUS];

    /// Whether a threshold kind can govern an item of the given kind
    pub fn applies_to(threshold_kind: &str, content_kind: &str) -> bool {
        use super::content_kinds::*;
        matches!(
            (threshold_kind, content_kind),
            (PERCENT_WATCHED, VIDEO)
                | (ANY_ATTEMPT, QUIZ)
                | (PASSING_SCORE, QUIZ)
                | (PACKAGE_STATUS, SCORM_PACKAGE)
        )
    }

    /// Threshold used when authoring leaves it out
    pub fn default_for(content_kind: &str) -> &'static str {
        match content_kind {
            super::content_kinds::VIDEO => PERCENT_WATCHED,
            super::content_kinds::QUIZ => PASSING_SCORE,
            _ => PACKAGE_STATUS,
        }
    }
}

/// Quiz question kinds
pub mod question_kinds {
    /// Exactly one correct option
    pub const SINGLE: &str = "single";
    /// Selected set must equal the correct set
    pub const MULTI: &str = "multi";

    pub fn is_valid(kind: &str) -> bool {
        kind == SINGLE || kind == MULTI
    }
}

/// SCORM runtime versions a package can declare
pub mod runtime_versions {
    pub const SCORM_12: &str = "scorm_1.2";
    pub const SCORM_2004: &str = "scorm_2004";
}
