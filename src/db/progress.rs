//! Progress record operations
//!
//! One row per (user, item). Writes go through a single
//! `INSERT .. ON CONFLICT DO UPDATE` that keeps the newest measure and ORs the
//! completion flag, so concurrent writers converge and `completed` never reverts.

use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use super::diesel_schema::progress_records;
use super::models::{current_timestamp, NewProgressRecord, ProgressRecord};
use crate::error::LearningError;

/// Result of an upsert: the row before and after the write
#[derive(Debug, Clone)]
pub struct ProgressWrite {
    pub previous: Option<ProgressRecord>,
    pub record: ProgressRecord,
}

impl ProgressWrite {
    /// True only for the write that flipped `completed` from false to true
    pub fn newly_completed(&self) -> bool {
        self.record.completed && !self.previous.as_ref().map(|p| p.completed).unwrap_or(false)
    }
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_progress(
    conn: &mut SqliteConnection,
    user_id: &str,
    content_item_id: &str,
) -> Result<Option<ProgressRecord>, LearningError> {
    progress_records::table
        .filter(progress_records::user_id.eq(user_id))
        .filter(progress_records::content_item_id.eq(content_item_id))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Progress rows for a set of items (missing rows are simply absent)
pub fn get_progress_for_items(
    conn: &mut SqliteConnection,
    user_id: &str,
    item_ids: &[String],
) -> Result<Vec<ProgressRecord>, LearningError> {
    if item_ids.is_empty() {
        return Ok(vec![]);
    }

    progress_records::table
        .filter(progress_records::user_id.eq(user_id))
        .filter(progress_records::content_item_id.eq_any(item_ids))
        .load(conn)
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Create or update a progress record.
///
/// `elapsed_measure` is last-write-wins; `completed` is `existing OR new`.
/// Run inside a write transaction when the caller needs an exact
/// `newly_completed` answer under concurrency.
pub fn upsert_progress(
    conn: &mut SqliteConnection,
    user_id: &str,
    content_item_id: &str,
    elapsed_measure: f64,
    completed: bool,
) -> Result<ProgressWrite, LearningError> {
    let previous = get_progress(conn, user_id, content_item_id)?;

    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();
    let new_record = NewProgressRecord {
        id: &id,
        user_id,
        content_item_id,
        elapsed_measure,
        completed,
        completed_at: completed.then_some(now.as_str()),
        updated_at: &now,
    };

    diesel::insert_into(progress_records::table)
        .values(&new_record)
        .on_conflict((progress_records::user_id, progress_records::content_item_id))
        .do_update()
        .set((
            progress_records::elapsed_measure.eq(excluded(progress_records::elapsed_measure)),
            progress_records::completed
                .eq(progress_records::completed.or(excluded(progress_records::completed))),
            progress_records::updated_at.eq(excluded(progress_records::updated_at)),
        ))
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Upsert failed: {}", e)))?;

    // First completion stamps completed_at; later writes leave it alone
    if completed {
        diesel::update(
            progress_records::table
                .filter(progress_records::user_id.eq(user_id))
                .filter(progress_records::content_item_id.eq(content_item_id))
                .filter(progress_records::completed_at.is_null()),
        )
        .set(progress_records::completed_at.eq(&now))
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Update failed: {}", e)))?;
    }

    let record = get_progress(conn, user_id, content_item_id)?
        .ok_or_else(|| LearningError::Internal("Failed to retrieve upserted progress".into()))?;

    Ok(ProgressWrite { previous, record })
}

/// Count of completed items among the given ids
pub fn completed_count(
    conn: &mut SqliteConnection,
    user_id: &str,
    item_ids: &[String],
) -> Result<i64, LearningError> {
    if item_ids.is_empty() {
        return Ok(0);
    }

    progress_records::table
        .filter(progress_records::user_id.eq(user_id))
        .filter(progress_records::content_item_id.eq_any(item_ids))
        .filter(progress_records::completed.eq(true))
        .count()
        .get_result(conn)
        .map_err(|e| LearningError::Database(format!("Count query failed: {}", e)))
}
