//! Persisted SCORM runtime data per (user, item)

use diesel::prelude::*;

use super::diesel_schema::scorm_runtime_state;
use super::models::{NewRuntimeState, RuntimeState};
use crate::error::LearningError;

pub fn get_state(
    conn: &mut SqliteConnection,
    user_id: &str,
    content_item_id: &str,
) -> Result<Option<RuntimeState>, LearningError> {
    scorm_runtime_state::table
        .filter(scorm_runtime_state::user_id.eq(user_id))
        .filter(scorm_runtime_state::content_item_id.eq(content_item_id))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn upsert_state(
    conn: &mut SqliteConnection,
    state: &NewRuntimeState<'_>,
) -> Result<(), LearningError> {
    diesel::insert_into(scorm_runtime_state::table)
        .values(state)
        .on_conflict((scorm_runtime_state::user_id, scorm_runtime_state::content_item_id))
        .do_update()
        .set(state)
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Upsert failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    #[test]
    fn test_upsert_overwrites_state() {
        let mut conn = test_connection();
        assert!(get_state(&mut conn, "u1", "s1").unwrap().is_none());

        let mut state = NewRuntimeState {
            user_id: "u1",
            content_item_id: "s1",
            lesson_status: "incomplete",
            lesson_location: "page-2",
            suspend_data: "abc",
            total_seconds: 30.0,
            session_count: 1,
            updated_at: "2026-01-01T00:00:00Z",
        };
        upsert_state(&mut conn, &state).unwrap();

        state.lesson_status = "completed";
        state.session_count = 2;
        upsert_state(&mut conn, &state).unwrap();

        let stored = get_state(&mut conn, "u1", "s1").unwrap().unwrap();
        assert_eq!(stored.lesson_status, "completed");
        assert_eq!(stored.session_count, 2);
        assert_eq!(stored.suspend_data, "abc");
    }
}
