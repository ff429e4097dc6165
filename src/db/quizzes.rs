//! Quiz attempt history

use diesel::prelude::*;

use super::diesel_schema::quiz_attempts;
use super::models::{NewQuizAttempt, QuizAttempt};
use crate::error::LearningError;

/// Attempts for a learner on one quiz, newest first
pub fn list_attempts(
    conn: &mut SqliteConnection,
    user_id: &str,
    quiz_item_id: &str,
) -> Result<Vec<QuizAttempt>, LearningError> {
    quiz_attempts::table
        .filter(quiz_attempts::user_id.eq(user_id))
        .filter(quiz_attempts::quiz_item_id.eq(quiz_item_id))
        .order(quiz_attempts::submitted_at.desc())
        .load(conn)
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn latest_attempt(
    conn: &mut SqliteConnection,
    user_id: &str,
    quiz_item_id: &str,
) -> Result<Option<QuizAttempt>, LearningError> {
    quiz_attempts::table
        .filter(quiz_attempts::user_id.eq(user_id))
        .filter(quiz_attempts::quiz_item_id.eq(quiz_item_id))
        .order(quiz_attempts::submitted_at.desc())
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Highest-scoring attempt; ties go to the earlier submission
pub fn best_attempt(
    conn: &mut SqliteConnection,
    user_id: &str,
    quiz_item_id: &str,
) -> Result<Option<QuizAttempt>, LearningError> {
    quiz_attempts::table
        .filter(quiz_attempts::user_id.eq(user_id))
        .filter(quiz_attempts::quiz_item_id.eq(quiz_item_id))
        .order((quiz_attempts::score.desc(), quiz_attempts::submitted_at.asc()))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn insert_attempt(
    conn: &mut SqliteConnection,
    attempt: &NewQuizAttempt<'_>,
) -> Result<(), LearningError> {
    diesel::insert_into(quiz_attempts::table)
        .values(attempt)
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Insert failed: {}", e)))?;
    Ok(())
}

/// Remove superseded attempts; returns how many were deleted
pub fn delete_attempts(
    conn: &mut SqliteConnection,
    user_id: &str,
    quiz_item_id: &str,
) -> Result<usize, LearningError> {
    diesel::delete(
        quiz_attempts::table
            .filter(quiz_attempts::user_id.eq(user_id))
            .filter(quiz_attempts::quiz_item_id.eq(quiz_item_id)),
    )
    .execute(conn)
    .map_err(|e| LearningError::Database(format!("Delete failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    fn attempt<'a>(id: &'a str, score: i32, at: &'a str) -> NewQuizAttempt<'a> {
        NewQuizAttempt {
            id,
            user_id: "u1",
            quiz_item_id: "q1",
            score,
            passed: score >= 70,
            pass_threshold: 70,
            answers_json: "[]",
            submitted_at: at,
        }
    }

    #[test]
    fn test_latest_and_best() {
        let mut conn = test_connection();
        insert_attempt(&mut conn, &attempt("a1", 90, "2026-01-01T00:00:01.000000Z")).unwrap();
        insert_attempt(&mut conn, &attempt("a2", 40, "2026-01-01T00:00:02.000000Z")).unwrap();

        assert_eq!(latest_attempt(&mut conn, "u1", "q1").unwrap().unwrap().id, "a2");
        assert_eq!(best_attempt(&mut conn, "u1", "q1").unwrap().unwrap().id, "a1");
        assert_eq!(list_attempts(&mut conn, "u1", "q1").unwrap().len(), 2);
    }

    #[test]
    fn test_delete_attempts_scoped_to_learner() {
        let mut conn = test_connection();
        insert_attempt(&mut conn, &attempt("a1", 90, "2026-01-01T00:00:01.000000Z")).unwrap();
        let mut other = attempt("b1", 10, "2026-01-01T00:00:01.000000Z");
        other.user_id = "u2";
        insert_attempt(&mut conn, &other).unwrap();

        assert_eq!(delete_attempts(&mut conn, "u1", "q1").unwrap(), 1);
        assert!(latest_attempt(&mut conn, "u1", "q1").unwrap().is_none());
        assert!(latest_attempt(&mut conn, "u2", "q1").unwrap().is_some());
    }
}
