//! Course structure reads, plus the seeding upsert used by the authoring boundary
//!
//! Course structure is authored elsewhere; the progression core only reads it.
//! `upsert_course` exists so an authoring tool (or a test) can push a course
//! with its items and answer keys in one transaction.

use diesel::prelude::*;
use serde::Deserialize;

use super::diesel_schema::{content_items, courses, quiz_questions};
use super::models::{
    content_kinds, current_timestamp, question_kinds, threshold_kinds, ContentItem, Course,
    NewContentItem, NewCourse, QuizQuestion,
};
use crate::error::LearningError;

// ============================================================================
// Input Types
// ============================================================================

/// Course with its full item list
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourseInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub pass_threshold: Option<u8>,
    #[serde(default = "default_true")]
    pub sequential: bool,
    #[serde(default)]
    pub items: Vec<CreateItemInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateItemInput {
    pub id: String,
    #[serde(default = "default_module")]
    pub module_id: String,
    #[serde(default)]
    pub position: i32,
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub threshold_kind: Option<String>,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub next_item_id: Option<String>,
    #[serde(default)]
    pub is_final_exam: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub questions: Vec<CreateQuestionInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuestionInput {
    pub id: String,
    #[serde(default = "default_question_kind")]
    pub kind: String,
    #[serde(default)]
    pub prompt: String,
    pub correct_answers: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_module() -> String {
    "main".to_string()
}
fn default_question_kind() -> String {
    question_kinds::SINGLE.to_string()
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_course(
    conn: &mut SqliteConnection,
    course_id: &str,
) -> Result<Option<Course>, LearningError> {
    courses::table
        .filter(courses::id.eq(course_id))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn get_item(
    conn: &mut SqliteConnection,
    item_id: &str,
) -> Result<Option<ContentItem>, LearningError> {
    content_items::table
        .filter(content_items::id.eq(item_id))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Get an item or fail with NotFound
pub fn require_item(
    conn: &mut SqliteConnection,
    item_id: &str,
) -> Result<ContentItem, LearningError> {
    get_item(conn, item_id)?
        .ok_or_else(|| LearningError::NotFound(format!("content item {}", item_id)))
}

/// All items of a course in course order (position, then id for ties)
pub fn list_items_for_course(
    conn: &mut SqliteConnection,
    course_id: &str,
) -> Result<Vec<ContentItem>, LearningError> {
    content_items::table
        .filter(content_items::course_id.eq(course_id))
        .order((content_items::position.asc(), content_items::id.asc()))
        .load(conn)
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Item whose explicit `next_item_id` points at this one
pub fn find_explicit_predecessor(
    conn: &mut SqliteConnection,
    item_id: &str,
) -> Result<Option<ContentItem>, LearningError> {
    content_items::table
        .filter(content_items::next_item_id.eq(item_id))
        .order(content_items::position.asc())
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Previous item in the same module, by position
pub fn find_module_predecessor(
    conn: &mut SqliteConnection,
    item: &ContentItem,
) -> Result<Option<ContentItem>, LearningError> {
    content_items::table
        .filter(content_items::course_id.eq(&item.course_id))
        .filter(content_items::module_id.eq(&item.module_id))
        .filter(
            content_items::position.lt(item.position).or(content_items::position
                .eq(item.position)
                .and(content_items::id.lt(&item.id))),
        )
        .order((content_items::position.desc(), content_items::id.desc()))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Answer key for a quiz, in question order
pub fn get_questions(
    conn: &mut SqliteConnection,
    quiz_item_id: &str,
) -> Result<Vec<QuizQuestion>, LearningError> {
    quiz_questions::table
        .filter(quiz_questions::quiz_item_id.eq(quiz_item_id))
        .order((quiz_questions::position.asc(), quiz_questions::id.asc()))
        .load(conn)
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations (authoring boundary)
// ============================================================================

/// Create or replace a course with all of its items and answer keys
pub fn upsert_course(
    conn: &mut SqliteConnection,
    input: &CreateCourseInput,
) -> Result<Course, LearningError> {
    validate_course(input)?;

    conn.immediate_transaction(|conn| {
        let new_course = NewCourse {
            id: &input.id,
            title: &input.title,
            pass_threshold: input.pass_threshold.map(i32::from),
            sequential: input.sequential,
        };

        diesel::insert_into(courses::table)
            .values(&new_course)
            .on_conflict(courses::id)
            .do_update()
            .set((&new_course, courses::updated_at.eq(current_timestamp())))
            .execute(conn)
            .map_err(|e| LearningError::Database(format!("Upsert failed: {}", e)))?;

        for item in &input.items {
            upsert_content_item(conn, &input.id, item)?;
        }

        get_course(conn, &input.id)?
            .ok_or_else(|| LearningError::Internal("Failed to retrieve upserted course".into()))
    })
}

/// Create or replace one item; quiz items also get their answer key replaced
pub fn upsert_content_item(
    conn: &mut SqliteConnection,
    course_id: &str,
    input: &CreateItemInput,
) -> Result<(), LearningError> {
    let threshold_kind = input
        .threshold_kind
        .as_deref()
        .unwrap_or_else(|| threshold_kinds::default_for(&input.kind));
    let metadata_json = input.metadata.as_ref().map(|m| m.to_string());

    let new_item = NewContentItem {
        id: &input.id,
        course_id,
        module_id: &input.module_id,
        position: input.position,
        kind: &input.kind,
        title: &input.title,
        threshold_kind,
        threshold_value: input.threshold_value,
        duration_seconds: input.duration_seconds,
        next_item_id: input.next_item_id.as_deref(),
        is_final_exam: input.is_final_exam,
        metadata_json: metadata_json.as_deref(),
    };

    diesel::insert_into(content_items::table)
        .values(&new_item)
        .on_conflict(content_items::id)
        .do_update()
        .set((&new_item, content_items::updated_at.eq(current_timestamp())))
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Upsert failed: {}", e)))?;

    if input.kind == content_kinds::QUIZ {
        replace_quiz_questions(conn, &input.id, &input.questions)?;
    }

    Ok(())
}

/// Replace the answer key of a quiz
pub fn replace_quiz_questions(
    conn: &mut SqliteConnection,
    quiz_item_id: &str,
    questions: &[CreateQuestionInput],
) -> Result<usize, LearningError> {
    diesel::delete(quiz_questions::table.filter(quiz_questions::quiz_item_id.eq(quiz_item_id)))
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Delete failed: {}", e)))?;

    let rows: Vec<QuizQuestion> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            Ok(QuizQuestion {
                id: q.id.clone(),
                quiz_item_id: quiz_item_id.to_string(),
                position: i as i32,
                question_kind: q.kind.clone(),
                prompt: q.prompt.clone(),
                correct_answers_json: serde_json::to_string(&q.correct_answers)?,
            })
        })
        .collect::<Result<_, LearningError>>()?;

    if rows.is_empty() {
        return Ok(0);
    }

    diesel::insert_into(quiz_questions::table)
        .values(&rows)
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Insert failed: {}", e)))
}

fn validate_course(input: &CreateCourseInput) -> Result<(), LearningError> {
    if input.id.is_empty() || input.id.len() > 255 {
        return Err(LearningError::InvalidInput("course id must be 1-255 characters".into()));
    }
    if input.title.is_empty() {
        return Err(LearningError::InvalidInput("course title is required".into()));
    }
    if let Some(threshold) = input.pass_threshold {
        if threshold > 100 {
            return Err(LearningError::InvalidInput("pass_threshold must be 0-100".into()));
        }
    }

    for item in &input.items {
        if item.id.is_empty() {
            return Err(LearningError::InvalidInput("item id is required".into()));
        }
        if !content_kinds::is_valid(&item.kind) {
            return Err(LearningError::InvalidInput(format!(
                "item {}: kind '{}' is not valid. Valid kinds: {:?}",
                item.id,
                item.kind,
                content_kinds::ALL
            )));
        }
        if let Some(ref kind) = item.threshold_kind {
            if !threshold_kinds::applies_to(kind, &item.kind) {
                return Err(LearningError::InvalidInput(format!(
                    "item {}: threshold '{}' does not apply to {} items",
                    item.id, kind, item.kind
                )));
            }
        }
        if let Some(value) = item.threshold_value {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(LearningError::InvalidInput(format!(
                    "item {}: threshold_value must be within 0-100",
                    item.id
                )));
            }
        }
        if item.next_item_id.as_deref() == Some(item.id.as_str()) {
            return Err(LearningError::InvalidInput(format!(
                "item {}: next_item_id cannot point at itself",
                item.id
            )));
        }
        for question in &item.questions {
            if !question_kinds::is_valid(&question.kind) {
                return Err(LearningError::InvalidInput(format!(
                    "question {}: kind '{}' is not valid",
                    question.id, question.kind
                )));
            }
            if question.correct_answers.is_empty() {
                return Err(LearningError::InvalidInput(format!(
                    "question {}: at least one correct answer is required",
                    question.id
                )));
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::test_connection;

    #[test]
    fn test_upsert_course_with_items() {
        let mut conn = test_connection();
        let mut quiz = item("q1", "quiz", 1);
        quiz.questions = vec![question("a", &["1"]), question("b", &["2", "3"])];

        let course = upsert_course(&mut conn, &course("c1", vec![item("v1", "video", 0), quiz])).unwrap();
        assert!(course.sequential);

        let items = list_items_for_course(&mut conn, "c1").unwrap();
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["v1", "q1"]);
        assert_eq!(items[0].threshold_kind, threshold_kinds::PERCENT_WATCHED);
        assert_eq!(items[1].threshold_kind, threshold_kinds::PASSING_SCORE);

        let questions = get_questions(&mut conn, "q1").unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[1].correct_answers(), vec!["2", "3"]);
    }

    #[test]
    fn test_reupsert_replaces_answer_key() {
        let mut conn = test_connection();
        let mut quiz = item("q1", "quiz", 0);
        quiz.questions = vec![question("a", &["1"]), question("b", &["2"])];
        upsert_course(&mut conn, &course("c1", vec![quiz.clone()])).unwrap();

        quiz.questions = vec![question("z", &["9"])];
        upsert_course(&mut conn, &course("c1", vec![quiz])).unwrap();

        let questions = get_questions(&mut conn, "q1").unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].id, "z");
    }

    #[test]
    fn test_rejects_invalid_kind_and_threshold() {
        let mut conn = test_connection();
        let bad_kind = course("c1", vec![item("x", "podcast", 0)]);
        assert!(matches!(upsert_course(&mut conn, &bad_kind), Err(LearningError::InvalidInput(_))));

        let mut mismatched = item("v", "video", 0);
        mismatched.threshold_kind = Some("passing_score".into());
        assert!(upsert_course(&mut conn, &course("c1", vec![mismatched])).is_err());
    }

    #[test]
    fn test_predecessor_lookups() {
        let mut conn = test_connection();
        let mut first = item("a", "video", 0);
        first.next_item_id = Some("z".into());
        let second = item("b", "video", 1);
        let mut other_module = item("z", "video", 2);
        other_module.module_id = "m2".into();
        upsert_course(&mut conn, &course("c1", vec![first, second, other_module])).unwrap();

        let b = require_item(&mut conn, "b").unwrap();
        assert_eq!(find_module_predecessor(&mut conn, &b).unwrap().unwrap().id, "a");

        let z = require_item(&mut conn, "z").unwrap();
        assert!(find_module_predecessor(&mut conn, &z).unwrap().is_none());
        assert_eq!(find_explicit_predecessor(&mut conn, "z").unwrap().unwrap().id, "a");
        assert!(find_explicit_predecessor(&mut conn, "b").unwrap().is_none());
    }
}
