//! Quiz Evaluator - scores submissions against the answer key
//!
//! A question counts as correct when the selected option set equals the
//! correct set exactly. The score is the rounded percentage of correct
//! questions; unanswered questions count as wrong.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::events::{EventBus, LearningEvent};
use super::progress_service::ProgressService;
use super::unlock_service::UnlockService;
use crate::config::{AttemptPolicy, Config};
use crate::db::models::{precise_timestamp, threshold_kinds, ContentItem, NewQuizAttempt, QuizAttempt, QuizQuestion};
use crate::db::{courses, quizzes, ProgressDb};
use crate::error::LearningError;

/// One answered question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: String,
    pub selected: Vec<String>,
}

/// Outcome of a submission
#[derive(Debug, Clone, Serialize)]
pub struct QuizResult {
    pub attempt_id: String,
    pub score: i32,
    pub passed: bool,
    pub pass_threshold: i32,
    pub correct: usize,
    pub total: usize,
    /// Quiz item is completed for this learner after the submission
    pub completed: bool,
    pub unlocked: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub correct: usize,
    pub total: usize,
    pub percent: i32,
}

pub struct QuizService {
    db: Arc<ProgressDb>,
    config: Arc<Config>,
    unlock: Arc<UnlockService>,
    progress: Arc<ProgressService>,
    events: Arc<EventBus>,
}

impl QuizService {
    pub fn new(
        db: Arc<ProgressDb>,
        config: Arc<Config>,
        unlock: Arc<UnlockService>,
        progress: Arc<ProgressService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            config,
            unlock,
            progress,
            events,
        }
    }

    /// Score and record an attempt, completing the quiz item when it counts.
    /// A quiz the learner cannot open yet fails with `Locked` and records nothing.
    pub fn submit(
        &self,
        user_id: &str,
        quiz_item_id: &str,
        answers: &[QuizAnswer],
    ) -> Result<QuizResult, LearningError> {
        if user_id.is_empty() {
            return Err(LearningError::InvalidInput("user_id is required".into()));
        }

        let (item, pass_threshold, score) = self.db.with_conn(|conn| {
            let item = courses::require_item(conn, quiz_item_id)?;
            if !item.is_quiz() {
                return Err(LearningError::InvalidInput(format!(
                    "content item {} is not a quiz",
                    quiz_item_id
                )));
            }
            let course_threshold = courses::get_course(conn, &item.course_id)?
                .and_then(|c| c.pass_threshold);
            let questions = courses::get_questions(conn, quiz_item_id)?;
            let score = score_answers(&questions, answers)?;
            let threshold = self.resolve_threshold(&item, course_threshold);
            Ok((item, threshold, score))
        })?;
        self.unlock.require_access(user_id, quiz_item_id)?;

        let passed = score.percent >= pass_threshold;
        let attempt_id = Uuid::new_v4().to_string();
        let answers_json = serde_json::to_string(answers)?;
        let submitted_at = precise_timestamp();
        let policy = self.config.quiz_attempt_policy;

        self.db.with_write_tx(|conn| {
            if policy == AttemptPolicy::MostRecent {
                quizzes::delete_attempts(conn, user_id, quiz_item_id)?;
            }
            quizzes::insert_attempt(
                conn,
                &NewQuizAttempt {
                    id: &attempt_id,
                    user_id,
                    quiz_item_id,
                    score: score.percent,
                    passed,
                    pass_threshold,
                    answers_json: &answers_json,
                    submitted_at: &submitted_at,
                },
            )
        })?;

        info!(
            user_id = %user_id,
            quiz_item_id = %quiz_item_id,
            score = score.percent,
            passed,
            "Quiz submitted"
        );
        self.events.emit(LearningEvent::QuizSubmitted {
            user_id: user_id.to_string(),
            quiz_item_id: quiz_item_id.to_string(),
            score: score.percent,
            passed,
        });

        let counts = passed || item.threshold_kind == threshold_kinds::ANY_ATTEMPT;
        let (completed, unlocked) = if counts {
            let outcome = self.progress.record_completion(user_id, quiz_item_id)?;
            (outcome.record.completed, outcome.unlocked)
        } else {
            let completed = self
                .progress
                .get_progress(user_id, quiz_item_id)?
                .map(|r| r.completed)
                .unwrap_or(false);
            (completed, vec![])
        };

        Ok(QuizResult {
            attempt_id,
            score: score.percent,
            passed,
            pass_threshold,
            correct: score.correct,
            total: score.total,
            completed,
            unlocked,
        })
    }

    /// Attempts newest first. Under the most-recent policy this holds at most one.
    pub fn attempt_history(
        &self,
        user_id: &str,
        quiz_item_id: &str,
    ) -> Result<Vec<QuizAttempt>, LearningError> {
        self.db
            .with_conn(|conn| quizzes::list_attempts(conn, user_id, quiz_item_id))
    }

    /// The attempt the configured policy treats as authoritative
    pub fn authoritative_attempt(
        &self,
        user_id: &str,
        quiz_item_id: &str,
    ) -> Result<Option<QuizAttempt>, LearningError> {
        self.db.with_conn(|conn| match self.config.quiz_attempt_policy {
            AttemptPolicy::MostRecent => quizzes::latest_attempt(conn, user_id, quiz_item_id),
            AttemptPolicy::Best => quizzes::best_attempt(conn, user_id, quiz_item_id),
        })
    }

    /// Item threshold, then course threshold, then the configured default
    fn resolve_threshold(&self, item: &ContentItem, course_threshold: Option<i32>) -> i32 {
        item.threshold_value
            .map(|v| v.round() as i32)
            .or(course_threshold)
            .unwrap_or(i32::from(self.config.default_pass_threshold))
            .clamp(0, 100)
    }
}

/// Score answers against an answer key.
///
/// Unknown or duplicate question ids and empty selections are rejected.
pub fn score_answers(questions: &[QuizQuestion], answers: &[QuizAnswer]) -> Result<Score, LearningError> {
    if questions.is_empty() {
        return Err(LearningError::InvalidInput("quiz has no questions".into()));
    }

    let keys: HashMap<&str, BTreeSet<String>> = questions
        .iter()
        .map(|q| (q.id.as_str(), q.correct_answers().into_iter().collect()))
        .collect();

    let mut seen = HashSet::new();
    let mut correct = 0;
    for answer in answers {
        let Some(key) = keys.get(answer.question_id.as_str()) else {
            return Err(LearningError::InvalidInput(format!(
                "unknown question id: {}",
                answer.question_id
            )));
        };
        if !seen.insert(answer.question_id.as_str()) {
            return Err(LearningError::InvalidInput(format!(
                "question {} answered more than once",
                answer.question_id
            )));
        }
        if answer.selected.is_empty() {
            return Err(LearningError::InvalidInput(format!(
                "question {} has an empty selection",
                answer.question_id
            )));
        }

        let selected: BTreeSet<String> = answer.selected.iter().cloned().collect();
        if !key.is_empty() && &selected == key {
            correct += 1;
        }
    }

    let total = questions.len();
    let percent = (correct as f64 / total as f64 * 100.0).round() as i32;
    Ok(Score {
        correct,
        total,
        percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::courses::fixtures::{course, item, question};
    use crate::db::models::content_kinds;
    use crate::services::{CertificationService, UnlockService};
    use tempfile::TempDir;

    fn key(id: &str, correct: &[&str]) -> QuizQuestion {
        QuizQuestion {
            id: id.to_string(),
            quiz_item_id: "q".into(),
            position: 0,
            question_kind: "single".into(),
            prompt: String::new(),
            correct_answers_json: serde_json::to_string(correct).unwrap(),
        }
    }

    fn answer(id: &str, selected: &[&str]) -> QuizAnswer {
        QuizAnswer {
            question_id: id.to_string(),
            selected: selected.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_score_rounds_to_nearest() {
        let questions = vec![key("1", &["a"]), key("2", &["b"]), key("3", &["c"])];
        let score = score_answers(&questions, &[answer("1", &["a"]), answer("2", &["b"])]).unwrap();
        assert_eq!(score.correct, 2);
        assert_eq!(score.percent, 67);
    }

    #[test]
    fn test_multi_answer_needs_exact_set() {
        let questions = vec![key("1", &["a", "b"])];
        assert_eq!(score_answers(&questions, &[answer("1", &["b", "a"])]).unwrap().percent, 100);
        assert_eq!(score_answers(&questions, &[answer("1", &["a"])]).unwrap().percent, 0);
        assert_eq!(score_answers(&questions, &[answer("1", &["a", "b", "c"])]).unwrap().percent, 0);
    }

    #[test]
    fn test_malformed_answers_rejected() {
        let questions = vec![key("1", &["a"])];
        assert!(score_answers(&questions, &[answer("9", &["a"])]).is_err());
        assert!(score_answers(&questions, &[answer("1", &["a"]), answer("1", &["a"])]).is_err());
        assert!(score_answers(&questions, &[answer("1", &[])]).is_err());
        assert!(score_answers(&[], &[]).is_err());
    }

    fn setup(dir: &TempDir, policy: AttemptPolicy, course_threshold: Option<u8>) -> QuizService {
        let mut config = Config::with_storage_dir(dir.path());
        config.quiz_attempt_policy = policy;
        let config = Arc::new(config);
        let db = Arc::new(ProgressDb::open(&config).unwrap());
        let events = Arc::new(EventBus::new());
        let unlock = Arc::new(UnlockService::new(db.clone(), config.clone()));
        let certification = Arc::new(CertificationService::new(db.clone(), config.clone(), events.clone()));
        let progress = Arc::new(ProgressService::new(db.clone(), unlock.clone(), certification, events.clone()));

        let mut quiz = item("q1", content_kinds::QUIZ, 0);
        quiz.questions = vec![question("1", &["a"]), question("2", &["b"]), question("3", &["c"]), question("4", &["d"])];
        let mut input = course("c1", vec![quiz]);
        input.pass_threshold = course_threshold;
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();

        // Second course where the quiz sits behind a video
        let mut video = item("v2", content_kinds::VIDEO, 0);
        video.duration_seconds = Some(100.0);
        let mut gated = item("q2", content_kinds::QUIZ, 1);
        gated.questions = vec![question("g1", &["a"])];
        db.with_conn(|conn| courses::upsert_course(conn, &course("c2", vec![video, gated])))
            .unwrap();

        QuizService::new(db, config, unlock, progress, events)
    }

    #[test]
    fn test_default_threshold_from_config() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, AttemptPolicy::MostRecent, None);

        let result = service
            .submit("u1", "q1", &[answer("1", &["a"]), answer("2", &["b"]), answer("3", &["x"])])
            .unwrap();
        assert_eq!(result.score, 50);
        assert_eq!(result.pass_threshold, 70);
        assert!(!result.passed);
        assert!(!result.completed);
    }

    #[test]
    fn test_course_threshold_applies() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, AttemptPolicy::MostRecent, Some(50));

        let result = service
            .submit("u1", "q1", &[answer("1", &["a"]), answer("2", &["b"])])
            .unwrap();
        assert_eq!(result.pass_threshold, 50);
        assert!(result.passed);
        assert!(result.completed);
    }

    #[test]
    fn test_most_recent_policy_supersedes_attempts() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, AttemptPolicy::MostRecent, None);
        let all = [answer("1", &["a"]), answer("2", &["b"]), answer("3", &["c"]), answer("4", &["d"])];

        service.submit("u1", "q1", &all).unwrap();
        let failed = service.submit("u1", "q1", &[answer("1", &["a"])]).unwrap();

        assert!(!failed.passed);
        assert!(failed.completed, "an earlier pass keeps the item completed");
        let history = service.attempt_history("u1", "q1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].score, 25);
    }

    #[test]
    fn test_best_policy_keeps_history() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, AttemptPolicy::Best, None);
        let all = [answer("1", &["a"]), answer("2", &["b"]), answer("3", &["c"]), answer("4", &["d"])];

        service.submit("u1", "q1", &all).unwrap();
        service.submit("u1", "q1", &[answer("1", &["a"])]).unwrap();

        assert_eq!(service.attempt_history("u1", "q1").unwrap().len(), 2);
        assert_eq!(service.authoritative_attempt("u1", "q1").unwrap().unwrap().score, 100);
    }

    #[test]
    fn test_locked_quiz_records_no_attempt() {
        let dir = TempDir::new().unwrap();
        let service = setup(&dir, AttemptPolicy::MostRecent, None);

        service.progress.record_progress("u1", "v2", 50.0).unwrap();
        let locked = service.submit("u1", "q2", &[answer("g1", &["a"])]);
        assert!(matches!(locked, Err(LearningError::Locked(_))));
        assert!(service.attempt_history("u1", "q2").unwrap().is_empty());
        assert!(service.progress.get_progress("u1", "q2").unwrap().is_none());

        service.progress.record_progress("u1", "v2", 100.0).unwrap();
        let result = service.submit("u1", "q2", &[answer("g1", &["a"])]).unwrap();
        assert!(result.completed);
    }
}
