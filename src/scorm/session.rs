//! Per-frame SCORM runtime session
//!
//! ```text
//! Uninitialized --initialize--> Initialized --terminate--> Terminated
//! ```
//!
//! Writes are buffered in the session and reach the store only on commit (or
//! terminate). Every call outside `Initialized` fails with a runtime error
//! code; nothing here panics or propagates a host error to the package.

use std::sync::Arc;

use tracing::{debug, warn};

use super::cmi::{self, Access, BridgeError, Element, LessonStatus, Phase, ScormVersion};
use crate::db::models::RuntimeState;
use crate::error::LearningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Terminated,
}

/// What a commit hands to the store
#[derive(Debug, Clone, PartialEq)]
pub struct CommitData {
    pub user_id: String,
    pub content_item_id: String,
    pub lesson_status: LessonStatus,
    pub lesson_location: String,
    pub suspend_data: String,
    /// Time across all sessions, including this one
    pub total_seconds: f64,
    pub session_count: i32,
    /// Status maps to completion ("passed" or "completed")
    pub completed: bool,
}

/// Persistence behind a session
pub trait RuntimeStore: Send + Sync {
    /// Runtime data saved by earlier sessions
    fn load(&self, user_id: &str, content_item_id: &str) -> Result<Option<RuntimeState>, LearningError>;

    /// Persist runtime data and report progress
    fn commit(&self, data: &CommitData) -> Result<(), LearningError>;
}

/// One learner's runtime session inside one embedded frame
pub struct ScormSession {
    version: ScormVersion,
    user_id: String,
    learner_name: String,
    content_item_id: String,
    state: SessionState,
    store: Arc<dyn RuntimeStore>,

    last_error: Option<BridgeError>,
    diagnostic: String,
    /// Host detail captured while a call fails, published by `record`
    pending_diagnostic: Option<String>,

    // Values carried over from earlier sessions
    base_total_seconds: f64,
    session_count: i32,
    entry: &'static str,

    // Working values
    completion: LessonStatus,
    success: LessonStatus,
    location: String,
    suspend_data: String,
    session_seconds: f64,
    exit: String,
    score_raw: Option<String>,
    dirty: bool,
}

impl ScormSession {
    pub fn new(
        version: ScormVersion,
        user_id: impl Into<String>,
        content_item_id: impl Into<String>,
        store: Arc<dyn RuntimeStore>,
    ) -> Self {
        Self {
            version,
            user_id: user_id.into(),
            learner_name: String::new(),
            content_item_id: content_item_id.into(),
            state: SessionState::Uninitialized,
            store,
            last_error: None,
            diagnostic: String::new(),
            pending_diagnostic: None,
            base_total_seconds: 0.0,
            session_count: 0,
            entry: "ab-initio",
            completion: LessonStatus::NotAttempted,
            success: LessonStatus::Unknown,
            location: String::new(),
            suspend_data: String::new(),
            session_seconds: 0.0,
            exit: String::new(),
            score_raw: None,
            dirty: false,
        }
    }

    /// Display name returned for the learner-name element
    pub fn with_learner_name(mut self, name: impl Into<String>) -> Self {
        self.learner_name = name.into();
        self
    }

    pub fn version(&self) -> ScormVersion {
        self.version
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn content_item_id(&self) -> &str {
        &self.content_item_id
    }

    /// Wire code of the last call's error, 0 after a successful call
    pub fn last_error_code(&self) -> u16 {
        self.last_error.map(|e| e.code(self.version)).unwrap_or(0)
    }

    /// Standard text for an error code
    pub fn error_string(&self, code: u16) -> &'static str {
        cmi::error_string(code, self.version)
    }

    /// Host detail for the last error, if the code matches
    pub fn diagnostic(&self, code: u16) -> String {
        if code == self.last_error_code() && code != 0 {
            self.diagnostic.clone()
        } else {
            String::new()
        }
    }

    fn record<T>(&mut self, result: Result<T, BridgeError>) -> Result<T, BridgeError> {
        match &result {
            Ok(_) => {
                self.last_error = None;
                self.diagnostic.clear();
                self.pending_diagnostic = None;
            }
            Err(e) => {
                debug!(user_id = %self.user_id, content_item_id = %self.content_item_id, error = ?e, "SCORM call failed");
                self.diagnostic = self.pending_diagnostic.take().unwrap_or_else(|| e.to_string());
                self.last_error = Some(*e);
            }
        }
        result
    }

    /// Record an invalid-argument failure for a call rejected before dispatch
    pub fn reject_argument(&mut self) -> Result<(), BridgeError> {
        self.record(Err(BridgeError::InvalidArgument))
    }

    fn require_initialized(&self, phase: Phase) -> Result<(), BridgeError> {
        match self.state {
            SessionState::Initialized => Ok(()),
            SessionState::Uninitialized => Err(BridgeError::BeforeInitialize(phase)),
            SessionState::Terminated => Err(BridgeError::AfterTerminate(phase)),
        }
    }

    // =========================================================================
    // API
    // =========================================================================

    /// Start the session and load what earlier sessions saved
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        let result = self.initialize_inner();
        self.record(result)
    }

    fn initialize_inner(&mut self) -> Result<(), BridgeError> {
        match self.state {
            SessionState::Initialized => return Err(BridgeError::AlreadyInitialized),
            SessionState::Terminated => return Err(BridgeError::AfterTerminate(Phase::Initialize)),
            SessionState::Uninitialized => {}
        }

        let saved = match self.store.load(&self.user_id, &self.content_item_id) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(user_id = %self.user_id, content_item_id = %self.content_item_id, error = %e, "Failed to load runtime state");
                self.pending_diagnostic = Some(e.to_string());
                return Err(BridgeError::StoreFailure(Phase::Initialize));
            }
        };

        if let Some(saved) = saved {
            let status = LessonStatus::parse(&saved.lesson_status).unwrap_or_default();
            self.completion = status.completion_part();
            self.success = status.success_part();
            self.location = saved.lesson_location;
            self.suspend_data = saved.suspend_data;
            self.base_total_seconds = saved.total_seconds;
            self.session_count = saved.session_count;
            if saved.session_count > 0 {
                self.entry = "resume";
            }
        }
        self.session_count += 1;
        self.state = SessionState::Initialized;
        Ok(())
    }

    pub fn get_value(&mut self, name: &str) -> Result<String, BridgeError> {
        let result = self.get_value_inner(name);
        self.record(result)
    }

    fn get_value_inner(&self, name: &str) -> Result<String, BridgeError> {
        self.require_initialized(Phase::GetValue)?;
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument);
        }
        let element = Element::parse(name, self.version).ok_or(BridgeError::UndefinedElement)?;
        if element.access() == Access::WriteOnly {
            return Err(BridgeError::WriteOnly);
        }

        Ok(match element {
            Element::LessonStatus => self.lesson_status().as_str().to_string(),
            Element::CompletionStatus => self.completion.as_str().to_string(),
            Element::SuccessStatus => self.success.as_str().to_string(),
            Element::Location => self.location.clone(),
            Element::SuspendData => self.suspend_data.clone(),
            Element::LearnerId => self.user_id.clone(),
            Element::LearnerName => self.learner_name.clone(),
            Element::Entry => self.entry.to_string(),
            Element::TotalTime => cmi::format_time(self.base_total_seconds, self.version),
            Element::ScoreRaw => self.score_raw.clone().unwrap_or_default(),
            Element::SessionTime | Element::Exit => return Err(BridgeError::WriteOnly),
        })
    }

    pub fn set_value(&mut self, name: &str, value: &str) -> Result<(), BridgeError> {
        let result = self.set_value_inner(name, value);
        self.record(result)
    }

    fn set_value_inner(&mut self, name: &str, value: &str) -> Result<(), BridgeError> {
        self.require_initialized(Phase::SetValue)?;
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument);
        }
        let element = Element::parse(name, self.version).ok_or(BridgeError::UndefinedElement)?;
        if element.access() == Access::ReadOnly {
            return Err(BridgeError::ReadOnly);
        }

        match element {
            Element::LessonStatus => {
                let status = LessonStatus::parse(value)
                    .filter(|s| s.valid_for_12())
                    .ok_or(BridgeError::TypeMismatch)?;
                self.completion = status.completion_part();
                self.success = status.success_part();
                // Keep "browsed" and "not attempted" distinct from "incomplete"
                if matches!(status, LessonStatus::Browsed | LessonStatus::NotAttempted) {
                    self.completion = status;
                }
            }
            Element::CompletionStatus => {
                self.completion = LessonStatus::parse(value)
                    .filter(|s| s.valid_completion())
                    .ok_or(BridgeError::TypeMismatch)?;
            }
            Element::SuccessStatus => {
                self.success = LessonStatus::parse(value)
                    .filter(|s| s.valid_success())
                    .ok_or(BridgeError::TypeMismatch)?;
            }
            Element::Location => {
                if value.chars().count() > self.version.location_limit() {
                    return Err(BridgeError::OutOfRange);
                }
                self.location = value.to_string();
            }
            Element::SuspendData => self.set_suspend_data(value)?,
            Element::SessionTime => {
                self.session_seconds =
                    cmi::parse_time(value, self.version).ok_or(BridgeError::TypeMismatch)?;
            }
            Element::Exit => {
                if !cmi::valid_exit(value, self.version) {
                    return Err(BridgeError::TypeMismatch);
                }
                self.exit = value.to_string();
            }
            Element::ScoreRaw => {
                let score: f64 = value.parse().map_err(|_| BridgeError::TypeMismatch)?;
                if !score.is_finite() {
                    return Err(BridgeError::TypeMismatch);
                }
                if self.version == ScormVersion::V12 && !(0.0..=100.0).contains(&score) {
                    return Err(BridgeError::OutOfRange);
                }
                self.score_raw = Some(value.to_string());
            }
            Element::LearnerId | Element::LearnerName | Element::Entry | Element::TotalTime => {
                return Err(BridgeError::ReadOnly)
            }
        }

        self.dirty = true;
        Ok(())
    }

    fn set_suspend_data(&mut self, value: &str) -> Result<(), BridgeError> {
        if value.chars().count() > self.version.suspend_data_limit() {
            return Err(BridgeError::OutOfRange);
        }
        self.suspend_data = value.to_string();
        Ok(())
    }

    /// Flush buffered writes to the store
    pub fn commit(&mut self) -> Result<(), BridgeError> {
        let result = self
            .require_initialized(Phase::Commit)
            .and_then(|_| self.flush(Phase::Commit));
        self.record(result)
    }

    /// Flush and end the session. A failed flush leaves the session open so
    /// the package can retry.
    pub fn terminate(&mut self) -> Result<(), BridgeError> {
        let result = self
            .require_initialized(Phase::Terminate)
            .and_then(|_| self.flush(Phase::Terminate));
        if result.is_ok() {
            self.state = SessionState::Terminated;
            debug!(user_id = %self.user_id, content_item_id = %self.content_item_id, exit = %self.exit, "SCORM session terminated");
        }
        self.record(result)
    }

    /// Store an opaque blob verbatim and persist it immediately
    pub fn save_suspend_data(&mut self, blob: &str) -> Result<(), BridgeError> {
        let result = self
            .require_initialized(Phase::SetValue)
            .and_then(|_| self.set_suspend_data(blob))
            .and_then(|_| {
                self.dirty = true;
                self.flush(Phase::Commit)
            });
        self.record(result)
    }

    fn flush(&mut self, phase: Phase) -> Result<(), BridgeError> {
        if !self.dirty {
            return Ok(());
        }

        let data = self.commit_data();
        if let Err(e) = self.store.commit(&data) {
            warn!(user_id = %self.user_id, content_item_id = %self.content_item_id, error = %e, "SCORM commit failed");
            self.pending_diagnostic = Some(e.to_string());
            return Err(BridgeError::StoreFailure(phase));
        }

        debug!(
            user_id = %self.user_id,
            content_item_id = %self.content_item_id,
            status = data.lesson_status.as_str(),
            total_seconds = data.total_seconds,
            "SCORM runtime data committed"
        );
        self.dirty = false;
        Ok(())
    }

    /// Persisted status: the 1.2 value, or the folded 2004 pair
    fn lesson_status(&self) -> LessonStatus {
        LessonStatus::combine(self.completion, self.success)
    }

    fn commit_data(&self) -> CommitData {
        let status = self.lesson_status();
        CommitData {
            user_id: self.user_id.clone(),
            content_item_id: self.content_item_id.clone(),
            lesson_status: status,
            lesson_location: self.location.clone(),
            suspend_data: self.suspend_data.clone(),
            total_seconds: self.base_total_seconds + self.session_seconds,
            session_count: self.session_count,
            completed: status.is_complete(),
        }
    }
}
