//! Service layer for lamad-progress
//!
//! Services hold the progression rules between HTTP handlers and repositories:
//! - Input validation
//! - Transaction boundaries
//! - Cross-component follow-ups (unlock re-evaluation, certification checks)
//! - Event emission
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers / SCORM bridge (thin)
//!     ↓
//! Service Layer (progression rules)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod unlock_service;
pub mod certification_service;
pub mod progress_service;
pub mod quiz_service;
pub mod package_service;

pub use certification_service::CertificationService;
pub use events::{EventBus, EventListener, LearningEvent};
pub use package_service::PackageService;
pub use progress_service::ProgressService;
pub use quiz_service::QuizService;
pub use unlock_service::UnlockService;

use std::sync::Arc;

use crate::config::Config;
use crate::db::courses::{self, CreateCourseInput};
use crate::db::models::Course;
use crate::db::ProgressDb;
use crate::error::LearningError;

/// Service container shared by the HTTP server and the SCORM bridge
pub struct Services {
    pub config: Arc<Config>,
    pub db: Arc<ProgressDb>,
    pub unlock: Arc<UnlockService>,
    pub certification: Arc<CertificationService>,
    pub progress: Arc<ProgressService>,
    pub quiz: Arc<QuizService>,
    pub packages: Arc<PackageService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Wire every service over one database
    pub fn new(config: Arc<Config>, db: Arc<ProgressDb>) -> Self {
        let events = Arc::new(EventBus::new());
        let unlock = Arc::new(UnlockService::new(db.clone(), config.clone()));
        let certification = Arc::new(CertificationService::new(
            db.clone(),
            config.clone(),
            events.clone(),
        ));
        let progress = Arc::new(ProgressService::new(
            db.clone(),
            unlock.clone(),
            certification.clone(),
            events.clone(),
        ));
        let quiz = Arc::new(QuizService::new(
            db.clone(),
            config.clone(),
            unlock.clone(),
            progress.clone(),
            events.clone(),
        ));
        let packages = Arc::new(PackageService::new(db.clone(), config.clone(), events.clone()));

        Self {
            config,
            db,
            unlock,
            certification,
            progress,
            quiz,
            packages,
            events,
        }
    }

    /// Open the database under `config.storage_dir` and wire the services
    pub fn open(config: Config) -> Result<Self, LearningError> {
        let db = Arc::new(ProgressDb::open(&config)?);
        Ok(Self::new(Arc::new(config), db))
    }

    /// Seed or replace a course from the authoring boundary
    pub fn upsert_course(&self, input: &CreateCourseInput) -> Result<Course, LearningError> {
        let course = self.db.with_conn(|conn| courses::upsert_course(conn, input))?;
        self.events.emit(LearningEvent::CourseUpserted {
            course_id: course.id.clone(),
            item_count: input.items.len(),
        });
        Ok(course)
    }
}
