//! Lamad Progress - lesson progression and certification sidecar
//!
//! Tracks how far each learner has moved through a course, decides which
//! items are open to them, scores quizzes, issues certificates once every
//! item is complete, and hosts the SCORM runtime for packaged content.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/lamad-progress/
//! ├── progress.db            # SQLite: courses, progress, attempts, certificates
//! ├── packages/
//! │   ├── <item>/<sha256>/   # Extracted SCORM package, one dir per upload
//! │   └── .staging/          # In-flight extractions
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod scorm;
pub mod services;

// Re-exports
pub use config::{AttemptPolicy, Config};
pub use db::ProgressDb;
pub use error::LearningError;
pub use http::HttpServer;
pub use scorm::{ScormSession, SessionRegistry};
pub use services::{LearningEvent, Services};
