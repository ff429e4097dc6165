//! SQLite storage for course structure, learner progress and certificates
//!
//! ## Architecture
//!
//! - Schema created and versioned through rusqlite on open (`schema.rs`)
//! - All queries go through Diesel over an r2d2 pool
//! - Extracted SCORM package files live on disk; only their locator is stored here
//!
//! ## Tables
//!
//! - `courses`, `content_items`, `quiz_questions` - authored structure (read-only to the core)
//! - `progress_records` - one row per (user, item), monotonic `completed`
//! - `quiz_attempts` - submission history
//! - `certificates` - UNIQUE (user_id, course_id)
//! - `scorm_packages`, `scorm_runtime_state` - package locators and per-learner runtime data

pub mod schema;
pub mod diesel_schema;
pub mod models;
pub mod courses;
pub mod progress;
pub mod quizzes;
pub mod certificates;
pub mod packages;
pub mod runtime_state;

use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::LearningError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applies per-connection pragmas as the pool hands connections out
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database
pub struct ProgressDb {
    pool: DbPool,
    store_timeout: Duration,
}

impl ProgressDb {
    /// Open or create the database under the configured storage directory
    pub fn open(config: &Config) -> Result<Self, LearningError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        let db_path = config.database_path();
        info!("Opening SQLite database at {:?}", db_path);

        // Schema and WAL mode are set once, before the pool exists
        {
            let conn = Connection::open(&db_path)
                .map_err(|e| LearningError::Database(format!("Failed to open SQLite: {}", e)))?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
                .map_err(|e| LearningError::Database(format!("Failed to set PRAGMA: {}", e)))?;
            schema::init_schema(&conn)?;
        }

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(config.store_timeout())
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: config.store_timeout(),
            }))
            .build(manager)
            .map_err(|e| LearningError::Database(format!("Failed to build pool: {}", e)))?;

        debug!(pool_size = config.pool_size, "Database pool ready");

        Ok(Self {
            pool,
            store_timeout: config.store_timeout(),
        })
    }

    /// Check out a connection, waiting at most the configured store timeout
    pub fn conn(&self) -> Result<DbConn, LearningError> {
        self.pool.get_timeout(self.store_timeout).map_err(|e| {
            LearningError::Timeout(format!(
                "no database connection within {}ms: {}",
                self.store_timeout.as_millis(),
                e
            ))
        })
    }

    /// Run a closure with a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LearningError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LearningError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run a closure inside an IMMEDIATE transaction (write lock taken up front)
    pub fn with_write_tx<F, T>(&self, f: F) -> Result<T, LearningError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LearningError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Row counts for the health endpoint
    pub fn stats(&self) -> Result<DbStats, LearningError> {
        use diesel_schema::{certificates, content_items, courses, progress_records, scorm_packages};

        self.with_conn(|conn| {
            Ok(DbStats {
                course_count: courses::table.count().get_result::<i64>(conn)? as u64,
                item_count: content_items::table.count().get_result::<i64>(conn)? as u64,
                progress_count: progress_records::table.count().get_result::<i64>(conn)? as u64,
                certificate_count: certificates::table.count().get_result::<i64>(conn)? as u64,
                package_count: scorm_packages::table.count().get_result::<i64>(conn)? as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub course_count: u64,
    pub item_count: u64,
    pub progress_count: u64,
    pub certificate_count: u64,
    pub package_count: u64,
}

/// In-memory Diesel connection with the full schema, for repository tests
#[cfg(test)]
pub(crate) fn test_connection() -> SqliteConnection {
    let mut conn = <SqliteConnection as diesel::Connection>::establish(":memory:")
        .expect("Failed to create in-memory database");
    for (_, sql) in schema::ALL_SCHEMAS {
        conn.batch_execute(sql).expect("Failed to create schema");
    }
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_database() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(dir.path());
        let db = ProgressDb::open(&config).unwrap();

        assert!(config.database_path().exists());
        let stats = db.stats().unwrap();
        assert_eq!(stats.course_count, 0);
        assert_eq!(stats.certificate_count, 0);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(dir.path());
        drop(ProgressDb::open(&config).unwrap());
        let db = ProgressDb::open(&config).unwrap();
        assert!(db.stats().is_ok());
    }
}
