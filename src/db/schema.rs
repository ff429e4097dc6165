//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::LearningError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), LearningError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LearningError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| LearningError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LearningError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| LearningError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| LearningError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), LearningError> {
    for (name, sql) in ALL_SCHEMAS {
        conn.execute_batch(sql)
            .map_err(|e| LearningError::Database(format!("Failed to create {} tables: {}", name, e)))?;
    }
    Ok(())
}

/// Every schema block in creation order. Also used by in-memory test databases.
pub const ALL_SCHEMAS: [(&str, &str); 4] = [
    ("course", COURSE_SCHEMA),
    ("progress", PROGRESS_SCHEMA),
    ("certificate", CERTIFICATE_SCHEMA),
    ("package", PACKAGE_SCHEMA),
];

/// Course structure, authored externally and read-only to the core
const COURSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    -- NULL means "use the configured default"
    pass_threshold INTEGER,
    -- 1 = items inside a module unlock in position order
    sequential BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS content_items (
    id TEXT PRIMARY KEY NOT NULL,
    course_id TEXT NOT NULL,
    module_id TEXT NOT NULL DEFAULT 'main',
    position INTEGER NOT NULL DEFAULT 0,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    threshold_kind TEXT NOT NULL,
    threshold_value DOUBLE,
    duration_seconds DOUBLE,
    next_item_id TEXT,
    is_final_exam BOOLEAN NOT NULL DEFAULT 0,
    metadata_json TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_content_items_order
    ON content_items(course_id, module_id, position);
CREATE INDEX IF NOT EXISTS idx_content_items_next ON content_items(next_item_id);

CREATE TABLE IF NOT EXISTS quiz_questions (
    id TEXT PRIMARY KEY NOT NULL,
    quiz_item_id TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    question_kind TEXT NOT NULL DEFAULT 'single',
    prompt TEXT NOT NULL DEFAULT '',
    -- JSON array of correct option ids
    correct_answers_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quiz_questions_quiz ON quiz_questions(quiz_item_id, position);
"#;

/// Learner progress and quiz history
const PROGRESS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS progress_records (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    content_item_id TEXT NOT NULL,
    elapsed_measure DOUBLE NOT NULL DEFAULT 0,
    completed BOOLEAN NOT NULL DEFAULT 0,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (user_id, content_item_id)
);

CREATE TABLE IF NOT EXISTS quiz_attempts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    quiz_item_id TEXT NOT NULL,
    score INTEGER NOT NULL,
    passed BOOLEAN NOT NULL,
    pass_threshold INTEGER NOT NULL,
    answers_json TEXT NOT NULL,
    submitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quiz_attempts_learner ON quiz_attempts(user_id, quiz_item_id);
"#;

/// Certificates: the UNIQUE pair is the only de-duplication mechanism for issuance
const CERTIFICATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS certificates (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    verification_token TEXT NOT NULL UNIQUE,
    serial TEXT NOT NULL,
    issued_at TEXT NOT NULL,
    UNIQUE (user_id, course_id)
);
"#;

/// SCORM packages and per-learner runtime state
const PACKAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scorm_packages (
    id TEXT PRIMARY KEY NOT NULL,
    content_item_id TEXT NOT NULL UNIQUE,
    storage_locator TEXT NOT NULL,
    runtime_version TEXT NOT NULL,
    archive_hash TEXT NOT NULL,
    launch_href TEXT NOT NULL,
    title TEXT,
    file_count INTEGER NOT NULL,
    size_bytes BIGINT NOT NULL,
    uploaded_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scorm_runtime_state (
    user_id TEXT NOT NULL,
    content_item_id TEXT NOT NULL,
    lesson_status TEXT NOT NULL DEFAULT 'not attempted',
    lesson_location TEXT NOT NULL DEFAULT '',
    suspend_data TEXT NOT NULL DEFAULT '',
    total_seconds DOUBLE NOT NULL DEFAULT 0,
    session_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (user_id, content_item_id)
);
"#;
