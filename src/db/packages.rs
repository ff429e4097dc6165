//! SCORM package records
//!
//! A record points at an extracted package directory under the packages root.
//! The record is the commit point of an upload: files are written first, then
//! the row is inserted or repointed.

use diesel::prelude::*;

use super::diesel_schema::scorm_packages;
use super::models::{NewScormPackage, ScormPackageRecord};
use crate::error::LearningError;

pub fn get_package(
    conn: &mut SqliteConnection,
    content_item_id: &str,
) -> Result<Option<ScormPackageRecord>, LearningError> {
    scorm_packages::table
        .filter(scorm_packages::content_item_id.eq(content_item_id))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn insert_package(
    conn: &mut SqliteConnection,
    record: &NewScormPackage<'_>,
) -> Result<ScormPackageRecord, LearningError> {
    diesel::insert_into(scorm_packages::table)
        .values(record)
        .execute(conn)
        .map_err(|e| LearningError::Database(format!("Insert failed: {}", e)))?;

    get_package(conn, record.content_item_id)?
        .ok_or_else(|| LearningError::Internal("Failed to retrieve inserted package".into()))
}

/// Repoint an existing record at a new extraction; keeps the original id and upload time
pub fn replace_package(
    conn: &mut SqliteConnection,
    record: &NewScormPackage<'_>,
) -> Result<ScormPackageRecord, LearningError> {
    let updated = diesel::update(
        scorm_packages::table.filter(scorm_packages::content_item_id.eq(record.content_item_id)),
    )
    .set((
        scorm_packages::storage_locator.eq(record.storage_locator),
        scorm_packages::runtime_version.eq(record.runtime_version),
        scorm_packages::archive_hash.eq(record.archive_hash),
        scorm_packages::launch_href.eq(record.launch_href),
        scorm_packages::title.eq(record.title),
        scorm_packages::file_count.eq(record.file_count),
        scorm_packages::size_bytes.eq(record.size_bytes),
        scorm_packages::updated_at.eq(record.updated_at),
    ))
    .execute(conn)
    .map_err(|e| LearningError::Database(format!("Update failed: {}", e)))?;

    if updated == 0 {
        return Err(LearningError::NotFound(format!(
            "package for {}",
            record.content_item_id
        )));
    }

    get_package(conn, record.content_item_id)?
        .ok_or_else(|| LearningError::Internal("Failed to retrieve replaced package".into()))
}

/// Locators referenced by any record, for garbage collection
pub fn list_locators(conn: &mut SqliteConnection) -> Result<Vec<String>, LearningError> {
    scorm_packages::table
        .select(scorm_packages::storage_locator)
        .load(conn)
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    fn record<'a>(locator: &'a str, hash: &'a str) -> NewScormPackage<'a> {
        NewScormPackage {
            id: "p1",
            content_item_id: "s1",
            storage_locator: locator,
            runtime_version: "scorm_1.2",
            archive_hash: hash,
            launch_href: "index.html",
            title: Some("Lesson"),
            file_count: 2,
            size_bytes: 1024,
            uploaded_at: "2026-01-01T00:00:00Z",
            updated_at: "2026-01-01T00:00:00Z",
        }
    }

    #[test]
    fn test_insert_then_replace() {
        let mut conn = test_connection();
        let first = insert_package(&mut conn, &record("s1/aaa", "aaa")).unwrap();
        assert_eq!(first.storage_locator, "s1/aaa");

        let mut next = record("s1/bbb", "bbb");
        next.id = "ignored";
        next.updated_at = "2026-02-01T00:00:00Z";
        let replaced = replace_package(&mut conn, &next).unwrap();
        assert_eq!(replaced.id, "p1");
        assert_eq!(replaced.storage_locator, "s1/bbb");
        assert_eq!(replaced.uploaded_at, "2026-01-01T00:00:00Z");
        assert_eq!(list_locators(&mut conn).unwrap(), vec!["s1/bbb".to_string()]);
    }

    #[test]
    fn test_replace_missing_is_not_found() {
        let mut conn = test_connection();
        let err = replace_package(&mut conn, &record("s1/aaa", "aaa")).unwrap_err();
        assert!(matches!(err, LearningError::NotFound(_)));
    }
}
