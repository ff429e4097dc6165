//! Certificate operations
//!
//! Issuance relies on the UNIQUE (user_id, course_id) constraint alone:
//! the insert either lands or reports that a certificate already exists.

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use super::diesel_schema::certificates;
use super::models::{Certificate, NewCertificate};
use crate::error::LearningError;

/// Outcome of an insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A unique constraint rejected the row
    Duplicate,
}

pub fn get_certificate(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Certificate>, LearningError> {
    certificates::table
        .filter(certificates::user_id.eq(user_id))
        .filter(certificates::course_id.eq(course_id))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn get_by_token(
    conn: &mut SqliteConnection,
    token: &str,
) -> Result<Option<Certificate>, LearningError> {
    certificates::table
        .filter(certificates::verification_token.eq(token))
        .first(conn)
        .optional()
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

pub fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<Certificate>, LearningError> {
    certificates::table
        .filter(certificates::user_id.eq(user_id))
        .order(certificates::issued_at.asc())
        .load(conn)
        .map_err(|e| LearningError::Database(format!("Query failed: {}", e)))
}

/// Insert a certificate, reporting unique violations instead of failing
pub fn try_insert(
    conn: &mut SqliteConnection,
    cert: &NewCertificate<'_>,
) -> Result<InsertOutcome, LearningError> {
    match diesel::insert_into(certificates::table)
        .values(cert)
        .execute(conn)
    {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Ok(InsertOutcome::Duplicate)
        }
        Err(e) => Err(LearningError::Database(format!("Insert failed: {}", e))),
    }
}

/// Administrative removal; returns whether a row existed
pub fn delete_certificate(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: &str,
) -> Result<bool, LearningError> {
    let deleted = diesel::delete(
        certificates::table
            .filter(certificates::user_id.eq(user_id))
            .filter(certificates::course_id.eq(course_id)),
    )
    .execute(conn)
    .map_err(|e| LearningError::Database(format!("Delete failed: {}", e)))?;
    Ok(deleted > 0)
}
