//! Certification Engine - mints at most one certificate per (user, course)
//!
//! Concurrent callers for the same pair all race to the same INSERT. The
//! UNIQUE (user_id, course_id) constraint lets exactly one win; every other
//! caller reads back the winner's row and returns it.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use diesel::SqliteConnection;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EventBus, LearningEvent};
use super::unlock_service::completion_map;
use crate::config::Config;
use crate::db::certificates::{self, InsertOutcome};
use crate::db::models::{current_timestamp, Certificate, ContentItem, NewCertificate};
use crate::db::{courses, progress, ProgressDb};
use crate::error::LearningError;

/// Token collisions are astronomically unlikely; a few retries cover them
const MAX_MINT_ATTEMPTS: usize = 3;

/// Course completion for one learner
#[derive(Debug, Clone, Serialize)]
pub struct CompletionStatus {
    pub course_id: String,
    pub total: usize,
    pub completed: usize,
    pub missing: Vec<String>,
    pub certifiable: bool,
    pub certificate: Option<Certificate>,
}

/// Public view of a certificate for verification pages
#[derive(Debug, Clone, Serialize)]
pub struct CertificateVerification {
    pub serial: String,
    pub user_id: String,
    pub course_id: String,
    pub course_title: Option<String>,
    pub issued_at: String,
}

pub struct CertificationService {
    db: Arc<ProgressDb>,
    config: Arc<Config>,
    events: Arc<EventBus>,
}

impl CertificationService {
    pub fn new(db: Arc<ProgressDb>, config: Arc<Config>, events: Arc<EventBus>) -> Self {
        Self { db, config, events }
    }

    /// Issue the certificate if every item of the course is completed.
    ///
    /// Returns the existing certificate when one was already issued, and
    /// `None` (with no side effects) when the course is not yet complete.
    pub fn attempt_certify(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Option<Certificate>, LearningError> {
        self.db.with_conn(|conn| {
            courses::get_course(conn, course_id)?
                .ok_or_else(|| LearningError::NotFound(format!("course {}", course_id)))?;

            let items = courses::list_items_for_course(conn, course_id)?;
            if items.is_empty() || !missing_items(conn, user_id, &items)?.is_empty() {
                debug!(user_id = %user_id, course_id = %course_id, "Course not yet certifiable");
                return Ok(None);
            }

            if let Some(existing) = certificates::get_certificate(conn, user_id, course_id)? {
                return Ok(Some(existing));
            }

            self.mint(conn, user_id, course_id).map(Some)
        })
    }

    /// Certification check run after a completion transition; failures are logged
    pub fn certify_if_complete(&self, user_id: &str, course_id: &str) {
        match self.attempt_certify(user_id, course_id) {
            Ok(Some(cert)) => {
                debug!(user_id = %user_id, course_id = %course_id, certificate_id = %cert.id, "Certification check found certificate");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, course_id = %course_id, error = %e, "Certification check failed");
            }
        }
    }

    fn mint(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        course_id: &str,
    ) -> Result<Certificate, LearningError> {
        for _ in 0..MAX_MINT_ATTEMPTS {
            let id = Uuid::new_v4().to_string();
            let token = generate_token(self.config.certificate_token_bytes);
            let serial = serial_for(course_id, &token);
            let issued_at = current_timestamp();

            let outcome = certificates::try_insert(
                conn,
                &NewCertificate {
                    id: &id,
                    user_id,
                    course_id,
                    verification_token: &token,
                    serial: &serial,
                    issued_at: &issued_at,
                },
            )?;

            match outcome {
                InsertOutcome::Inserted => {
                    info!(user_id = %user_id, course_id = %course_id, serial = %serial, "Certificate issued");
                    self.events.emit(LearningEvent::CertificateIssued {
                        user_id: user_id.to_string(),
                        course_id: course_id.to_string(),
                        certificate_id: id.clone(),
                    });
                    return certificates::get_certificate(conn, user_id, course_id)?.ok_or_else(
                        || LearningError::Internal("Failed to retrieve issued certificate".into()),
                    );
                }
                InsertOutcome::Duplicate => {
                    // Lost the race for this pair: the winner's row is authoritative
                    if let Some(existing) = certificates::get_certificate(conn, user_id, course_id)? {
                        debug!(user_id = %user_id, course_id = %course_id, "Certificate already issued concurrently");
                        return Ok(existing);
                    }
                    warn!(course_id = %course_id, "Verification token collision, regenerating");
                }
            }
        }

        Err(LearningError::Internal(
            "could not generate a unique verification token".into(),
        ))
    }

    /// Completed and missing items for a learner, plus any issued certificate
    pub fn completion_status(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<CompletionStatus, LearningError> {
        self.db.with_conn(|conn| {
            courses::get_course(conn, course_id)?
                .ok_or_else(|| LearningError::NotFound(format!("course {}", course_id)))?;
            let items = courses::list_items_for_course(conn, course_id)?;
            let missing = missing_items(conn, user_id, &items)?;
            let certificate = certificates::get_certificate(conn, user_id, course_id)?;

            Ok(CompletionStatus {
                course_id: course_id.to_string(),
                total: items.len(),
                completed: items.len() - missing.len(),
                certifiable: !items.is_empty() && missing.is_empty(),
                missing,
                certificate,
            })
        })
    }

    /// Read-only lookup by verification token
    pub fn verify(&self, token: &str) -> Result<Option<CertificateVerification>, LearningError> {
        self.db.with_conn(|conn| {
            let Some(cert) = certificates::get_by_token(conn, token)? else {
                return Ok(None);
            };
            let course_title = courses::get_course(conn, &cert.course_id)?.map(|c| c.title);
            Ok(Some(CertificateVerification {
                serial: cert.serial,
                user_id: cert.user_id,
                course_id: cert.course_id,
                course_title,
                issued_at: cert.issued_at,
            }))
        })
    }

    /// Administrative reset: delete the certificate so it can be re-issued
    pub fn reset(&self, user_id: &str, course_id: &str) -> Result<bool, LearningError> {
        let deleted = self
            .db
            .with_write_tx(|conn| certificates::delete_certificate(conn, user_id, course_id))?;

        if deleted {
            info!(user_id = %user_id, course_id = %course_id, "Certificate revoked");
            self.events.emit(LearningEvent::CertificateRevoked {
                user_id: user_id.to_string(),
                course_id: course_id.to_string(),
            });
        }
        Ok(deleted)
    }
}

/// Item ids without a completed progress record, in course order
fn missing_items(
    conn: &mut SqliteConnection,
    user_id: &str,
    items: &[ContentItem],
) -> Result<Vec<String>, LearningError> {
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let records = progress::get_progress_for_items(conn, user_id, &ids)?;
    let completed = completion_map(&records);

    Ok(ids
        .into_iter()
        .filter(|id| !completed.get(id.as_str()).copied().unwrap_or(false))
        .collect())
}

/// Unguessable URL-safe token from the OS random source
pub fn generate_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len.max(16)];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Human-readable serial, e.g. `LAMAD-RUST10-3FA2C9B1`
pub fn serial_for(course_id: &str, token: &str) -> String {
    let prefix: String = course_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    let prefix = if prefix.is_empty() { "COURSE".to_string() } else { prefix };
    let digest = Sha256::digest(token.as_bytes());
    format!("LAMAD-{}-{}", prefix, hex::encode_upper(&digest[..4]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::courses::fixtures::{course, item};
    use crate::db::models::content_kinds;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Arc<ProgressDb>, CertificationService) {
        let config = Arc::new(Config::with_storage_dir(dir.path()));
        let db = Arc::new(ProgressDb::open(&config).unwrap());
        let service = CertificationService::new(db.clone(), config, Arc::new(EventBus::new()));
        (db, service)
    }

    fn seed(db: &ProgressDb) {
        let input = course("c1", vec![item("a", content_kinds::VIDEO, 0), item("b", content_kinds::VIDEO, 1)]);
        db.with_conn(|conn| courses::upsert_course(conn, &input)).unwrap();
    }

    fn complete(db: &ProgressDb, item: &str) {
        db.with_conn(|conn| progress::upsert_progress(conn, "u1", item, 100.0, true))
            .unwrap();
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token(32);
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token(32));
    }

    #[test]
    fn test_serial_format() {
        let serial = serial_for("rust-101", "token");
        assert!(serial.starts_with("LAMAD-RUST10-"));
        assert_eq!(serial.len(), "LAMAD-RUST10-".len() + 8);
        assert_eq!(serial, serial_for("rust-101", "token"));
        assert!(serial_for("--", "t").starts_with("LAMAD-COURSE-"));
    }

    #[test]
    fn test_incomplete_course_returns_none_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let (db, service) = setup(&dir);
        seed(&db);
        complete(&db, "a");

        assert!(service.attempt_certify("u1", "c1").unwrap().is_none());
        let status = service.completion_status("u1", "c1").unwrap();
        assert_eq!(status.missing, vec!["b".to_string()]);
        assert!(status.certificate.is_none());
        assert_eq!(db.stats().unwrap().certificate_count, 0);
    }

    #[test]
    fn test_certify_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (db, service) = setup(&dir);
        seed(&db);
        complete(&db, "a");
        complete(&db, "b");

        let first = service.attempt_certify("u1", "c1").unwrap().unwrap();
        let second = service.attempt_certify("u1", "c1").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(db.stats().unwrap().certificate_count, 1);

        let verified = service.verify(&first.verification_token).unwrap().unwrap();
        assert_eq!(verified.serial, first.serial);
        assert_eq!(verified.course_title.as_deref(), Some("Course c1"));
        assert!(service.verify("not-a-token").unwrap().is_none());
    }

    #[test]
    fn test_empty_course_is_never_certifiable() {
        let dir = TempDir::new().unwrap();
        let (db, service) = setup(&dir);
        db.with_conn(|conn| courses::upsert_course(conn, &course("empty", vec![])))
            .unwrap();

        assert!(service.attempt_certify("u1", "empty").unwrap().is_none());
        assert!(!service.completion_status("u1", "empty").unwrap().certifiable);
    }

    #[test]
    fn test_reset_allows_reissue_with_new_token() {
        let dir = TempDir::new().unwrap();
        let (db, service) = setup(&dir);
        seed(&db);
        complete(&db, "a");
        complete(&db, "b");

        let first = service.attempt_certify("u1", "c1").unwrap().unwrap();
        assert!(service.reset("u1", "c1").unwrap());
        assert!(!service.reset("u1", "c1").unwrap());

        let reissued = service.attempt_certify("u1", "c1").unwrap().unwrap();
        assert_ne!(first.verification_token, reissued.verification_token);
        assert!(service.verify(&first.verification_token).unwrap().is_none());
    }

    #[test]
    fn test_unknown_course_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (_db, service) = setup(&dir);
        assert!(matches!(
            service.attempt_certify("u1", "nope"),
            Err(LearningError::NotFound(_))
        ));
    }
}
