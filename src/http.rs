//! HTTP API for progression, certification and the SCORM bridge
//!
//! ## Courses and progress
//! - `PUT /courses/{id}` - Seed or replace a course with its items and questions
//! - `GET /courses/{id}/outline?user_id=` - Items with access decisions
//! - `GET /courses/{id}/progress?user_id=` - Completed / total items
//! - `POST /progress` - Record a watched measure
//! - `GET /progress/{user}/{item}` - Stored progress record
//! - `GET /access/{user}/{item}` - Access decision for one item
//!
//! ## Quizzes and certificates
//! - `POST /quizzes/{id}/submit` - Score a submission
//! - `GET /quizzes/{id}/attempts?user_id=` - Attempt history
//! - `POST /courses/{id}/certify` - Issue the certificate if the course is complete
//! - `GET /courses/{id}/completion?user_id=` - Missing items and certificate
//! - `DELETE /courses/{id}/certificates/{user}` - Revoke a certificate
//! - `GET /certificates/verify/{token}` - Public verification lookup
//!
//! ## SCORM packages and runtime
//! - `PUT /packages/{item}?replace=bool` - Upload a package archive
//! - `GET /packages/{item}` - Current package record
//! - `GET /packages/{item}/files/{path}` - Serve a file from the current package
//! - `POST /packages/gc` - Remove unreferenced package directories
//! - `POST /scorm/sessions` - Open a runtime session (403 when gated)
//! - `POST /scorm/sessions/{id}/call` - Run one runtime API call
//! - `DELETE /scorm/sessions/{id}` - Close a session, flushing unsaved data
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8095/progress \
//!      -d '{"user_id":"u1","content_item_id":"intro-video","measure":312.5}'
//!
//! curl -X PUT --data-binary @package.zip \
//!      "http://localhost:8095/packages/safety-sco?replace=true"
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::db::courses::CreateCourseInput;
use crate::db::models::Certificate;
use crate::error::LearningError;
use crate::scorm::{OpenOutcome, SessionRegistry};
use crate::services::quiz_service::QuizAnswer;
use crate::services::response::{
    binary_response, bad_request, error_response, from_create_result, from_delete_bool_result,
    from_option, from_result, json_response, not_found, status_for,
};
use crate::services::Services;

type HttpResponse = Response<Full<Bytes>>;

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct UploadQuery {
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Deserialize)]
struct ProgressRequest {
    user_id: String,
    content_item_id: String,
    #[serde(default)]
    measure: Option<f64>,
    #[serde(default)]
    completed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct QuizSubmission {
    user_id: String,
    answers: Vec<QuizAnswer>,
}

#[derive(Debug, Deserialize)]
struct CertifyRequest {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct OpenSessionRequest {
    user_id: String,
    content_item_id: String,
    #[serde(default)]
    learner_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuntimeCall {
    method: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CertifyResponse {
    certified: bool,
    certificate: Option<Certificate>,
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    sessions: Arc<SessionRegistry>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        let sessions = Arc::new(SessionRegistry::new(services.clone()));
        Self {
            services,
            sessions,
            bind_addr,
        }
    }

    /// Live SCORM sessions served by this server
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn json_limit(&self) -> usize {
        usize::try_from(self.services.config.max_json_bytes).unwrap_or(usize::MAX)
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), LearningError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<HttpResponse, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        debug!(method = %method, path = %path, "Incoming request");

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let result = match (&method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.handle_health(),

            // Courses and progress
            (&Method::PUT, ["courses", id]) => self.handle_put_course(req, id).await,
            (&Method::GET, ["courses", id, "outline"]) => query::<UserQuery>(&req)
                .map(|q| from_result(self.services.unlock.course_outline(&q.user_id, id))),
            (&Method::GET, ["courses", id, "progress"]) => query::<UserQuery>(&req)
                .map(|q| from_result(self.services.progress.course_progress(&q.user_id, id))),
            (&Method::POST, ["progress"]) => self.handle_record_progress(req).await,
            (&Method::GET, ["progress", user, item]) => Ok(from_option(
                self.services.progress.get_progress(user, item),
                "No progress recorded",
            )),
            (&Method::GET, ["access", user, item]) => {
                Ok(from_result(self.services.unlock.can_access(user, item)))
            }

            // Quizzes and certificates
            (&Method::POST, ["quizzes", id, "submit"]) => self.handle_submit_quiz(req, id).await,
            (&Method::GET, ["quizzes", id, "attempts"]) => query::<UserQuery>(&req)
                .map(|q| from_result(self.services.quiz.attempt_history(&q.user_id, id))),
            (&Method::POST, ["courses", id, "certify"]) => self.handle_certify(req, id).await,
            (&Method::GET, ["courses", id, "completion"]) => query::<UserQuery>(&req)
                .map(|q| from_result(self.services.certification.completion_status(&q.user_id, id))),
            (&Method::DELETE, ["courses", id, "certificates", user]) => Ok(from_delete_bool_result(
                self.services.certification.reset(user, id),
                "Certificate not found",
            )),
            (&Method::GET, ["certificates", "verify", token]) => Ok(from_option(
                self.services.certification.verify(token),
                "Certificate not found",
            )),

            // Packages
            (&Method::POST, ["packages", "gc"]) => {
                Ok(from_result(self.services.packages.garbage_collect().await))
            }
            (&Method::PUT, ["packages", item]) => self.handle_upload_package(req, item).await,
            (&Method::GET, ["packages", item]) => Ok(from_option(
                self.services.packages.get(item),
                "No package uploaded",
            )),
            (&Method::GET, ["packages", item, "files", rest @ ..]) if !rest.is_empty() => {
                self.handle_package_file(item, &rest.join("/")).await
            }

            // SCORM runtime
            (&Method::POST, ["scorm", "sessions"]) => self.handle_open_session(req).await,
            (&Method::POST, ["scorm", "sessions", id, "call"]) => {
                self.handle_runtime_call(req, id).await
            }
            (&Method::DELETE, ["scorm", "sessions", id]) => Ok(from_delete_bool_result(
                Ok(self.sessions.close(id)),
                "Session not found",
            )),

            _ => Ok(not_found("Not Found")),
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                if status_for(&e).is_server_error() {
                    error!(method = %method, path = %path, error = %e, "Request error");
                } else {
                    debug!(method = %method, path = %path, error = %e, "Request rejected");
                }
                Ok(error_response(e))
            }
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn handle_health(&self) -> Result<HttpResponse, LearningError> {
        let stats = self.services.db.stats()?;
        let body = serde_json::json!({
            "status": "ok",
            "courses": stats.course_count,
            "items": stats.item_count,
            "progress_records": stats.progress_count,
            "certificates": stats.certificate_count,
            "packages": stats.package_count,
            "scorm_sessions": self.sessions.len(),
        });
        Ok(json_response(StatusCode::OK, &body))
    }

    /// PUT /courses/{id}
    async fn handle_put_course(
        &self,
        req: Request<Incoming>,
        course_id: &str,
    ) -> Result<HttpResponse, LearningError> {
        let input: CreateCourseInput = read_json(req, self.json_limit()).await?;
        if input.id != course_id {
            return Ok(bad_request("Course id in body does not match the path"));
        }
        Ok(from_result(self.services.upsert_course(&input)))
    }

    /// POST /progress
    ///
    /// Records a raw measure only. Quizzes complete through submission and
    /// SCORM items through the runtime bridge, so a `completed` flag here is
    /// refused.
    async fn handle_record_progress(
        &self,
        req: Request<Incoming>,
    ) -> Result<HttpResponse, LearningError> {
        let body: ProgressRequest = read_json(req, self.json_limit()).await?;
        if body.completed.is_some() {
            return Ok(bad_request(
                "completed is not accepted; submit the quiz or report through the SCORM runtime",
            ));
        }
        let Some(measure) = body.measure else {
            return Ok(bad_request("measure is required"));
        };
        Ok(from_result(self.services.progress.record_progress(
            &body.user_id,
            &body.content_item_id,
            measure,
        )))
    }

    /// POST /quizzes/{id}/submit
    async fn handle_submit_quiz(
        &self,
        req: Request<Incoming>,
        quiz_item_id: &str,
    ) -> Result<HttpResponse, LearningError> {
        let body: QuizSubmission = read_json(req, self.json_limit()).await?;
        Ok(from_result(self.services.quiz.submit(
            &body.user_id,
            quiz_item_id,
            &body.answers,
        )))
    }

    /// POST /courses/{id}/certify
    async fn handle_certify(
        &self,
        req: Request<Incoming>,
        course_id: &str,
    ) -> Result<HttpResponse, LearningError> {
        let body: CertifyRequest = read_json(req, self.json_limit()).await?;
        let certificate = self
            .services
            .certification
            .attempt_certify(&body.user_id, course_id)?;
        Ok(json_response(
            StatusCode::OK,
            &CertifyResponse {
                certified: certificate.is_some(),
                certificate,
            },
        ))
    }

    /// PUT /packages/{item}?replace=bool
    async fn handle_upload_package(
        &self,
        req: Request<Incoming>,
        content_item_id: &str,
    ) -> Result<HttpResponse, LearningError> {
        let params = match req.uri().query() {
            Some(q) => serde_urlencoded::from_str::<UploadQuery>(q)
                .map_err(|e| LearningError::InvalidInput(format!("Invalid query: {}", e)))?,
            None => UploadQuery::default(),
        };
        let limit = usize::try_from(self.services.config.max_package_bytes).unwrap_or(usize::MAX);
        let archive = read_body(req.into_body(), limit).await?;
        Ok(from_create_result(
            self.services
                .packages
                .upload(content_item_id, archive, params.replace)
                .await,
        ))
    }

    /// GET /packages/{item}/files/{path}
    async fn handle_package_file(
        &self,
        content_item_id: &str,
        relative_path: &str,
    ) -> Result<HttpResponse, LearningError> {
        let file = self
            .services
            .packages
            .read_file(content_item_id, relative_path)
            .await?;
        Ok(binary_response(file.content_type, file.body))
    }

    /// POST /scorm/sessions
    async fn handle_open_session(
        &self,
        req: Request<Incoming>,
    ) -> Result<HttpResponse, LearningError> {
        let body: OpenSessionRequest = read_json(req, self.json_limit()).await?;
        match self.sessions.open(
            &body.user_id,
            &body.content_item_id,
            body.learner_name.as_deref(),
        )? {
            OpenOutcome::Opened(info) => Ok(json_response(StatusCode::CREATED, &info)),
            OpenOutcome::Denied(decision) => Ok(json_response(StatusCode::FORBIDDEN, &decision)),
        }
    }

    /// POST /scorm/sessions/{id}/call
    async fn handle_runtime_call(
        &self,
        req: Request<Incoming>,
        session_id: &str,
    ) -> Result<HttpResponse, LearningError> {
        let call: RuntimeCall = read_json(req, self.json_limit()).await?;
        Ok(from_option(
            Ok(self.sessions.call(session_id, &call.method, &call.args)),
            "Session not found",
        ))
    }
}

// ============================================================================
// Request helpers
// ============================================================================

/// Collect a request body, refusing it once it passes `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, LearningError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                LearningError::PayloadTooLarge(format!("request body exceeds {} bytes", limit))
            } else {
                LearningError::InvalidInput(format!("Failed to read body: {}", e))
            }
        })?;
    Ok(body.to_bytes())
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>, limit: usize) -> Result<T, LearningError> {
    let body = read_body(req.into_body(), limit).await?;
    Ok(serde_json::from_slice(&body)?)
}

fn query<T: DeserializeOwned>(req: &Request<Incoming>) -> Result<T, LearningError> {
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| LearningError::InvalidInput(format!("Invalid query: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_body_over_limit_is_refused() {
        let body = Full::new(Bytes::from(vec![b'x'; 4096]));
        let refused = read_body(body, 1024).await;
        assert!(matches!(refused, Err(LearningError::PayloadTooLarge(_))));
        assert_eq!(
            status_for(&refused.unwrap_err()),
            StatusCode::PAYLOAD_TOO_LARGE
        );

        let body = Full::new(Bytes::from_static(b"{\"user_id\":\"u1\"}"));
        let accepted = read_body(body, 1024).await.unwrap();
        assert_eq!(accepted.len(), 16);
    }
}
