//! HTTP response building helpers
//!
//! Every handler answers through these so errors share one JSON shape:
//! `{"error": "...", "retryable": bool}`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;

use crate::error::LearningError;

/// Seconds a client should wait before retrying a retryable failure
const RETRY_AFTER_SECS: &str = "1";

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

pub fn created<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::CREATED, body)
}

pub fn no_content() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message, "retryable": false }),
    )
}

pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::BAD_REQUEST,
        &serde_json::json!({ "error": message, "retryable": false }),
    )
}

/// Raw file body with an explicit content type
pub fn binary_response(content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "private, max-age=300")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Status code for an error
pub fn status_for(error: &LearningError) -> StatusCode {
    match error {
        LearningError::NotFound(_) => StatusCode::NOT_FOUND,
        LearningError::InvalidInput(_) | LearningError::Json(_) => StatusCode::BAD_REQUEST,
        LearningError::InvalidArchive(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LearningError::Conflict(_) => StatusCode::CONFLICT,
        LearningError::Locked(_) => StatusCode::FORBIDDEN,
        LearningError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert a LearningError to an HTTP response
pub fn error_response(error: LearningError) -> Response<Full<Bytes>> {
    let status = status_for(&error);
    let retryable = error.is_retryable();
    let body = serde_json::json!({ "error": error.to_string(), "retryable": retryable });
    let mut response = json_response(status, &body);

    if retryable {
        response.headers_mut().insert(
            header::RETRY_AFTER,
            header::HeaderValue::from_static(RETRY_AFTER_SECS),
        );
    }
    response
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, LearningError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

/// Wrap an optional service result; None becomes 404
pub fn from_option<T: Serialize>(
    result: Result<Option<T>, LearningError>,
    not_found_msg: &str,
) -> Response<Full<Bytes>> {
    match result {
        Ok(Some(value)) => ok(&value),
        Ok(None) => not_found(not_found_msg),
        Err(e) => error_response(e),
    }
}

pub fn from_create_result<T: Serialize>(result: Result<T, LearningError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => created(&value),
        Err(e) => error_response(e),
    }
}

/// 204 if something was deleted, 404 otherwise
pub fn from_delete_bool_result(
    result: Result<bool, LearningError>,
    not_found_msg: &str,
) -> Response<Full<Bytes>> {
    match result {
        Ok(true) => no_content(),
        Ok(false) => not_found(not_found_msg),
        Err(e) => error_response(e),
    }
}
