//! Request checks applied before anything reaches the task service

use axum::http::{HeaderMap, header::CONTENT_TYPE};
use thiserror::Error;

use super::error::ApiError;
use super::models::SubmitRequest;

const MAX_NAME_CHARS: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("missing Content-Type header")]
    MissingContentType,
    #[error("invalid Content-Type: {0}")]
    InvalidContentType(String),
    #[error("Content-Type must be application/json, got: {0}")]
    NotJson(String),
    #[error("kind is required")]
    MissingKind,
    #[error("name exceeds {MAX_NAME_CHARS} characters")]
    NameTooLong,
    #[error("payload must be an object")]
    PayloadNotObject,
}

impl From<RequestValidationError> for ApiError {
    fn from(err: RequestValidationError) -> Self {
        ApiError::InvalidPayload(err.to_string())
    }
}

/// Accept `application/json`, with or without parameters
pub fn require_json(headers: &HeaderMap) -> Result<mime::Mime, RequestValidationError> {
    let raw = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(RequestValidationError::MissingContentType)?;

    let media_type: mime::Mime = raw
        .parse()
        .map_err(|_| RequestValidationError::InvalidContentType(raw.to_string()))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(RequestValidationError::NotJson(media_type.essence_str().to_string()));
    }
    Ok(media_type)
}

pub fn check_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Shape checks; the payload itself is decoded by the service
pub fn validate_submission(request: &SubmitRequest) -> Result<(), RequestValidationError> {
    if request.kind.trim().is_empty() {
        return Err(RequestValidationError::MissingKind);
    }
    if request.name.chars().count() > MAX_NAME_CHARS {
        return Err(RequestValidationError::NameTooLong);
    }
    if !request.payload.is_object() {
        return Err(RequestValidationError::PayloadNotObject);
    }
    Ok(())
}
