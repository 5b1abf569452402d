//! Error envelope and API revisions.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::fmt;

use crate::errors::PipelineBuildError;

/// Stable request error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Content type is neither JSON nor multipart.
    UnsupportedContentType,
    /// The JSON body could not be parsed.
    JsonParse,
    /// A required field is absent.
    MissingField,
    /// A field has the wrong JSON type.
    WrongFieldType,
    /// A field is empty.
    EmptyField,
    /// The requested stage class or plugin does not exist.
    NotFound,
    /// A stage could not be created or the pipeline could not be built.
    PipelineBuild,
    /// The pipeline names a stage class nobody registered.
    UnknownStage,
    /// The session directory or a file in it could not be written.
    SessionIo,
    /// The multipart body could not be read.
    Multipart,
    /// The output archive could not be created.
    Archive,
    /// The request body did not arrive within the read timeout.
    RequestTimeout,
}

impl ErrorCode {
    /// Numeric code reported in `ErrorCode`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::UnsupportedContentType => -20,
            Self::JsonParse => -30,
            Self::MissingField => -40,
            Self::WrongFieldType => -50,
            Self::EmptyField => -60,
            Self::NotFound => -70,
            Self::PipelineBuild => -80,
            Self::UnknownStage => -85,
            Self::SessionIo => -90,
            Self::Multipart => -100,
            Self::Archive => -110,
            Self::RequestTimeout => -120,
        }
    }

    /// HTTP status used by the current revision.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::JsonParse
            | Self::MissingField
            | Self::WrongFieldType
            | Self::EmptyField
            | Self::Multipart => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PipelineBuild | Self::UnknownStage => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SessionIo | Self::Archive => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A failed request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ApiError {
    /// Stable cause.
    pub code: ErrorCode,
    /// Text for `ErrorMessage`.
    pub message: String,
}

impl ApiError {
    /// Creates an error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The required field `field` is absent.
    #[must_use]
    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("Missing required field '{field}'"))
    }

    /// The field `field` is not of type `expected`.
    #[must_use]
    pub fn wrong_type(field: &str, expected: &str) -> Self {
        Self::new(ErrorCode::WrongFieldType, format!("Field '{field}' must be {expected}"))
    }

    /// The field `field` is empty.
    #[must_use]
    pub fn empty_field(field: &str) -> Self {
        Self::new(ErrorCode::EmptyField, format!("Field '{field}' is empty"))
    }

    /// A session directory operation failed.
    #[must_use]
    pub fn session_io(context: &str, error: &std::io::Error) -> Self {
        Self::new(ErrorCode::SessionIo, format!("{context}: {error}"))
    }

    /// `{ErrorCode, ErrorMessage}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "ErrorCode": self.code.code(),
            "ErrorMessage": self.message,
        })
    }
}

impl From<PipelineBuildError> for ApiError {
    fn from(error: PipelineBuildError) -> Self {
        let code = match error {
            PipelineBuildError::UnknownStage { .. } => ErrorCode::UnknownStage,
            _ => ErrorCode::PipelineBuild,
        };
        Self::new(code, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ApiRevision::Current.error_response(&self)
    }
}

/// Wire revision of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiRevision {
    /// `/api/v1`: always HTTP 200, `Errors`/`Warnings`.
    Legacy,
    /// `/api/v2`: HTTP status per error, `PipelineErrors`/`PipelineWarnings`.
    Current,
}

impl ApiRevision {
    /// Path prefix of the revision.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Legacy => "/api/v1",
            Self::Current => "/api/v2",
        }
    }

    /// Response key of the error array.
    #[must_use]
    pub const fn errors_key(self) -> &'static str {
        match self {
            Self::Legacy => "Errors",
            Self::Current => "PipelineErrors",
        }
    }

    /// Response key of the warning array.
    #[must_use]
    pub const fn warnings_key(self) -> &'static str {
        match self {
            Self::Legacy => "Warnings",
            Self::Current => "PipelineWarnings",
        }
    }

    /// HTTP status for an error.
    #[must_use]
    pub const fn status_for(self, code: ErrorCode) -> StatusCode {
        match self {
            Self::Legacy => StatusCode::OK,
            Self::Current => code.status(),
        }
    }

    /// Envelope response for `error`.
    #[must_use]
    pub fn error_response(self, error: &ApiError) -> Response {
        (self.status_for(error.code), Json(error.to_json())).into_response()
    }

    /// Turns a handler result into a response.
    #[must_use]
    pub fn reply(self, result: Result<Value, ApiError>) -> Response {
        match result {
            Ok(body) => (StatusCode::OK, Json(body)).into_response(),
            Err(error) => {
                tracing::debug!(code = error.code.code(), revision = self.prefix(), "{}", error.message);
                self.error_response(&error)
            }
        }
    }
}
