//! Request body decoding shared by the handlers.

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};
use std::time::Duration;

use super::envelope::{ApiError, ErrorCode};

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 512 * 1024 * 1024;

/// A decoded JSON or multipart request.
#[derive(Debug, Default)]
pub struct RequestBody {
    /// JSON members, or the text parts of a multipart form.
    pub fields: Map<String, Value>,
    /// File parts, keyed by the part name.
    pub uploads: Vec<(String, Vec<u8>)>,
}

impl RequestBody {
    /// A required non-empty string field.
    pub fn required_str(&self, key: &str) -> Result<&str, ApiError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Err(ApiError::missing_field(key)),
            Some(Value::String(s)) if s.is_empty() => Err(ApiError::empty_field(key)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ApiError::wrong_type(key, "a string")),
        }
    }

    /// A required JSON object field; a string holding JSON text is parsed.
    pub fn required_object(&self, key: &str) -> Result<Value, ApiError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Err(ApiError::missing_field(key)),
            Some(value @ Value::Object(_)) => Ok(value.clone()),
            Some(Value::String(text)) if text.trim().is_empty() => Err(ApiError::empty_field(key)),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(value @ Value::Object(_)) => Ok(value),
                Ok(_) => Err(ApiError::wrong_type(key, "an object")),
                Err(e) => Err(ApiError::new(ErrorCode::JsonParse, format!("'{key}' is not valid JSON: {e}"))),
            },
            Some(_) => Err(ApiError::wrong_type(key, "an object")),
        }
    }

    /// An optional flag; accepts booleans and the strings `true`/`1`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    /// An optional string field.
    #[must_use]
    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Multipart,
}

fn body_kind(headers: &HeaderMap) -> Option<BodyKind> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match mime.as_str() {
        "application/json" => Some(BodyKind::Json),
        "multipart/form-data" => Some(BodyKind::Multipart),
        _ => None,
    }
}

/// Decodes a JSON object body or a multipart form.
pub async fn read_body(request: Request) -> Result<RequestBody, ApiError> {
    match body_kind(request.headers()) {
        Some(BodyKind::Json) => read_json(request).await,
        Some(BodyKind::Multipart) => read_multipart(request).await,
        None => Err(ApiError::new(
            ErrorCode::UnsupportedContentType,
            "Content-Type must be application/json or multipart/form-data",
        )),
    }
}

/// [`read_body`] bounded by `timeout`.
pub async fn read_body_within(request: Request, timeout: Duration) -> Result<RequestBody, ApiError> {
    tokio::time::timeout(timeout, read_body(request)).await.map_err(|_| {
        ApiError::new(
            ErrorCode::RequestTimeout,
            format!("Request body not received within {} ms", timeout.as_millis()),
        )
    })?
}

async fn read_json(request: Request) -> Result<RequestBody, ApiError> {
    let bytes = axum::body::to_bytes(request.into_body(), BODY_LIMIT)
        .await
        .map_err(|e| ApiError::new(ErrorCode::JsonParse, format!("Failed to read request body: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::new(ErrorCode::JsonParse, format!("JSON request parsing error: {e}")))?;
    match value {
        Value::Object(fields) => Ok(RequestBody {
            fields,
            uploads: Vec::new(),
        }),
        _ => Err(ApiError::new(ErrorCode::WrongFieldType, "Request body must be a JSON object")),
    }
}

async fn read_multipart(request: Request) -> Result<RequestBody, ApiError> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        ApiError::new(ErrorCode::Multipart, format!("Failed to read multipart body: {e}"))
    };
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::new(ErrorCode::Multipart, format!("Invalid multipart body: {e}")))?;

    let mut body = RequestBody::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            let data = field.bytes().await.map_err(multipart_error)?;
            body.uploads.push((name, data.to_vec()));
        } else {
            let text = field.text().await.map_err(multipart_error)?;
            body.fields.insert(name, Value::String(text));
        }
    }
    Ok(body)
}
