//! Endpoint handlers.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::archive::{archive_name, archive_session};
use super::envelope::{ApiError, ApiRevision, ErrorCode};
use super::request::{read_body_within, RequestBody};
use super::sandbox::{materialize_uploads, rewrite_paths, sanitize, session_link};
use super::session::Session;
use super::static_files::StaticFiles;
use super::AppState;
use crate::messages::{FileLogListener, JsonResponseListener, MessageBus, Severity, TracingListener};
use crate::pipeline::PipelineReader;
use crate::registry::StageRegistry;

/// Request field holding the pipeline description.
pub const PIPELINE_FIELD: &str = "Pipeline";
/// Request and response field holding the session id.
pub const SESSION_ID_FIELD: &str = "SessionID";

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

pub async fn service_version(Extension(revision): Extension<ApiRevision>) -> Response {
    revision.reply(Ok(json!({ "Version": env!("CARGO_PKG_VERSION") })))
}

pub async fn available_filters(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
) -> Response {
    let filters = state.registry.to_descriptor_array();
    revision.reply(Ok(json!({ "Filters": filters })))
}

pub async fn num_filters(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
) -> Response {
    revision.reply(Ok(json!({ "NumFilters": state.registry.len() })))
}

pub async fn names_of_filters(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
) -> Response {
    let names: Vec<String> = state
        .registry
        .to_descriptor_array()
        .into_iter()
        .map(|d| d.class_name)
        .collect();
    revision.reply(Ok(json!({ "Filters": names })))
}

pub async fn loaded_plugins(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
) -> Response {
    revision.reply(Ok(json!({ "Plugins": state.loader.loaded_modules() })))
}

pub async fn plugin_info(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
    request: Request,
) -> Response {
    let result = async {
        let body = read_body_within(request, state.config.listener.read_timeout()).await?;
        let name = body.required_str("PluginName")?;
        let info = state
            .loader
            .plugin_info(name)
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("No plugin named '{name}' is loaded")))?;
        Ok::<_, ApiError>(serde_json::to_value(info).unwrap_or_default())
    }
    .await;
    revision.reply(result)
}

pub async fn list_filter_parameters(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
    request: Request,
) -> Response {
    let result = async {
        let body = read_body_within(request, state.config.listener.read_timeout()).await?;
        let class_name = body.required_str("ClassName")?;
        let factory = state.registry.lookup_by_name(class_name).ok_or_else(|| {
            ApiError::new(ErrorCode::NotFound, format!("Stage class '{class_name}' is not registered"))
        })?;
        let stage = factory.create().map_err(|e| {
            ApiError::new(
                ErrorCode::PipelineBuild,
                format!("Stage class '{class_name}' could not be created: {e}"),
            )
        })?;
        let parameters: Vec<Value> = stage.parameters().iter().map(|p| p.to_descriptor_json()).collect();
        Ok::<_, ApiError>(json!({
            "ClassName": class_name,
            "FilterParameters": parameters,
            "ErrorCode": 0,
            "ErrorMessage": "",
        }))
    }
    .await;
    revision.reply(result)
}

// ---------------------------------------------------------------------------
// Pipeline runs
// ---------------------------------------------------------------------------

/// What a pipeline request does after building the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Validation only.
    Preflight,
    /// Validation, then execution.
    Execute,
}

/// Everything a run needs, detached from the request.
#[derive(Debug)]
struct RunRequest {
    pipeline: Value,
    uploads: Vec<(String, Vec<u8>)>,
    error_log: bool,
    warning_log: bool,
    status_log: bool,
    archive: bool,
}

impl RunRequest {
    fn from_body(body: RequestBody) -> Result<Self, ApiError> {
        let pipeline = body.required_object(PIPELINE_FIELD)?;
        Ok(Self {
            pipeline,
            error_log: body.flag("ErrorLog"),
            warning_log: body.flag("WarningLog"),
            status_log: body.flag("StatusLog"),
            archive: body.flag("ArchiveOutputs"),
            uploads: body.uploads,
        })
    }
}

pub async fn execute_pipeline(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
    request: Request,
) -> Response {
    run_pipeline(state, revision, RunMode::Execute, request).await
}

pub async fn preflight_pipeline(
    State(state): State<Arc<AppState>>,
    Extension(revision): Extension<ApiRevision>,
    request: Request,
) -> Response {
    run_pipeline(state, revision, RunMode::Preflight, request).await
}

#[instrument(skip_all, fields(mode = ?mode, revision = revision.prefix()))]
async fn run_pipeline(state: Arc<AppState>, revision: ApiRevision, mode: RunMode, request: Request) -> Response {
    let cookie_name = state.config.sessions.cookie_name.clone();
    let cookie_session = session_cookie(request.headers(), &cookie_name);

    let result = async {
        let body = read_body_within(request, state.config.listener.read_timeout()).await?;
        let requested = body.optional_str(SESSION_ID_FIELD).map(str::to_string).or(cookie_session);
        let run = RunRequest::from_body(body)?;
        let lease = state
            .sessions
            .acquire(requested.as_deref())
            .map_err(|e| ApiError::session_io("Creating session directory", &e))?;
        let session = lease.session().clone();

        // the lease is released when the run ends, not when the client goes away
        let registry = Arc::clone(&state.registry);
        let response = tokio::task::spawn_blocking(move || run_blocking(&registry, &lease, run, mode, revision))
            .await
            .map_err(|e| ApiError::new(ErrorCode::SessionIo, format!("Pipeline run aborted: {e}")))??;
        Ok::<_, ApiError>((session, response))
    }
    .await;

    match result {
        Ok((session, body)) => {
            let mut response = revision.reply(Ok(body));
            let cookie = format!("{cookie_name}={}; Path=/; HttpOnly; SameSite=Lax", session.id);
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            response
        }
        Err(error) => revision.reply(Err(error)),
    }
}

fn run_blocking(
    registry: &StageRegistry,
    session: &Session,
    run: RunRequest,
    mode: RunMode,
    revision: ApiRevision,
) -> Result<Value, ApiError> {
    materialize_uploads(session, &run.uploads)?;

    let bus = Arc::new(MessageBus::new());
    let collected = Arc::new(JsonResponseListener::new());
    bus.subscribe(collected.clone());
    bus.subscribe(Arc::new(TracingListener::debug()));

    let mut pipeline = PipelineReader::new(registry).with_bus(bus.clone()).read(&run.pipeline)?;
    let mut links = rewrite_paths(&mut pipeline, session)?;

    let log_flags = [
        (run.error_log, "err", Severity::Error),
        (run.warning_log, "warning", Severity::Warning),
        (run.status_log, "status", Severity::Status),
    ];
    for (enabled, suffix, severity) in log_flags {
        if !enabled {
            continue;
        }
        let file_name = format!("{}-{suffix}.log", pipeline.name());
        let relative = sanitize(&file_name).unwrap_or_else(|| PathBuf::from(format!("pipeline-{suffix}.log")));
        let path = session.dir.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::session_io("Creating log directory", &e))?;
        }
        std::fs::File::create(&path).map_err(|e| ApiError::session_io("Creating log file", &e))?;
        bus.subscribe(Arc::new(FileLogListener::new(path, severity)));
        links.push(session_link(&session.id, &relative));
    }

    info!(
        session = %session.id,
        pipeline = pipeline.name(),
        stages = pipeline.len(),
        "Running pipeline"
    );
    let completed = match mode {
        RunMode::Preflight => pipeline.preflight() >= 0,
        RunMode::Execute => pipeline.execute().is_completed(),
    };

    if run.archive && mode == RunMode::Execute {
        let name = archive_name(&session.id);
        archive_session(&session.dir, &session.id)
            .map_err(|e| ApiError::new(ErrorCode::Archive, format!("Failed to archive session outputs: {e}")))?;
        links.push(session_link(&session.id, std::path::Path::new(&name)));
    }
    if !completed {
        warn!(session = %session.id, pipeline = pipeline.name(), "Pipeline did not complete");
    }

    let mut body = Map::new();
    body.insert(SESSION_ID_FIELD.to_string(), json!(session.id));
    body.insert("Completed".to_string(), json!(completed));
    body.insert(revision.errors_key().to_string(), collected.errors_json());
    body.insert(revision.warnings_key().to_string(), collected.warnings_json());
    body.insert("StatusMessages".to_string(), collected.status_json());
    body.insert("OutputLinks".to_string(), json!(links));
    Ok(Value::Object(body))
}

fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

// ---------------------------------------------------------------------------
// Static files
// ---------------------------------------------------------------------------

/// Serves session downloads and the document root.
///
/// `/<session>/<path>` is answered from the session directory while the
/// session is live; everything else comes from the cached document root.
pub async fn static_fallback(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    let trimmed = path.trim_start_matches('/');
    if let Some((first, rest)) = trimmed.split_once('/') {
        if let Some(dir) = state.sessions.directory(first) {
            if !rest.is_empty() {
                let rest = rest.to_string();
                let file = tokio::task::spawn_blocking(move || StaticFiles::get_uncached(&dir, &rest))
                    .await
                    .ok()
                    .flatten();
                if let Some(file) = file {
                    return file.into_response_for(&headers);
                }
            }
        }
    }

    let lookup = Arc::clone(&state);
    let file = tokio::task::spawn_blocking(move || lookup.static_files.get(&path))
        .await
        .ok()
        .flatten();
    match file {
        Some(file) => file.into_response_for(&headers),
        None => (axum::http::StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; sessionid=abc; b=2"));
        assert_eq!(session_cookie(&headers, "sessionid").as_deref(), Some("abc"));
        assert_eq!(session_cookie(&headers, "other"), None);
    }
}
