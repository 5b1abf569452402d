//! HTTP execution service.
//!
//! Every operation is mounted twice: under `/api/v1` with the legacy wire
//! format and under `/api/v2` with the current one. Paths matching neither
//! fall through to session downloads and the static document root.

mod archive;
mod envelope;
mod handlers;
mod request;
mod sandbox;
mod session;
mod static_files;

#[cfg(test)]
mod api_tests;

pub use archive::{archive_name, archive_session};
pub use envelope::{ApiError, ApiRevision, ErrorCode};
pub use handlers::{RunMode, PIPELINE_FIELD, SESSION_ID_FIELD};
pub use request::{read_body, read_body_within, RequestBody, BODY_LIMIT};
pub use sandbox::{materialize_uploads, rewrite_paths, sanitize, session_link};
pub use session::{Session, SessionLease, SessionStore};
pub use static_files::{content_type, StaticFile, StaticFiles};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::fmt;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::plugins::ModuleLoader;
use crate::registry::StageRegistry;

/// State shared by all handlers.
pub struct AppState {
    /// Stage classes available to pipelines.
    pub registry: Arc<StageRegistry>,
    /// Modules that supplied the stage classes.
    pub loader: Arc<ModuleLoader>,
    /// Request sessions.
    pub sessions: Arc<SessionStore>,
    /// Document root.
    pub static_files: StaticFiles,
    /// Settings the service was started with.
    pub config: ServiceConfig,
}

impl AppState {
    /// Creates the state around an already populated loader.
    #[must_use]
    pub fn new(config: ServiceConfig, loader: Arc<ModuleLoader>) -> Self {
        let sessions = Arc::new(SessionStore::new(
            config.sessions.root.clone(),
            config.sessions.expiration(),
        ));
        Self {
            registry: Arc::clone(loader.registry()),
            loader,
            sessions,
            static_files: StaticFiles::new(&config.docroot),
            config,
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("stages", &self.registry.len())
            .field("sessions", &self.sessions.len())
            .field("static_files", &self.static_files)
            .finish_non_exhaustive()
    }
}

fn api_router(revision: ApiRevision) -> Router<Arc<AppState>> {
    Router::new()
        .route("/ExecutePipeline", post(handlers::execute_pipeline))
        .route("/PreflightPipeline", post(handlers::preflight_pipeline))
        .route("/ListFilterParameters", post(handlers::list_filter_parameters))
        .route("/PluginInfo", post(handlers::plugin_info))
        .route(
            "/AvailableFilters",
            get(handlers::available_filters).post(handlers::available_filters),
        )
        .route("/NumFilters", get(handlers::num_filters).post(handlers::num_filters))
        .route(
            "/NamesOfFilters",
            get(handlers::names_of_filters).post(handlers::names_of_filters),
        )
        .route(
            "/LoadedPlugins",
            get(handlers::loaded_plugins).post(handlers::loaded_plugins),
        )
        .route(
            "/ServiceVersion",
            get(handlers::service_version).post(handlers::service_version),
        )
        .layer(Extension(revision))
}

/// Builds the full router.
///
/// The read timeout bounds receiving a request body only; pipeline runs are
/// never cut short.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(ApiRevision::Legacy.prefix(), api_router(ApiRevision::Legacy))
        .nest(ApiRevision::Current.prefix(), api_router(ApiRevision::Current))
        .fallback(handlers::static_fallback)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}
