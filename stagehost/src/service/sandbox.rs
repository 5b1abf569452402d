//! Confines stage file parameters to a session directory.

use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::envelope::{ApiError, ErrorCode};
use super::session::Session;
use crate::pipeline::Pipeline;

/// Turns a client-supplied path into a relative path with no parent steps.
///
/// Leading separators and drive prefixes are dropped and `:` is removed from
/// every component. Returns `None` for paths that would leave the directory
/// or that are empty after cleaning.
#[must_use]
pub fn sanitize(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    let mut clean = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy().replace(':', "");
                if !part.is_empty() {
                    clean.push(part);
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

/// Download link of a file inside a session directory.
#[must_use]
pub fn session_link(session_id: &str, relative: &Path) -> String {
    let relative: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{session_id}/{}", relative.join("/"))
}

/// Writes uploaded files into the session directory.
///
/// Each upload is stored under its sanitized client-side name. Returns the
/// relative paths written.
pub fn materialize_uploads(session: &Session, uploads: &[(String, Vec<u8>)]) -> Result<Vec<PathBuf>, ApiError> {
    let mut written = Vec::with_capacity(uploads.len());
    for (name, data) in uploads {
        let relative = sanitize(name).ok_or_else(|| {
            ApiError::new(ErrorCode::Multipart, format!("Upload name '{name}' is not a valid relative path"))
        })?;
        let target = session.dir.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::session_io("Creating upload directory", &e))?;
        }
        std::fs::write(&target, data).map_err(|e| ApiError::session_io("Writing upload", &e))?;
        debug!(session = %session.id, path = %relative.display(), bytes = data.len(), "Upload stored");
        written.push(relative);
    }
    Ok(written)
}

/// Rewrites every file and directory parameter of `pipeline` into the session.
///
/// Output parameters get their parent directories created and their original
/// relative path reported as a link. Returns the links in pipeline order.
pub fn rewrite_paths(pipeline: &mut Pipeline, session: &Session) -> Result<Vec<String>, ApiError> {
    let mut links = Vec::new();
    for (index, stage) in pipeline.stages_mut().enumerate() {
        let targets: Vec<(String, bool, String)> = stage
            .parameters()
            .iter()
            .filter(|p| p.kind.is_path() && !p.read_only)
            .filter_map(|p| {
                let value = stage.parameter(&p.property_name)?;
                let raw = value.as_str()?.to_string();
                (!raw.is_empty()).then(|| (p.property_name.clone(), p.kind.is_output(), raw))
            })
            .collect();

        for (property, is_output, raw) in targets {
            let relative = sanitize(&raw).ok_or_else(|| {
                ApiError::new(
                    ErrorCode::PipelineBuild,
                    format!("Stage {index}: '{property}' path '{raw}' leaves the session directory"),
                )
            })?;
            let sandboxed = session.dir.join(&relative);
            if is_output {
                if let Some(parent) = sandboxed.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ApiError::session_io("Creating output directory", &e))?;
                }
                links.push(session_link(&session.id, &relative));
            }
            stage
                .set_parameter(&property, Value::String(sandboxed.to_string_lossy().into_owned()))
                .map_err(|e| ApiError::new(ErrorCode::PipelineBuild, format!("Stage {index}: {e}")))?;
        }
    }
    Ok(links)
}
