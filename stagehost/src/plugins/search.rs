//! Plugin search paths and candidate discovery.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::script::SCRIPT_EXTENSION;

/// Environment variable holding extra plugin directories.
pub const PLUGIN_PATH_ENV: &str = "STAGEHOST_PLUGIN_PATH";

/// Name of the conventional plugin subdirectory.
pub const PLUGIN_SUBDIR: &str = "Plugins";

/// Kind of module file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Platform shared library.
    Native,
    /// Rhai script.
    Script,
}

/// Directories to scan: `app_dir`, `app_dir/Plugins`, every entry of
/// `STAGEHOST_PLUGIN_PATH`, then `extra`. Duplicates are dropped.
#[must_use]
pub fn search_paths(app_dir: &Path, extra: &[PathBuf]) -> Vec<PathBuf> {
    let env = std::env::var_os(PLUGIN_PATH_ENV);
    search_paths_with(app_dir, env.as_deref(), extra)
}

/// [`search_paths`] with an explicit environment value.
#[must_use]
pub fn search_paths_with(app_dir: &Path, env: Option<&OsStr>, extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = vec![app_dir.to_path_buf(), app_dir.join(PLUGIN_SUBDIR)];
    if let Some(env) = env {
        paths.extend(std::env::split_paths(env).filter(|p| !p.as_os_str().is_empty()));
    }
    paths.extend(extra.iter().cloned());

    let mut seen = HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths
}

/// Classifies a file by extension; debug variants are ignored.
#[must_use]
pub fn classify(path: &Path) -> Option<CandidateKind> {
    let stem = path.file_stem()?.to_string_lossy();
    if stem.ends_with("_debug") {
        return None;
    }
    let extension = path.extension()?;
    if extension == std::env::consts::DLL_EXTENSION {
        Some(CandidateKind::Native)
    } else if extension == SCRIPT_EXTENSION {
        Some(CandidateKind::Script)
    } else {
        None
    }
}

/// Module files in `dir`, sorted by path. Unreadable or missing directories
/// yield nothing.
#[must_use]
pub fn candidates(dir: &Path) -> Vec<(PathBuf, CandidateKind)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Skipping unreadable plugin directory");
            return Vec::new();
        }
    };

    let mut found: Vec<(PathBuf, CandidateKind)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| classify(&path).map(|kind| (path, kind)))
        .collect();
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}
