//! Session output archives.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the archive of session `session_id`.
#[must_use]
pub fn archive_name(session_id: &str) -> String {
    format!("{session_id}.tar.gz")
}

/// Packs the session directory into `<session>.tar.gz` inside that directory.
///
/// Entries are stored under a top-level `<session>/` folder. A previous
/// archive in the directory is replaced and never packed into the new one.
pub fn archive_session(session_dir: &Path, session_id: &str) -> std::io::Result<PathBuf> {
    let name = archive_name(session_id);
    let target = session_dir.join(&name);
    let partial = session_dir.join(format!(".{name}.partial"));

    let encoder = GzEncoder::new(File::create(&partial)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    append_tree(&mut builder, session_dir, Path::new(session_id), &[&name, &format!(".{name}.partial")])?;
    let mut file = builder.into_inner()?.finish()?;
    file.flush()?;
    drop(file);

    std::fs::rename(&partial, &target)?;
    info!(session = session_id, path = %target.display(), "Session archived");
    Ok(target)
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    prefix: &Path,
    skip: &[&str],
) -> std::io::Result<()> {
    builder.append_dir(prefix, dir)?;
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);
    for entry in entries {
        let file_name = entry.file_name();
        if skip.iter().any(|s| file_name == **s) {
            continue;
        }
        let path = entry.path();
        let name = prefix.join(&file_name);
        if entry.file_type()?.is_dir() {
            append_tree(builder, &path, &name, &[])?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_archive_contents() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("abc");
        std::fs::create_dir_all(session_dir.join("sub")).unwrap();
        std::fs::write(session_dir.join("a.txt"), "a").unwrap();
        std::fs::write(session_dir.join("sub/b.txt"), "b").unwrap();

        let archive = archive_session(&session_dir, "abc").unwrap();
        assert_eq!(archive, session_dir.join("abc.tar.gz"));
        assert_eq!(
            entry_names(&archive),
            vec!["abc", "abc/a.txt", "abc/sub", "abc/sub/b.txt"]
        );
    }

    #[test]
    fn test_rearchive_skips_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        archive_session(dir.path(), "s").unwrap();
        let archive = archive_session(dir.path(), "s").unwrap();
        assert_eq!(entry_names(&archive), vec!["s", "s/a.txt"]);
    }
}
