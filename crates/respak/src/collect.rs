//! Source collection
//!
//! Walks the build sources and turns every regular file into an archive path
//! relative to the base directory.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{BuildError, BuildResult};
use crate::format::validate_archive_path;

/// A file selected for packing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    /// Path inside the archive, `/`-separated
    pub archive_path: String,
    /// File on disk
    pub source_path: PathBuf,
    /// Size observed while walking
    pub size: u64,
}

/// Collect the regular files under `sources`
///
/// Relative sources resolve against `base_dir`. The result is sorted by
/// archive path bytes and contains each source file at most once.
pub fn collect_files(
    sources: &[PathBuf],
    base_dir: &Path,
    include_hidden: bool,
) -> BuildResult<Vec<CollectedFile>> {
    let base = canonical_base(base_dir)?;

    let mut files = Vec::new();
    for source in sources {
        let resolved = if source.is_absolute() {
            source.clone()
        } else {
            base.join(source)
        };
        let resolved = fs::canonicalize(&resolved).map_err(|e| BuildError::SourceUnreadable {
            path: resolved.clone(),
            source: e,
        })?;

        let root = if resolved.starts_with(&base) {
            base.clone()
        } else {
            warn!(
                "Source '{}' is outside base directory '{}', packing it at the archive root",
                resolved.display(),
                base.display()
            );
            resolved
                .parent()
                .map_or_else(|| resolved.clone(), Path::to_path_buf)
        };

        if !include_hidden && has_hidden_component(&root, &resolved) {
            debug!("Skipping hidden source '{}'", resolved.display());
            continue;
        }

        walk_source(&resolved, &root, include_hidden, &mut files)?;
    }

    files.sort_by(|a, b| {
        a.archive_path
            .as_bytes()
            .cmp(b.archive_path.as_bytes())
            .then_with(|| a.source_path.cmp(&b.source_path))
    });

    let mut seen_sources = HashSet::with_capacity(files.len());
    let mut unique: Vec<CollectedFile> = Vec::with_capacity(files.len());
    for file in files {
        if !seen_sources.insert(file.source_path.clone()) {
            warn!(
                "'{}' was reached more than once, keeping the first occurrence",
                file.source_path.display()
            );
            continue;
        }

        if let Some(previous) = unique.last()
            && previous.archive_path == file.archive_path
        {
            return Err(BuildError::DuplicatePath {
                path: file.archive_path,
                first: previous.source_path.clone(),
                second: file.source_path,
            });
        }

        unique.push(file);
    }

    debug!("Collected {} files from {} sources", unique.len(), sources.len());
    Ok(unique)
}

/// Check if a file or directory is hidden
///
/// A `.`-prefixed name is hidden everywhere; on Windows the hidden attribute
/// also counts.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name().is_some_and(is_hidden_name) || has_hidden_attribute(path)
}

fn canonical_base(base_dir: &Path) -> BuildResult<PathBuf> {
    let metadata = fs::metadata(base_dir).map_err(|e| {
        BuildError::InvalidParams(format!(
            "base directory '{}' is not accessible: {e}",
            base_dir.display()
        ))
    })?;
    if !metadata.is_dir() {
        return Err(BuildError::InvalidParams(format!(
            "base directory '{}' is not a directory",
            base_dir.display()
        )));
    }
    fs::canonicalize(base_dir).map_err(BuildError::IoFailure)
}

fn walk_source(
    source: &Path,
    root: &Path,
    include_hidden: bool,
    files: &mut Vec<CollectedFile>,
) -> BuildResult<()> {
    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || include_hidden || !is_hidden(entry.path()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            let msg = e.to_string();
            let io_err = e.into_io_error().unwrap_or_else(|| io::Error::other(msg));
            BuildError::SourceUnreadable {
                path,
                source: io_err,
            }
        })?;

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!("Skipping symlink '{}'", entry.path().display());
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|e| {
                let msg = e.to_string();
                BuildError::SourceUnreadable {
                    path: entry.path().to_path_buf(),
                    source: e.into_io_error().unwrap_or_else(|| io::Error::other(msg)),
                }
            })?
            .len();

        files.push(CollectedFile {
            archive_path: archive_path(root, entry.path())?,
            source_path: entry.into_path(),
            size,
        });
    }

    Ok(())
}

/// Archive path of `file` relative to `root`
fn archive_path(root: &Path, file: &Path) -> BuildResult<String> {
    let invalid = || BuildError::InvalidPath(file.to_path_buf());
    let rel = file.strip_prefix(root).map_err(|_| invalid())?;

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_str().ok_or_else(invalid)?),
            _ => return Err(invalid()),
        }
    }

    let path = segments.join("/");
    validate_archive_path(&path).map_err(|_| invalid())?;
    Ok(path)
}

fn has_hidden_component(root: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let mut current = root.to_path_buf();
    rel.components().any(|component| {
        current.push(component);
        is_hidden(&current)
    })
}

fn is_hidden_name(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

#[cfg(windows)]
fn has_hidden_attribute(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    fs::symlink_metadata(path)
        .is_ok_and(|metadata| metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
}

#[cfg(not(windows))]
fn has_hidden_attribute(_path: &Path) -> bool {
    false
}
