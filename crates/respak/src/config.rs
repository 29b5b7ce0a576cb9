//! Build parameters
//!
//! [`BuildParams`] describes one archive build: which sources to pack, where
//! the archive goes, and how entries are stored.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::Algorithm;

/// Parameters for [`crate::build`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildParams {
    /// Files or directories to pack; relative entries resolve against `base_dir`
    pub sources: Vec<PathBuf>,
    /// Destination archive file
    pub archive_path: PathBuf,
    /// Directory archive paths are computed relative to
    pub base_dir: PathBuf,
    /// Algorithm applied to every entry
    pub algorithm: Algorithm,
    /// Pack files and directories whose names mark them hidden
    pub include_hidden: bool,
    /// Record a CRC-32 of each entry's original bytes
    pub checksums: bool,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            archive_path: PathBuf::from("resources.rpk"),
            base_dir: PathBuf::from("."),
            algorithm: Algorithm::None,
            include_hidden: false,
            checksums: true,
        }
    }
}

impl BuildParams {
    /// Create parameters packing `base_dir` into `archive_path`
    pub fn new(archive_path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Add a source file or directory
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Replace the source list
    pub fn with_sources<I, P>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the compression algorithm
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Include hidden files and directories
    pub fn with_include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    /// Enable or disable per-entry checksums
    pub fn with_checksums(mut self, checksums: bool) -> Self {
        self.checksums = checksums;
        self
    }

    /// Validate the parameters
    ///
    /// Only checks what can be known without touching the filesystem beyond
    /// the destination itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.archive_path.as_os_str().is_empty() {
            return Err("archive_path must not be empty".to_string());
        }

        if self.archive_path.is_dir() {
            return Err(format!(
                "archive_path '{}' is a directory",
                self.archive_path.display()
            ));
        }

        if self.base_dir.as_os_str().is_empty() {
            return Err("base_dir must not be empty".to_string());
        }

        if self.sources.iter().any(|s| s.as_os_str().is_empty()) {
            return Err("sources must not contain empty paths".to_string());
        }

        Ok(())
    }
}
