//! Error types for archive operations
//!
//! Each operation family has its own error enum so callers can match on the
//! failures that are actually possible for the call they made.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::Algorithm;

/// Codec operation result type
pub type CodecResult<T> = Result<T, CodecError>;

/// Archive build result type
pub type BuildResult<T> = Result<T, BuildError>;

/// Archive open result type
pub type OpenResult<T> = Result<T, OpenError>;

/// Entry extraction result type
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Registry operation result type
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Lite pack result type
pub type LiteResult<T> = Result<T, LiteError>;

/// Compression and decompression failures
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoder rejected the input
    #[error("{algorithm} compression failed: {reason}")]
    Encode {
        /// Algorithm that was requested
        algorithm: Algorithm,
        /// Encoder message
        reason: String,
    },

    /// Compressed stream could not be decoded
    #[error("{algorithm} decompression failed: {reason}")]
    Decode {
        /// Algorithm recorded for the payload
        algorithm: Algorithm,
        /// Decoder message
        reason: String,
    },

    /// Decoded length differs from the recorded original size
    #[error("decompressed size mismatch: expected {expected} bytes, got {actual}")]
    CorruptEntry {
        /// Original size recorded in the file table
        expected: u64,
        /// Bytes actually produced by the decoder
        actual: u64,
    },

    /// Algorithm id not known to this version
    #[error("unknown compression algorithm id: {0}")]
    UnknownAlgorithm(u8),

    /// Algorithm name not recognised
    #[error("unknown compression algorithm: '{0}'")]
    UnknownAlgorithmName(String),
}

/// Archive build failures
#[derive(Debug, Error)]
pub enum BuildError {
    /// Two different source files map to the same archive path
    #[error("'{}' and '{}' both map to archive path '{path}'", .first.display(), .second.display())]
    DuplicatePath {
        /// Colliding archive path
        path: String,
        /// First source file
        first: PathBuf,
        /// Second source file
        second: PathBuf,
    },

    /// A source file or directory could not be read
    #[error("cannot read source '{}': {source}", .path.display())]
    SourceUnreadable {
        /// Source path that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Compressing a source file failed
    #[error("cannot compress '{path}': {source}")]
    CodecFailure {
        /// Archive path of the entry
        path: String,
        /// Codec error
        source: CodecError,
    },

    /// Writing the archive failed
    #[error("I/O error: {0}")]
    IoFailure(#[from] std::io::Error),

    /// Build parameters are not usable
    #[error("invalid build parameters: {0}")]
    InvalidParams(String),

    /// Path cannot be represented as an archive path
    #[error("path cannot be stored in an archive: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// Archive open failures
#[derive(Debug, Error)]
pub enum OpenError {
    /// File does not start with the archive magic
    #[error("not a resource archive")]
    NotAnArchive,

    /// Archive was written by a newer format version
    #[error("unsupported archive version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Version stored in the header
        found: u32,
        /// Highest version this reader understands
        supported: u32,
    },

    /// File ends before a region the header declares
    #[error("truncated archive: expected at least {expected} bytes, file has {actual}")]
    Truncated {
        /// Bytes the header or table requires
        expected: u64,
        /// Actual file length
        actual: u64,
    },

    /// File table bytes do not match the header checksum
    #[error("file table checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    TableChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the bytes on disk
        actual: u32,
    },

    /// Header or file table violates the format
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// Reading the archive failed
    #[error("I/O error: {0}")]
    IoFailure(#[from] std::io::Error),
}

/// Entry extraction failures
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No entry with this path
    #[error("file not found in archive: {0}")]
    NotFound(String),

    /// Payload failed length or checksum verification
    #[error("corrupt entry '{path}': {reason}")]
    CorruptEntry {
        /// Archive path of the entry
        path: String,
        /// What did not match
        reason: String,
    },

    /// Reading the payload or writing the output failed
    #[error("I/O error: {0}")]
    IoFailure(#[from] std::io::Error),
}

/// Archive registry failures
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No archive mounted under this name
    #[error("no archive mounted as '{0}'")]
    NotMounted(String),

    /// Name already in use
    #[error("an archive is already mounted as '{0}'")]
    AlreadyMounted(String),

    /// Mounting failed to open the archive
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Loading a file from a mounted archive failed
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Lite pack failures
#[derive(Debug, Error)]
pub enum LiteError {
    /// Input has no lite pack footer
    #[error("not a lite pack")]
    NotLitePack,

    /// Footer and payload disagree
    #[error("corrupt lite pack: {0}")]
    Corrupt(String),

    /// Payload could not be decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reading or writing failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for OpenError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(io) => Self::IoFailure(io),
            other => Self::Malformed(other.to_string()),
        }
    }
}

impl OpenError {
    /// Check if the file is simply not one of our archives
    pub fn is_not_an_archive(&self) -> bool {
        matches!(self, Self::NotAnArchive)
    }

    /// Check if this is a structural problem with the file contents
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::TableChecksumMismatch { .. } | Self::Malformed(_)
        )
    }
}

impl ExtractError {
    pub(crate) fn corrupt(path: &str, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
