//! Resource archives: a directory tree packed into one file
//!
//! Every entry is compressed on its own, so a reader can list the archive and
//! pull out single files without touching the rest.
//!
//! # Layout
//!
//! - **Header**: magic, format version, flags, entry count and the location
//!   and CRC-32 of the file table
//! - **File table**: one record per entry with its path, sizes, payload
//!   offset, algorithm id and optional CRC-32
//! - **Payloads**: compressed entry data in table order
//!
//! See [`format`] for the exact byte layout.
//!
//! # Algorithms
//!
//! - **`none`**: stored as-is
//! - **`lz4`**: LZ4 block, fast to encode and decode
//! - **`lz4hc`**: LZ4-HC block, slower to encode, same decoder as `lz4`
//! - **`rfc1951`**: raw deflate stream
//!
//! # Example
//!
//! ```no_run
//! use respak::{Algorithm, BuildParams, ResourceArchive, build};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let params = BuildParams::new("assets.rpk", "assets")
//!     .with_source("textures")
//!     .with_algorithm(Algorithm::HighRatio);
//! let report = build(&params)?;
//! println!("packed {} files", report.entries);
//!
//! let archive = ResourceArchive::open("assets.rpk")?;
//! if archive.has_file("textures/wall.png") {
//!     let bytes = archive.extract("textures/wall.png")?;
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

#![allow(clippy::cast_precision_loss)] // Compression ratios
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![warn(missing_docs)]

pub mod builder;
pub mod checksum;
pub mod codec;
pub mod collect;
pub mod config;
pub mod error;
pub mod format;
mod io;
pub mod lite;
pub mod reader;
pub mod registry;

pub use builder::{BuildReport, build, write_archive};
pub use codec::{Algorithm, compress, decompress};
pub use collect::{CollectedFile, collect_files};
pub use config::BuildParams;
pub use error::{
    BuildError, BuildResult, CodecError, CodecResult, ExtractError, ExtractResult, LiteError,
    LiteResult, OpenError, OpenResult, RegistryError, RegistryResult,
};
pub use format::{
    ARCHIVE_MAGIC, ArchiveHeader, FORMAT_VERSION, FileEntry, FileInfo, HEADER_SIZE,
    MAX_ENTRY_SIZE,
};
pub use reader::ResourceArchive;
pub use registry::ArchiveRegistry;
