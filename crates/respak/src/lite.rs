//! Lite packs
//!
//! A lite pack holds a single compressed file followed by a fixed footer:
//!
//! ```text
//! [payload][u32 payload_crc32][u32 compressed_size][u32 original_size][u32 algorithm]["RPKL"]
//! ```
//!
//! [`pack_tree`] writes one lite pack per collected source file instead of a
//! single archive.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use binrw::{BinRead, BinWrite};
use tracing::{debug, info};

use crate::builder::{BuildReport, staging_file};
use crate::checksum::crc32;
use crate::codec::{Algorithm, compress, decompress};
use crate::collect::collect_files;
use crate::config::BuildParams;
use crate::error::{BuildError, BuildResult, CodecError, CodecResult, LiteError, LiteResult};

/// Lite pack footer marker
pub const LITE_MAGIC: [u8; 4] = *b"RPKL";

/// Size of [`LiteFooter`] on disk
pub const LITE_FOOTER_SIZE: usize = 20;

/// File extension appended to packed files
pub const LITE_EXTENSION: &str = "rpkl";

/// Trailing lite pack footer
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LiteFooter {
    /// CRC-32 of the payload bytes
    pub payload_crc32: u32,
    /// Payload length
    pub compressed_size: u32,
    /// Length after decompression
    pub original_size: u32,
    /// Algorithm id
    pub algorithm: u32,
    /// Marker (always [`LITE_MAGIC`])
    pub magic: [u8; 4],
}

impl LiteFooter {
    /// Read the footer at the end of `data`
    pub fn parse(data: &[u8]) -> LiteResult<Self> {
        if data.len() < LITE_FOOTER_SIZE || data[data.len() - 4..] != LITE_MAGIC {
            return Err(LiteError::NotLitePack);
        }
        let footer = Self::read(&mut Cursor::new(&data[data.len() - LITE_FOOTER_SIZE..]))
            .map_err(|e| LiteError::Corrupt(e.to_string()))?;
        Ok(footer)
    }
}

/// Compress `data` into a lite pack
pub fn encode(data: &[u8], algorithm: Algorithm) -> LiteResult<Vec<u8>> {
    Ok(encode_pack(data, algorithm)?)
}

/// Decode a lite pack produced by [`encode`]
pub fn decode(pack: &[u8]) -> LiteResult<Vec<u8>> {
    let footer = LiteFooter::parse(pack)?;
    let payload = &pack[..pack.len() - LITE_FOOTER_SIZE];

    if payload.len() as u64 != u64::from(footer.compressed_size) {
        return Err(LiteError::Corrupt(format!(
            "footer declares {} payload bytes, found {}",
            footer.compressed_size,
            payload.len()
        )));
    }

    let actual = crc32(payload);
    if actual != footer.payload_crc32 {
        return Err(LiteError::Corrupt(format!(
            "payload checksum mismatch: expected {:08x}, got {actual:08x}",
            footer.payload_crc32
        )));
    }

    let id = u8::try_from(footer.algorithm)
        .map_err(|_| LiteError::Corrupt(format!("invalid algorithm id {}", footer.algorithm)))?;
    let algorithm = Algorithm::try_from(id)?;

    Ok(decompress(
        payload,
        u64::from(footer.original_size),
        algorithm,
    )?)
}

/// Read and decode a lite pack file
pub fn decode_file(path: impl AsRef<Path>) -> LiteResult<Vec<u8>> {
    decode(&fs::read(path)?)
}

/// Write every file selected by `params` as a lite pack below `out_dir`
///
/// Each source becomes `<out_dir>/<archive path>.rpkl`. `params.archive_path`
/// is not used.
pub fn pack_tree(params: &BuildParams, out_dir: impl AsRef<Path>) -> BuildResult<BuildReport> {
    let out_dir = out_dir.as_ref();
    let files = collect_files(&params.sources, &params.base_dir, params.include_hidden)?;

    info!(
        "Writing {} lite packs to '{}' (algorithm: {})",
        files.len(),
        out_dir.display(),
        params.algorithm
    );

    let mut report = BuildReport::default();
    for file in &files {
        let data = fs::read(&file.source_path).map_err(|e| BuildError::SourceUnreadable {
            path: file.source_path.clone(),
            source: e,
        })?;
        let pack = encode_pack(&data, params.algorithm).map_err(|e| BuildError::CodecFailure {
            path: file.archive_path.clone(),
            source: e,
        })?;

        let target = lite_path(out_dir, &file.archive_path);
        write_atomic(&target, &pack)?;
        debug!(
            "Packed '{}' -> '{}' ({} bytes)",
            file.archive_path,
            target.display(),
            pack.len()
        );

        report.entries += 1;
        report.original_bytes += data.len() as u64;
        report.compressed_bytes += (pack.len() - LITE_FOOTER_SIZE) as u64;
        report.archive_size += pack.len() as u64;
    }

    Ok(report)
}

/// Output path of the lite pack for `archive_path`
pub fn lite_path(out_dir: &Path, archive_path: &str) -> PathBuf {
    let mut target = out_dir.to_path_buf();
    for segment in archive_path.split('/') {
        target.push(segment);
    }
    let mut name = target.into_os_string();
    name.push(".");
    name.push(LITE_EXTENSION);
    PathBuf::from(name)
}

fn encode_pack(data: &[u8], algorithm: Algorithm) -> CodecResult<Vec<u8>> {
    let too_large = || CodecError::Encode {
        algorithm,
        reason: format!("{} bytes exceed the lite pack size limit", data.len()),
    };
    let original_size = u32::try_from(data.len()).map_err(|_| too_large())?;

    let mut payload = compress(data, algorithm)?;
    let compressed_size = u32::try_from(payload.len()).map_err(|_| too_large())?;

    let footer = LiteFooter {
        payload_crc32: crc32(&payload),
        compressed_size,
        original_size,
        algorithm: u32::from(algorithm.id()),
        magic: LITE_MAGIC,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(LITE_FOOTER_SIZE));
    footer.write(&mut cursor).map_err(|e| CodecError::Encode {
        algorithm,
        reason: e.to_string(),
    })?;
    payload.extend_from_slice(&cursor.into_inner());
    Ok(payload)
}

fn write_atomic(target: &Path, data: &[u8]) -> BuildResult<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = staging_file(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| BuildError::IoFailure(e.error))?;
    Ok(())
}
