//! On-disk layout
//!
//! ```text
//! [header: 40 bytes][file table: table_size bytes][payloads...]
//! ```
//!
//! All integers are little-endian. The file table holds `entry_count`
//! records, each a fixed 32-byte body plus the UTF-8 path bytes:
//!
//! ```text
//! [u16 path_len][path][u64 original_size][u64 compressed_size]
//! [u64 payload_offset][u8 algorithm][u8 checksum_present][u32 checksum]
//! ```
//!
//! Payloads follow the table in table order, without padding.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use crate::codec::Algorithm;
use crate::error::{OpenError, OpenResult};

/// Archive magic bytes
pub const ARCHIVE_MAGIC: [u8; 8] = *b"RESPAK\x00\x1a";

/// Newest format version this crate reads and the one it writes
pub const FORMAT_VERSION: u32 = 1;

/// Size of [`ArchiveHeader`] on disk
pub const HEADER_SIZE: u64 = 40;

/// Size of a file table record excluding the path bytes
pub const RECORD_FIXED_SIZE: u64 = 2 + 8 + 8 + 8 + 1 + 1 + 4;

/// Largest original size accepted for a single entry (4 GiB)
pub const MAX_ENTRY_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Header flag: entries were written with checksums
pub const FLAG_ENTRY_CHECKSUMS: u32 = 0x1;

/// Archive header, always at offset 0
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ArchiveHeader {
    /// Magic bytes (always [`ARCHIVE_MAGIC`])
    pub magic: [u8; 8],
    /// Format version
    pub version: u32,
    /// Feature flags
    pub flags: u32,
    /// Number of records in the file table
    pub entry_count: u32,
    /// CRC-32 of the file table bytes
    pub table_crc32: u32,
    /// Offset of the file table
    pub table_offset: u64,
    /// Length of the file table in bytes
    pub table_size: u64,
}

impl ArchiveHeader {
    /// Header for a table of `entry_count` records occupying `table_size` bytes
    pub fn new(entry_count: u32, table_size: u64, table_crc32: u32, flags: u32) -> Self {
        Self {
            magic: ARCHIVE_MAGIC,
            version: FORMAT_VERSION,
            flags,
            entry_count,
            table_crc32,
            table_offset: HEADER_SIZE,
            table_size,
        }
    }

    /// Offset of the first byte after the file table
    pub fn data_offset(&self) -> u64 {
        self.table_offset.saturating_add(self.table_size)
    }

    /// Whether the builder recorded per-entry checksums
    pub fn has_entry_checksums(&self) -> bool {
        self.flags & FLAG_ENTRY_CHECKSUMS != 0
    }

    /// Serialize to the on-disk representation
    pub fn to_bytes(&self) -> binrw::BinResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(HEADER_SIZE as usize));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Parse a header, checking magic and version
    ///
    /// `data` shorter than the magic, or with a different magic, is not an
    /// archive at all. A correct magic followed by too few bytes is truncated.
    pub fn parse(data: &[u8]) -> OpenResult<Self> {
        if data.len() < ARCHIVE_MAGIC.len() || data[..ARCHIVE_MAGIC.len()] != ARCHIVE_MAGIC {
            return Err(OpenError::NotAnArchive);
        }
        if (data.len() as u64) < HEADER_SIZE {
            return Err(OpenError::Truncated {
                expected: HEADER_SIZE,
                actual: data.len() as u64,
            });
        }

        let header = Self::read(&mut Cursor::new(data))?;

        if header.version == 0 {
            return Err(OpenError::Malformed("format version 0".to_string()));
        }
        if header.version > FORMAT_VERSION {
            return Err(OpenError::UnsupportedVersion {
                found: header.version,
                supported: FORMAT_VERSION,
            });
        }
        if header.table_offset < HEADER_SIZE {
            return Err(OpenError::Malformed(format!(
                "file table at {} overlaps the header",
                header.table_offset
            )));
        }
        if u64::from(header.entry_count).saturating_mul(RECORD_FIXED_SIZE) > header.table_size {
            return Err(OpenError::Malformed(format!(
                "{} entries cannot fit in a {} byte file table",
                header.entry_count, header.table_size
            )));
        }

        Ok(header)
    }
}

/// Raw file table record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub(crate) struct EntryRecord {
    pub path_len: u16,
    #[br(count = path_len)]
    pub path: Vec<u8>,
    pub original_size: u64,
    pub compressed_size: u64,
    pub payload_offset: u64,
    pub algorithm: u8,
    pub checksum_present: u8,
    pub checksum: u32,
}

impl EntryRecord {
    pub(crate) fn encoded_len(path: &str) -> u64 {
        RECORD_FIXED_SIZE + path.len() as u64
    }
}

/// One packed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Archive path, `/`-separated
    pub path: String,
    /// Size before compression
    pub original_size: u64,
    /// Size of the stored payload
    pub compressed_size: u64,
    /// Absolute offset of the payload in the archive
    pub payload_offset: u64,
    /// Algorithm that produced the payload
    pub algorithm: Algorithm,
    /// CRC-32 of the original bytes, when the build recorded one
    pub checksum: Option<u32>,
}

impl FileEntry {
    /// Compression ratio (compressed / original), 1.0 for empty files
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.original_size as f64
        }
    }

    /// Offset one past the payload's last byte
    pub fn payload_end(&self) -> Option<u64> {
        self.payload_offset.checked_add(self.compressed_size)
    }

    pub(crate) fn to_record(&self) -> EntryRecord {
        EntryRecord {
            path_len: self.path.len() as u16,
            path: self.path.as_bytes().to_vec(),
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            payload_offset: self.payload_offset,
            algorithm: self.algorithm.id(),
            checksum_present: u8::from(self.checksum.is_some()),
            checksum: self.checksum.unwrap_or(0),
        }
    }

    pub(crate) fn from_record(record: EntryRecord) -> OpenResult<Self> {
        let path = String::from_utf8(record.path)
            .map_err(|_| OpenError::Malformed("entry path is not UTF-8".to_string()))?;
        validate_archive_path(&path).map_err(OpenError::Malformed)?;

        let algorithm = Algorithm::from_id(record.algorithm).ok_or_else(|| {
            OpenError::Malformed(format!(
                "unknown compression algorithm {} for '{path}'",
                record.algorithm
            ))
        })?;

        let checksum = match record.checksum_present {
            0 => None,
            1 => Some(record.checksum),
            other => {
                return Err(OpenError::Malformed(format!(
                    "invalid checksum tag {other} for '{path}'"
                )));
            }
        };

        if record.original_size > MAX_ENTRY_SIZE {
            return Err(OpenError::Malformed(format!(
                "'{path}' declares {} bytes, more than the {MAX_ENTRY_SIZE} byte limit",
                record.original_size
            )));
        }
        if algorithm == Algorithm::None && record.original_size != record.compressed_size {
            return Err(OpenError::Malformed(format!(
                "stored entry '{path}' has different original and stored sizes"
            )));
        }

        Ok(Self {
            path,
            original_size: record.original_size,
            compressed_size: record.compressed_size,
            payload_offset: record.payload_offset,
            algorithm,
            checksum,
        })
    }
}

/// Listing view of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Archive path
    pub path: String,
    /// Size before compression
    pub original_size: u64,
    /// Size of the stored payload
    pub compressed_size: u64,
    /// Algorithm that produced the payload
    pub algorithm: Algorithm,
}

impl From<&FileEntry> for FileInfo {
    fn from(entry: &FileEntry) -> Self {
        Self {
            path: entry.path.clone(),
            original_size: entry.original_size,
            compressed_size: entry.compressed_size,
            algorithm: entry.algorithm,
        }
    }
}

/// Serialize file table records
pub(crate) fn write_table(entries: &[FileEntry]) -> binrw::BinResult<Vec<u8>> {
    let size: u64 = entries.iter().map(|e| EntryRecord::encoded_len(&e.path)).sum();
    let mut cursor = Cursor::new(Vec::with_capacity(size as usize));
    for entry in entries {
        entry.to_record().write(&mut cursor)?;
    }
    Ok(cursor.into_inner())
}

/// Parse `count` file table records from `table`
///
/// The records must consume the table exactly.
pub(crate) fn read_table(table: &[u8], count: u32) -> OpenResult<Vec<FileEntry>> {
    let mut cursor = Cursor::new(table);
    let mut entries = Vec::with_capacity(count as usize);

    for index in 0..count {
        let record = EntryRecord::read(&mut cursor).map_err(|e| {
            OpenError::Malformed(format!("file table record {index} is invalid: {e}"))
        })?;
        entries.push(FileEntry::from_record(record)?);
    }

    if cursor.position() != table.len() as u64 {
        return Err(OpenError::Malformed(format!(
            "{} unused bytes after the last file table record",
            table.len() as u64 - cursor.position()
        )));
    }

    Ok(entries)
}

/// Check that `path` is a canonical archive path
///
/// Archive paths are relative, `/`-separated, and contain no empty, `.` or
/// `..` segments and no backslashes.
pub fn validate_archive_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty entry path".to_string());
    }
    if path.len() > usize::from(u16::MAX) {
        return Err(format!("entry path is {} bytes long", path.len()));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(format!("entry path '{path}' contains a reserved character"));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(format!("entry path '{path}' is not a normalized relative path"));
    }
    Ok(())
}
