//! Archive reader
//!
//! [`ResourceArchive::open`] validates the header and the whole file table up
//! front. After that, extraction only touches the requested payload and
//! never moves a shared file cursor, so one archive can serve many threads.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::checksum;
use crate::codec::decompress;
use crate::error::{ExtractError, ExtractResult, OpenError, OpenResult};
use crate::format::{ArchiveHeader, FileEntry, FileInfo, HEADER_SIZE, read_table};
use crate::io::read_vec_at;

/// An open archive
#[derive(Debug)]
pub struct ResourceArchive {
    path: PathBuf,
    file: File,
    file_len: u64,
    header: ArchiveHeader,
    entries: Vec<FileEntry>,
    index: HashMap<String, usize>,
}

impl ResourceArchive {
    /// Open and validate an archive
    pub fn open(path: impl AsRef<Path>) -> OpenResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let head = read_vec_at(&file, 0, file_len.min(HEADER_SIZE))?;
        let header = ArchiveHeader::parse(&head)?;

        let table_end = header
            .table_offset
            .checked_add(header.table_size)
            .ok_or_else(|| OpenError::Malformed("file table range overflows".to_string()))?;
        if file_len < table_end {
            return Err(OpenError::Truncated {
                expected: table_end,
                actual: file_len,
            });
        }

        let table = read_vec_at(&file, header.table_offset, header.table_size)?;
        let actual = checksum::crc32(&table);
        if actual != header.table_crc32 {
            return Err(OpenError::TableChecksumMismatch {
                expected: header.table_crc32,
                actual,
            });
        }

        let entries = read_table(&table, header.entry_count)?;

        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if entry.payload_offset < table_end {
                return Err(OpenError::Malformed(format!(
                    "payload of '{}' at {} overlaps the header or file table",
                    entry.path, entry.payload_offset
                )));
            }

            let end = entry.payload_end().ok_or_else(|| {
                OpenError::Malformed(format!("payload range of '{}' overflows", entry.path))
            })?;
            if end > file_len {
                return Err(OpenError::Truncated {
                    expected: end,
                    actual: file_len,
                });
            }

            if index.insert(entry.path.clone(), position).is_some() {
                return Err(OpenError::Malformed(format!(
                    "duplicate entry path '{}'",
                    entry.path
                )));
            }
        }

        info!(
            "Opened archive '{}': version {}, {} entries",
            path.display(),
            header.version,
            entries.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_len,
            header,
            entries,
            index,
        })
    }

    /// Path the archive was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive header
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Size of the archive file when it was opened
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in table order
    pub fn files(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Snapshot of every entry in table order
    pub fn list_files(&self) -> Vec<FileInfo> {
        self.entries.iter().map(FileInfo::from).collect()
    }

    /// Look up an entry by exact archive path
    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.index.get(path).map(|&position| &self.entries[position])
    }

    /// Check if an entry exists (exact, case-sensitive)
    pub fn has_file(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Read and decompress one entry
    pub fn extract(&self, path: &str) -> ExtractResult<Vec<u8>> {
        let entry = self
            .entry(path)
            .ok_or_else(|| ExtractError::NotFound(path.to_string()))?;
        self.read_entry(entry)
    }

    /// Read and decompress an entry obtained from this archive
    pub fn read_entry(&self, entry: &FileEntry) -> ExtractResult<Vec<u8>> {
        let payload = read_vec_at(&self.file, entry.payload_offset, entry.compressed_size)?;

        let data = decompress(&payload, entry.original_size, entry.algorithm)
            .map_err(|e| ExtractError::corrupt(&entry.path, e.to_string()))?;

        checksum::verify(entry.checksum, &data).map_err(|actual| {
            ExtractError::corrupt(
                &entry.path,
                format!(
                    "checksum mismatch: expected {:08x}, got {actual:08x}",
                    entry.checksum.unwrap_or_default()
                ),
            )
        })?;

        debug!(
            "Extracted '{}' ({} -> {} bytes)",
            entry.path, entry.compressed_size, entry.original_size
        );
        Ok(data)
    }

    /// Extract every entry, discarding the data
    ///
    /// Stops at the first entry that fails.
    pub fn verify(&self) -> ExtractResult<()> {
        for entry in &self.entries {
            self.read_entry(entry)?;
        }
        info!(
            "Verified {} entries in '{}'",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Extract one entry below `dest_dir`, creating parent directories
    ///
    /// Returns the path of the written file.
    pub fn extract_to(&self, path: &str, dest_dir: impl AsRef<Path>) -> ExtractResult<PathBuf> {
        let data = self.extract(path)?;
        let target = output_path(dest_dir.as_ref(), path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, data)?;
        Ok(target)
    }

    /// Extract every entry below `dest_dir`
    ///
    /// Returns the number of files written.
    pub fn extract_all(&self, dest_dir: impl AsRef<Path>) -> ExtractResult<usize> {
        let dest_dir = dest_dir.as_ref();
        fs::create_dir_all(dest_dir)?;
        for entry in &self.entries {
            let data = self.read_entry(entry)?;
            let target = output_path(dest_dir, &entry.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, data)?;
        }
        info!(
            "Extracted {} entries to '{}'",
            self.entries.len(),
            dest_dir.display()
        );
        Ok(self.entries.len())
    }
}

/// Entry paths are validated on open, so joining segments stays below `dest_dir`
fn output_path(dest_dir: &Path, archive_path: &str) -> PathBuf {
    archive_path
        .split('/')
        .fold(dest_dir.to_path_buf(), |mut acc, segment| {
            acc.push(segment);
            acc
        })
}
