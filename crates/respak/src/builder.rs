//! Archive builder
//!
//! Builds write into a temporary file next to the destination. Payloads go
//! first, starting right after the space reserved for the header and file
//! table; the header and table are written last and the temporary file is
//! renamed over the destination only once everything is on disk.

use std::fs;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::checksum::crc32;
use crate::codec::{Algorithm, compress};
use crate::collect::{CollectedFile, collect_files};
use crate::config::BuildParams;
use crate::error::{BuildError, BuildResult};
use crate::format::{
    ArchiveHeader, EntryRecord, FLAG_ENTRY_CHECKSUMS, FileEntry, HEADER_SIZE, MAX_ENTRY_SIZE,
    write_table,
};

/// Files compressed concurrently before their payloads are written
#[cfg(feature = "parallel")]
const PARALLEL_BATCH: usize = 64;

/// Summary of a finished build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildReport {
    /// Number of entries written
    pub entries: usize,
    /// Sum of original file sizes
    pub original_bytes: u64,
    /// Sum of stored payload sizes
    pub compressed_bytes: u64,
    /// Size of the archive file
    pub archive_size: u64,
}

/// Build an archive from `params`
pub fn build(params: &BuildParams) -> BuildResult<BuildReport> {
    params.validate().map_err(BuildError::InvalidParams)?;

    info!(
        "Building archive '{}' from {} sources (algorithm: {})",
        params.archive_path.display(),
        params.sources.len(),
        params.algorithm
    );

    let files = collect_files(&params.sources, &params.base_dir, params.include_hidden)?;
    write_archive(&files, &params.archive_path, params.algorithm, params.checksums)
}

/// Write an archive containing `files`, in the given order
///
/// The destination is replaced atomically; on error it is left untouched.
pub fn write_archive(
    files: &[CollectedFile],
    dest: &Path,
    algorithm: Algorithm,
    checksums: bool,
) -> BuildResult<BuildReport> {
    let entry_count = u32::try_from(files.len()).map_err(|_| {
        BuildError::InvalidParams(format!("{} files exceed the entry limit", files.len()))
    })?;

    if let Some(file) = files.iter().find(|f| f.size > MAX_ENTRY_SIZE) {
        return Err(too_large(file, file.size));
    }

    let table_size: u64 = files
        .iter()
        .map(|f| EntryRecord::encoded_len(&f.archive_path))
        .sum();
    let data_start = HEADER_SIZE + table_size;

    let mut temp = staging_file(destination_dir(dest))?;

    let mut writer = BufWriter::new(temp.as_file_mut());
    writer.seek(SeekFrom::Start(data_start))?;

    let mut entries = Vec::with_capacity(files.len());
    let mut offset = data_start;
    let mut append = |file: &CollectedFile, encoded: Encoded| -> BuildResult<()> {
        writer.write_all(&encoded.payload)?;
        let compressed_size = encoded.payload.len() as u64;

        debug!(
            "Packed '{}': {} -> {} bytes at offset {}",
            file.archive_path, encoded.original_size, compressed_size, offset
        );

        entries.push(FileEntry {
            path: file.archive_path.clone(),
            original_size: encoded.original_size,
            compressed_size,
            payload_offset: offset,
            algorithm,
            checksum: encoded.checksum,
        });
        offset += compressed_size;
        Ok(())
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        for batch in files.chunks(PARALLEL_BATCH) {
            let encoded: Vec<BuildResult<Encoded>> = batch
                .par_iter()
                .map(|file| encode_file(file, algorithm, checksums))
                .collect();
            for (file, result) in batch.iter().zip(encoded) {
                append(file, result?)?;
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    for file in files {
        append(file, encode_file(file, algorithm, checksums)?)?;
    }

    let table = write_table(&entries).map_err(binrw_to_io)?;
    debug_assert_eq!(table.len() as u64, table_size);

    let flags = if checksums { FLAG_ENTRY_CHECKSUMS } else { 0 };
    let header = ArchiveHeader::new(entry_count, table_size, crc32(&table), flags);

    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&header.to_bytes().map_err(binrw_to_io)?)?;
    writer.write_all(&table)?;
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|e| BuildError::IoFailure(e.error))?;

    let report = BuildReport {
        entries: entries.len(),
        original_bytes: entries.iter().map(|e| e.original_size).sum(),
        compressed_bytes: offset - data_start,
        archive_size: offset,
    };

    info!(
        "Wrote '{}': {} entries, {} -> {} bytes",
        dest.display(),
        report.entries,
        report.original_bytes,
        report.compressed_bytes
    );

    Ok(report)
}

/// One compressed file, ready to be appended
struct Encoded {
    payload: Vec<u8>,
    original_size: u64,
    checksum: Option<u32>,
}

fn encode_file(file: &CollectedFile, algorithm: Algorithm, checksums: bool) -> BuildResult<Encoded> {
    let data = fs::read(&file.source_path).map_err(|e| BuildError::SourceUnreadable {
        path: file.source_path.clone(),
        source: e,
    })?;

    let original_size = data.len() as u64;
    if original_size > MAX_ENTRY_SIZE {
        return Err(too_large(file, original_size));
    }

    let payload = compress(&data, algorithm).map_err(|e| BuildError::CodecFailure {
        path: file.archive_path.clone(),
        source: e,
    })?;

    Ok(Encoded {
        payload,
        original_size,
        checksum: checksums.then(|| crc32(&data)),
    })
}

fn too_large(file: &CollectedFile, size: u64) -> BuildError {
    BuildError::InvalidParams(format!(
        "'{}' is {size} bytes, larger than the {MAX_ENTRY_SIZE} byte entry limit",
        file.source_path.display()
    ))
}

/// Create a temporary file in `dir` to be persisted over a build output
///
/// The file gets the same mode a plain `fs::write` would create.
pub(crate) fn staging_file(dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".respak").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(dir)
}

fn destination_dir(dest: &Path) -> &Path {
    dest.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn binrw_to_io(err: binrw::Error) -> io::Error {
    match err {
        binrw::Error::Io(io) => io,
        other => io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::read_table;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn write(dir: &Path, rel: &str, contents: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Test operation should succeed");
        }
        fs::write(path, contents).expect("Test operation should succeed");
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .expect("Test operation should succeed")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".respak"))
            .count()
    }

    #[test]
    fn test_layout_is_contiguous() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");
        write(src.path(), "a.txt", b"first file");
        write(src.path(), "b/c.txt", &[b'x'; 300]);

        let archive = out.path().join("test.rpk");
        let params = BuildParams::new(&archive, src.path())
            .with_source(src.path())
            .with_algorithm(Algorithm::Fast);
        let report = build(&params).expect("Test operation should succeed");

        let bytes = fs::read(&archive).expect("Test operation should succeed");
        let header = ArchiveHeader::parse(&bytes).expect("Test operation should succeed");
        assert_eq!(header.entry_count, 2);
        assert!(header.has_entry_checksums());

        let table_end = header.data_offset() as usize;
        let table = &bytes[HEADER_SIZE as usize..table_end];
        assert_eq!(crc32(table), header.table_crc32);

        let entries = read_table(table, 2).expect("Test operation should succeed");
        assert_eq!(entries[0].path, "a.txt");
        assert_eq!(entries[1].path, "b/c.txt");
        assert_eq!(entries[0].payload_offset, header.data_offset());
        assert_eq!(
            entries[1].payload_offset,
            entries[0].payload_offset + entries[0].compressed_size
        );
        assert_eq!(
            entries[1].payload_end(),
            Some(bytes.len() as u64),
            "last payload ends at end of file"
        );

        assert_eq!(report.entries, 2);
        assert_eq!(report.original_bytes, 310);
        assert_eq!(report.archive_size, bytes.len() as u64);
        assert!(report.compressed_bytes < report.original_bytes);
        assert_eq!(leftover_temp_files(out.path()), 0);
    }

    #[test]
    fn test_checksums_can_be_disabled() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");
        write(src.path(), "a.txt", b"data");

        let archive = out.path().join("plain.rpk");
        build(
            &BuildParams::new(&archive, src.path())
                .with_source(".")
                .with_checksums(false),
        )
        .expect("Test operation should succeed");

        let bytes = fs::read(&archive).expect("Test operation should succeed");
        let header = ArchiveHeader::parse(&bytes).expect("Test operation should succeed");
        assert!(!header.has_entry_checksums());
        let entries = read_table(&bytes[HEADER_SIZE as usize..header.data_offset() as usize], 1)
            .expect("Test operation should succeed");
        assert_eq!(entries[0].checksum, None);
    }

    #[test]
    fn test_empty_archive() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");

        let archive = out.path().join("empty.rpk");
        let report = build(&BuildParams::new(&archive, src.path()))
            .expect("Test operation should succeed");

        assert_eq!(report, BuildReport {
            archive_size: HEADER_SIZE,
            ..BuildReport::default()
        });
        assert_eq!(
            fs::metadata(&archive)
                .expect("Test operation should succeed")
                .len(),
            HEADER_SIZE
        );
    }

    #[test]
    fn test_failed_build_leaves_nothing_behind() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");
        write(src.path(), "a.txt", b"a");

        let files = vec![
            CollectedFile {
                archive_path: "a.txt".to_string(),
                source_path: src.path().join("a.txt"),
                size: 1,
            },
            CollectedFile {
                archive_path: "gone.txt".to_string(),
                source_path: src.path().join("gone.txt"),
                size: 1,
            },
        ];

        let archive = out.path().join("broken.rpk");
        let err = write_archive(&files, &archive, Algorithm::Deflate, true).unwrap_err();
        assert!(matches!(err, BuildError::SourceUnreadable { .. }));
        assert!(!archive.exists());
        assert_eq!(leftover_temp_files(out.path()), 0);
    }

    #[test]
    fn test_failed_build_keeps_previous_archive() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");
        let archive = out.path().join("keep.rpk");
        fs::write(&archive, b"previous").expect("Test operation should succeed");

        let files = vec![CollectedFile {
            archive_path: "missing".to_string(),
            source_path: src.path().join("missing"),
            size: 0,
        }];
        assert!(write_archive(&files, &archive, Algorithm::None, true).is_err());
        assert_eq!(
            fs::read(&archive).expect("Test operation should succeed"),
            b"previous"
        );
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let out = tempfile::tempdir().expect("Test operation should succeed");
        let files = vec![CollectedFile {
            archive_path: "huge.bin".to_string(),
            source_path: PathBuf::from("huge.bin"),
            size: MAX_ENTRY_SIZE + 1,
        }];

        let err = write_archive(&files, &out.path().join("x.rpk"), Algorithm::None, true)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidParams(_)));
    }

    #[test]
    fn test_invalid_params() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let err = build(&BuildParams::new("", src.path())).unwrap_err();
        assert!(matches!(err, BuildError::InvalidParams(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_mode_matches_plain_write() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");
        write(src.path(), "a.txt", b"shared asset");

        let archive = out.path().join("shared.rpk");
        build(&BuildParams::new(&archive, src.path()).with_source("."))
            .expect("Test operation should succeed");

        let reference = out.path().join("reference");
        fs::write(&reference, b"").expect("Test operation should succeed");

        let mode = |path: &Path| {
            fs::metadata(path)
                .expect("Test operation should succeed")
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode(&archive), mode(&reference));
    }

    #[test]
    fn test_output_matches_sequential_encoding() {
        let src = tempfile::tempdir().expect("Test operation should succeed");
        let out = tempfile::tempdir().expect("Test operation should succeed");

        // Enough files to span several compression batches
        let mut state = 0x2545_F491_u32;
        for i in 0..150_usize {
            let mut contents = format!("entry {i} ").repeat(i % 23).into_bytes();
            for _ in 0..(i * 37) % 700 {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                contents.push(state as u8);
            }
            write(src.path(), &format!("set{}/file{i:03}.bin", i % 4), &contents);
        }

        let files = collect_files(&[PathBuf::from(".")], src.path(), false)
            .expect("Test operation should succeed");
        assert_eq!(files.len(), 150);
        #[cfg(feature = "parallel")]
        assert!(files.len() > 2 * PARALLEL_BATCH);

        let archive = out.path().join("batched.rpk");
        let report = write_archive(&files, &archive, Algorithm::Deflate, true)
            .expect("Test operation should succeed");

        let table_size: u64 = files
            .iter()
            .map(|f| EntryRecord::encoded_len(&f.archive_path))
            .sum();
        let mut offset = HEADER_SIZE + table_size;
        let mut entries = Vec::new();
        let mut payloads = Vec::new();
        for file in &files {
            let data = fs::read(&file.source_path).expect("Test operation should succeed");
            let payload = compress(&data, Algorithm::Deflate).expect("Test operation should succeed");
            entries.push(FileEntry {
                path: file.archive_path.clone(),
                original_size: data.len() as u64,
                compressed_size: payload.len() as u64,
                payload_offset: offset,
                algorithm: Algorithm::Deflate,
                checksum: Some(crc32(&data)),
            });
            offset += payload.len() as u64;
            payloads.extend_from_slice(&payload);
        }

        let table = write_table(&entries).expect("Test operation should succeed");
        let header = ArchiveHeader::new(150, table_size, crc32(&table), FLAG_ENTRY_CHECKSUMS);
        let mut expected = header.to_bytes().expect("Test operation should succeed");
        expected.extend_from_slice(&table);
        expected.extend_from_slice(&payloads);

        let actual = fs::read(&archive).expect("Test operation should succeed");
        assert_eq!(actual.len(), expected.len());
        assert!(actual == expected, "archive differs from a sequential encoding");
        assert_eq!(report.archive_size, expected.len() as u64);
        assert_eq!(report.entries, 150);
    }

    #[test]
    fn test_destination_dir() {
        assert_eq!(destination_dir(Path::new("out.rpk")), Path::new("."));
        assert_eq!(destination_dir(Path::new("dir/out.rpk")), Path::new("dir"));
    }
}
