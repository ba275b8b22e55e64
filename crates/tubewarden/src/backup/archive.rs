use super::BackupError;
use crate::prelude::*;
use crate::Result;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const DATE_FORMAT: &str = "%Y-%m-%d";
const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// File name of the archive for the given day, e.g. `bot_backup_2024-03-07.tar.gz`
pub fn archive_name(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}_{}{ARCHIVE_EXTENSION}", date.format(DATE_FORMAT))
}

/// Inverse of [`archive_name`]. Returns `None` for files that aren't our archives.
pub fn parse_archive_date(prefix: &str, file_name: &str) -> Option<NaiveDate> {
    let date = file_name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(ARCHIVE_EXTENSION)?;

    if date.len() != "YYYY-MM-DD".len() {
        return None;
    }

    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}

#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,

    /// File or directory names that are skipped at any depth
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub entries: u64,
    pub size: u64,
}

/// Packs the source directory into `dest_dir/file_name`.
///
/// The archive is written to a temporary `.partial` file first, and renamed
/// only when it's complete, so a crash in the middle never leaves a truncated
/// archive that looks like a valid backup. An existing archive with the same
/// name is replaced.
pub async fn create_archive(source: &ArchiveSource, file_name: &str) -> Result<ArchiveInfo> {
    let source = source.clone();
    let archive = source.dest_dir.join(file_name);

    crate::util::tokio::spawn_blocking(move || -> Result<ArchiveInfo> {
        let partial = partial_path(&archive);

        let result = write_archive(&source, &partial).and_then(|entries| {
            fs_err::rename(&partial, &archive).map_err(|source| BackupError::Write {
                archive: archive.clone(),
                source,
            })?;

            let size = fs_err::metadata(&archive)
                .map_err(|source| BackupError::Write {
                    archive: archive.clone(),
                    source,
                })?
                .len();

            Ok(ArchiveInfo {
                path: archive.clone(),
                entries,
                size,
            })
        });

        if result.is_err() {
            if let Err(err) = fs_err::remove_file(&partial) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(err = tracing_err(&err), "Failed to remove the partial archive");
                }
            }
        }

        Ok(result?)
    })
    .await
}

fn partial_path(archive: &Path) -> PathBuf {
    let mut partial = archive.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

fn write_archive(source: &ArchiveSource, partial: &Path) -> Result<u64, BackupError> {
    let write_err = |source| BackupError::Write {
        archive: partial.to_owned(),
        source,
    };

    fs_err::create_dir_all(&source.dest_dir).map_err(write_err)?;

    // The destination usually lives inside the source directory, so the
    // archive must not include the previous archives
    let dest_dir = source.dest_dir.canonicalize().map_err(write_err)?;

    let file = fs_err::File::create(partial).map_err(write_err)?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    tar.follow_symlinks(false);

    let is_included = |entry: &DirEntry| {
        let excluded_name = entry
            .file_name()
            .to_str()
            .is_some_and(|name| source.exclude.iter().any(|excluded| excluded == name));

        let is_dest = entry.file_type().is_dir()
            && entry.path().canonicalize().is_ok_and(|path| path == dest_dir);

        !excluded_name && !is_dest
    };

    let walker = WalkDir::new(&source.source_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(is_included);

    let mut entries = 0;

    for entry in walker {
        let entry = entry.map_err(|source_err| BackupError::Walk {
            dir: source.source_dir.clone(),
            source: source_err,
        })?;

        let path = entry.path();
        let relative = path
            .strip_prefix(&source.source_dir)
            .unwrap_or(path);

        let file_type = entry.file_type();

        if file_type.is_dir() {
            tar.append_dir(relative, path).map_err(write_err)?;
        } else if file_type.is_file() {
            append_file(&mut tar, path, relative).map_err(write_err)?;
        } else {
            // Symlinks are stored as links, they have no data
            tar.append_path_with_name(path, relative).map_err(write_err)?;
        }

        entries += 1;
    }

    let file = tar
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(write_err)?;

    file.sync_all().map_err(write_err)?;

    Ok(entries)
}

/// Appends a snapshot of the file as it was when it was opened.
///
/// Files in the deployment directory may still be written to (e.g. logs).
/// The size in the header is fixed when the header is written, so the data
/// is cut or zero-padded to exactly that size.
fn append_file<W: io::Write>(
    tar: &mut tar::Builder<W>,
    path: &Path,
    relative: &Path,
) -> io::Result<()> {
    let file = fs_err::File::open(path)?;
    let metadata = file.metadata()?;
    let size = metadata.len();

    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(&metadata, tar::HeaderMode::Complete);

    let data = file.take(size).chain(io::repeat(0)).take(size);

    tar.append_data(&mut header, relative, data)
}

/// Reads every entry of the archive to make sure it can be restored.
/// Returns the number of entries.
pub async fn verify_archive(archive: &Path) -> Result<u64> {
    let archive = archive.to_owned();

    crate::util::tokio::spawn_blocking(move || -> Result<u64> {
        let corrupted = |source| BackupError::Corrupted {
            archive: archive.clone(),
            source,
        };

        let file = fs_err::File::open(&archive).map_err(corrupted)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));

        let mut entries = 0;
        for entry in tar.entries().map_err(corrupted)? {
            let mut entry = entry.map_err(corrupted)?;
            io::copy(&mut entry, &mut io::sink()).map_err(corrupted)?;
            entries += 1;
        }

        Ok(entries)
    })
    .await
}
