//! The working directory where the bot keeps its temporary downloads.
//!
//! Each download session of the bot lives in its own `session_*` directory
//! that is removed once the file is sent. If the process crashes in the middle
//! of a download, the session directory stays behind, so we clean them up
//! before the bot starts accepting requests again.

use crate::error::IoError;
use crate::prelude::*;
use crate::Result;
use fs_err::tokio as fs;
use std::path::{Path, PathBuf};

const SESSION_DIR_PREFIX: &str = "session_";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub created: bool,
    pub removed_sessions: Vec<PathBuf>,
}

/// Makes sure the working directory exists and contains no leftovers of
/// interrupted download sessions. Unrelated files are left intact.
pub async fn prepare(dir: &Path) -> Result<PrepareReport> {
    let ctx = |source| IoError::PrepareWorkdir {
        path: dir.to_owned(),
        source,
    };

    let created = match fs::metadata(dir).await {
        Ok(_) => false,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
        Err(err) => return Err(ctx(err).into()),
    };

    fs::create_dir_all(dir).await.map_err(ctx)?;

    let mut report = PrepareReport {
        created,
        removed_sessions: vec![],
    };

    let mut entries = fs::read_dir(dir).await.map_err(ctx)?;

    while let Some(entry) = entries.next_entry().await.map_err(ctx)? {
        let is_session = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SESSION_DIR_PREFIX));

        if !is_session || !entry.file_type().await.map_err(ctx)?.is_dir() {
            continue;
        }

        let path = entry.path();
        fs::remove_dir_all(&path).await.map_err(ctx)?;

        debug!(?path, "Removed a leftover download session");
        report.removed_sessions.push(path);
    }

    report.removed_sessions.sort();

    if !report.removed_sessions.is_empty() {
        warn!(
            dir = ?dir,
            count = report.removed_sessions.len(),
            "Cleaned up download sessions left after an unclean shutdown"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("temp_downloads");

        let report = prepare(&dir).await.unwrap();

        assert!(report.created);
        assert!(report.removed_sessions.is_empty());
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn removes_only_leftover_sessions() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path();

        std::fs::create_dir_all(dir.join("session_1_1700000000")).unwrap();
        std::fs::write(dir.join("session_1_1700000000/video.mp4"), b"partial").unwrap();
        std::fs::create_dir_all(dir.join("session_2_1700000100")).unwrap();
        std::fs::create_dir_all(dir.join("keep_me")).unwrap();
        std::fs::write(dir.join("session_notes.txt"), b"not a directory").unwrap();

        let report = prepare(dir).await.unwrap();

        assert!(!report.created);
        assert_eq!(
            report.removed_sessions,
            [
                dir.join("session_1_1700000000"),
                dir.join("session_2_1700000100"),
            ]
        );
        assert!(dir.join("keep_me").is_dir());
        assert!(dir.join("session_notes.txt").is_file());
    }
}
