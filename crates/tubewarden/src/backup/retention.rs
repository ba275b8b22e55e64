use super::{parse_archive_date, BackupError};
use crate::prelude::*;
use crate::Result;
use fs_err::tokio as fs;
use std::path::{Path, PathBuf};

/// Deletes all but the `keep` newest archives in `dir`. Files that don't
/// look like our archives are never touched. `keep == 0` disables pruning.
///
/// Returns the paths of the deleted archives.
pub async fn prune(dir: &Path, prefix: &str, keep: usize) -> Result<Vec<PathBuf>> {
    if keep == 0 {
        return Ok(vec![]);
    }

    let ctx = |source| BackupError::Prune {
        dir: dir.to_owned(),
        source,
    };

    let mut archives = vec![];
    let mut entries = fs::read_dir(dir).await.map_err(ctx)?;

    while let Some(entry) = entries.next_entry().await.map_err(ctx)? {
        let Some(date) = entry
            .file_name()
            .to_str()
            .and_then(|name| parse_archive_date(prefix, name))
        else {
            continue;
        };

        if entry.file_type().await.map_err(ctx)?.is_file() {
            archives.push((date, entry.path()));
        }
    }

    // Newest first
    archives.sort_unstable_by(|(lhs, _), (rhs, _)| rhs.cmp(lhs));

    let mut removed = vec![];

    for (date, path) in archives.into_iter().skip(keep) {
        fs::remove_file(&path).await.map_err(ctx)?;
        debug!(%date, ?path, "Removed an old backup archive");
        removed.push(path);
    }

    if !removed.is_empty() {
        info!(count = removed.len(), keep, "Pruned old backup archives");
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    fn populate(dir: &Path) {
        for day in 1..=5 {
            fs::write(dir.join(format!("bot_backup_2024-03-0{day}.tar.gz")), "").unwrap();
        }
        fs::write(dir.join("notes.txt"), "").unwrap();
        fs::write(dir.join("other_2024-03-01.tar.gz"), "").unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn keeps_newest_archives() {
        let root = tempfile::tempdir().unwrap();
        populate(root.path());

        let removed = prune(root.path(), "bot_backup", 2).await.unwrap();

        assert_eq!(removed.len(), 3);
        assert_eq!(
            file_names(root.path()),
            [
                "bot_backup_2024-03-04.tar.gz",
                "bot_backup_2024-03-05.tar.gz",
                "notes.txt",
                "other_2024-03-01.tar.gz",
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn zero_keeps_everything() {
        let root = tempfile::tempdir().unwrap();
        populate(root.path());

        let removed = prune(root.path(), "bot_backup", 0).await.unwrap();

        assert!(removed.is_empty());
        assert_eq!(file_names(root.path()).len(), 7);
    }
}
