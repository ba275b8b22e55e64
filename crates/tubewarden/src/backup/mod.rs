//! Daily archives of the deployment directory.
//!
//! Every backup is a gzipped tarball named after the local calendar day it was
//! made on, so backups made on different days never overwrite each other.
//! After the archive is written it's read back to make sure it's restorable,
//! and the oldest archives beyond the retention limit are deleted.

mod archive;
mod retention;
mod schedule;

pub use archive::{
    archive_name, create_archive, parse_archive_date, verify_archive, ArchiveInfo, ArchiveSource,
};
pub use retention::prune;
pub use schedule::next_run_after;

use crate::config::{check_range, from_env, from_vars, ConfigError};
use crate::observability::metrics::{BACKUPS_TOTAL, BACKUP_ARCHIVE_SIZE_BYTES};
use crate::prelude::*;
use crate::Result;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Failed to write the backup archive {archive:?}")]
    Write {
        archive: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read the directory being backed up {dir:?}")]
    Walk {
        dir: PathBuf,
        source: walkdir::Error,
    },

    #[error("The backup archive {archive:?} can't be read back, it's corrupted")]
    Corrupted {
        archive: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to prune old backups in {dir:?}")]
    Prune {
        dir: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub prefix: String,

    /// Number of archives to retain, `0` means all of them
    pub keep: usize,

    /// Local time of day when the daily backup runs
    pub at: NaiveTime,

    pub exclude: Vec<String>,
}

#[derive(Deserialize)]
struct BackupEnv {
    #[serde(default = "default_source_dir")]
    source_dir: PathBuf,

    #[serde(default = "default_dest_dir")]
    dest_dir: PathBuf,

    #[serde(default = "default_prefix")]
    prefix: String,

    #[serde(default = "default_keep")]
    keep: u64,

    #[serde(default = "default_at")]
    at: String,

    #[serde(default = "default_exclude")]
    exclude: Vec<String>,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_dest_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_prefix() -> String {
    "bot_backup".to_owned()
}

fn default_keep() -> u64 {
    7
}

fn default_at() -> String {
    "03:00".to_owned()
}

fn default_exclude() -> Vec<String> {
    ["temp_downloads", "logs", "target", ".git"].map(String::from).into()
}

impl BackupEnv {
    fn validate(self) -> Result<BackupConfig, ConfigError> {
        check_range("BACKUP_KEEP", self.keep, 0..=10_000)?;

        let at = NaiveTime::parse_from_str(self.at.trim(), "%H:%M").map_err(|_| {
            ConfigError::InvalidValue {
                var: "BACKUP_AT",
                value: self.at.clone(),
                expected: "a local time of day in the HH:MM format",
            }
        })?;

        let prefix_is_valid = lazy_regex::regex_is_match!(r"^[A-Za-z0-9._-]+$", &self.prefix);
        if !prefix_is_valid {
            return Err(ConfigError::InvalidValue {
                var: "BACKUP_PREFIX",
                value: self.prefix,
                expected: "a non-empty file name prefix without path separators",
            });
        }

        let exclude = self
            .exclude
            .into_iter()
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(BackupConfig {
            source_dir: self.source_dir,
            dest_dir: self.dest_dir,
            prefix: self.prefix,
            keep: self.keep.try_into().unwrap_or(usize::MAX),
            at,
            exclude,
        })
    }
}

impl BackupConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        from_env::<BackupEnv>("BACKUP_")?.validate()
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        from_vars::<BackupEnv>("BACKUP_", vars)?.validate()
    }

    fn archive_source(&self) -> ArchiveSource {
        ArchiveSource {
            source_dir: self.source_dir.clone(),
            dest_dir: self.dest_dir.clone(),
            exclude: self.exclude.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub archive: PathBuf,
    pub entries: u64,
    pub size: u64,
    pub pruned: Vec<PathBuf>,
}

/// Makes the backup for the given day: archive, verify, prune
pub async fn run_once(config: &BackupConfig, date: NaiveDate) -> Result<BackupReport> {
    let result = try_run_once(config, date).await;

    let label = if result.is_ok() { "ok" } else { "err" };
    metrics::increment_counter!(BACKUPS_TOTAL, "result" => label);

    result
}

async fn try_run_once(config: &BackupConfig, date: NaiveDate) -> Result<BackupReport> {
    let name = archive_name(&config.prefix, date);

    let (info, duration) = create_archive(&config.archive_source(), &name)
        .with_duration()
        .await;

    let info = info?;

    if let Err(err) = verify_archive(&info.path).await {
        // A corrupted archive must not push a good one out of the retention window
        if let Err(remove_err) = fs_err::tokio::remove_file(&info.path).await {
            warn!(
                err = tracing_err(&remove_err),
                "Failed to remove the corrupted archive"
            );
        }
        return Err(err);
    }

    metrics::gauge!(BACKUP_ARCHIVE_SIZE_BYTES, info.size as f64);

    info!(
        archive = ?info.path,
        entries = info.entries,
        size = %crate::util::display::human_size(info.size),
        duration = tracing_duration(duration),
        "Backup archive created and verified"
    );

    let pruned = prune(&config.dest_dir, &config.prefix, config.keep).await?;

    Ok(BackupReport {
        archive: info.path,
        entries: info.entries,
        size: info.size,
        pruned,
    })
}

/// Makes a backup every day at the configured local time until `shutdown`
/// resolves. A failed backup is logged and retried on the next day.
pub async fn run_daily(config: &BackupConfig, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    loop {
        let now = Local::now();
        let next = next_run_after(&now, config.at);
        let wait = (next - now).to_std().unwrap_or_default();

        info!(
            next = %next.to_human_readable(),
            wait = %crate::util::display::human_duration(wait),
            "Waiting for the next daily backup"
        );

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = &mut shutdown => {
                info!("Daily backups stopped");
                return;
            }
        }

        if let Err(err) = run_once(config, Local::now().date_naive()).await {
            error!(err = tracing_err(&err), "Daily backup failed");
        }
    }
}
