use crate::util::{fs, repo_abs_path, DATA_DIRS};
use clap::Parser;

/// Remove the directories that the bot host writes to when it runs in
/// `docker compose`: leftover downloads and local backups.
#[derive(Parser, Debug)]
pub struct CleanData {}

impl crate::cmd::Cmd for CleanData {
    fn run(self) -> anyhow::Result<()> {
        for dir in DATA_DIRS {
            fs::remove_dir_all_if_exists(&repo_abs_path([dir]))?;
        }
        Ok(())
    }
}
