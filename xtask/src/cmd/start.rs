use crate::cmd;
use crate::util::{docker_compose_cmd, fs, repo_abs_path, DATA_DIRS};
use clap::Parser;

/// Run the bot host under the supervisor using `docker compose`
#[derive(Parser, Debug)]
pub struct Start {
    #[clap(flatten)]
    build: cmd::Build,
}

impl cmd::Cmd for Start {
    fn run(self) -> anyhow::Result<()> {
        if !repo_abs_path([".env"]).exists() {
            anyhow::bail!(
                "The .env file is missing in the repository root. \
                Copy .env.example to .env and put the bot token there"
            );
        }

        self.build.run()?;

        // Create the mounted directories ourselves, otherwise docker creates
        // them owned by root
        for dir in DATA_DIRS {
            fs::create_dir_all(repo_abs_path([dir]))?;
        }

        docker_compose_cmd()?.arg("up").run()?;

        Ok(())
    }
}
