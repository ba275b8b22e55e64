use crate::util::docker_compose_cmd;
use clap::Parser;

/// Build the image of the bot host to run with `start` command.
#[derive(Parser, Debug)]
pub struct Build {
    /// Build in release mode with optimizations.
    /// The build happens in debug mode by default.
    #[clap(long)]
    release: bool,
}

impl crate::cmd::Cmd for Build {
    fn run(self) -> anyhow::Result<()> {
        let mut cmd = docker_compose_cmd()?;

        cmd.arg("build");

        if self.release {
            cmd.arg2("--build-arg", "RELEASE=1");
        }

        cmd.run()?;

        Ok(())
    }
}
