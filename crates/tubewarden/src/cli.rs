use crate::backup::{self, BackupConfig};
use crate::config::Config;
use crate::health::HealthProber;
use crate::prelude::*;
use crate::service_unit::{render_systemd_unit, UnitOptions};
use crate::supervisor::{
    CommandLauncher, RestartPolicyConfig, Supervisor, SupervisorError, SupervisorOutcome,
};
use crate::tg::TelegramIdentity;
use crate::util::tokio::shutdown_signal;
use crate::{check, err, runtime, Result};
use chrono::prelude::*;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Keeps a Telegram bot alive: runs it, restarts it, checks its health and
/// backs up its deployment directory
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// `run` is used if no command is given
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot host: prepare the working directory, wait until the
    /// Telegram Bot API accepts the token, then keep checking the health
    Run,

    Supervise(SuperviseArgs),

    /// Run a single health check and exit
    Probe,

    /// Validate the configuration and the environment, print a YAML report
    Check,

    Backup(BackupArgs),

    SystemdUnit(SystemdUnitArgs),
}

/// Run the bot host (or any other command) as a child process and restart it
/// whenever it exits
#[derive(clap::Args, Debug)]
struct SuperviseArgs {
    /// Delay before the first restart after a crash
    #[arg(long, env = "SUPERVISOR_RESTART_DELAY_SECS", default_value_t = 10)]
    restart_delay_secs: u64,

    /// Upper bound of the delay between restarts
    #[arg(long, env = "SUPERVISOR_MAX_DELAY_SECS", default_value_t = 300)]
    max_delay_secs: u64,

    /// The delay grows by this factor after every rapid crash
    #[arg(long, env = "SUPERVISOR_BACKOFF_FACTOR", default_value_t = 2)]
    backoff_factor: u32,

    /// The child is considered stable if it ran at least this long
    #[arg(long, env = "SUPERVISOR_STABLE_AFTER_SECS", default_value_t = 60)]
    stable_after_secs: u64,

    /// Give up after this many restarts in a row without a stable run,
    /// 0 means never give up
    #[arg(long, env = "SUPERVISOR_MAX_RESTARTS", default_value_t = 10)]
    max_restarts: u32,

    /// Exit codes of the child that mean restarting it won't help
    #[arg(
        long = "no-restart-exit-code",
        env = "SUPERVISOR_NO_RESTART_EXIT_CODES",
        value_delimiter = ',',
        default_values_t = [i32::from(crate::EXIT_CODE_CONFIG)],
    )]
    no_restart_exit_codes: Vec<i32>,

    /// Restart unconditionally and forever with the same delay,
    /// ignoring the backoff, the breaker and the exit codes
    #[arg(long, env = "SUPERVISOR_FIXED")]
    fixed: bool,

    /// How long the child has to exit after SIGTERM before it's killed
    #[arg(long, env = "SUPERVISOR_GRACE_SECS", default_value_t = 10)]
    grace_secs: u64,

    /// Command to supervise. Defaults to `tubewarden run`
    #[arg(last = true)]
    command: Vec<String>,
}

impl SuperviseArgs {
    fn policy(&self) -> RestartPolicyConfig {
        let restart_delay = Duration::from_secs(self.restart_delay_secs);

        if self.fixed {
            return RestartPolicyConfig::fixed(restart_delay);
        }

        RestartPolicyConfig {
            restart_delay,
            max_delay: Duration::from_secs(self.max_delay_secs),
            backoff_factor: self.backoff_factor,
            stable_after: Duration::from_secs(self.stable_after_secs),
            max_restarts: self.max_restarts,
            no_restart_exit_codes: self.no_restart_exit_codes.clone(),
        }
    }

    fn launcher(&self) -> Result<CommandLauncher> {
        match self.command.split_first() {
            Some((program, args)) => Ok(CommandLauncher::new(program, args)),
            None => CommandLauncher::current_exe_run(),
        }
    }
}

/// Archive the deployment directory, verify the archive and prune old ones
#[derive(clap::Args, Debug)]
struct BackupArgs {
    /// Keep running and make a backup every day at `BACKUP_AT`
    #[arg(long)]
    daily: bool,
}

/// Print a systemd unit that runs the bot host with the right restart policy
#[derive(clap::Args, Debug)]
struct SystemdUnitArgs {
    #[arg(long, default_value = "Telegram bot managed by tubewarden")]
    description: String,

    /// Path of the executable. Defaults to the current executable
    #[arg(long)]
    exec: Option<PathBuf>,

    /// Defaults to the current directory
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Defaults to `.env` in the working directory
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long, default_value_t = 10)]
    restart_sec: u64,
}

impl Args {
    pub async fn run(self) -> Result {
        match self.command.unwrap_or(Command::Run) {
            Command::Run => runtime::run(Config::from_env()?, shutdown_signal()).await,
            Command::Supervise(args) => supervise(args).await,
            Command::Probe => probe().await,
            Command::Check => {
                let report = check::check(&Config::from_env()?).await?;
                println!("{}", report.to_yaml()?);
                report.into_result()
            }
            Command::Backup(args) => run_backup(args).await,
            Command::SystemdUnit(args) => {
                print!("{}", render_systemd_unit(&args.into_options()?));
                Ok(())
            }
        }
    }
}

async fn supervise(args: SuperviseArgs) -> Result {
    let supervisor = Supervisor::new(args.launcher()?, args.policy())
        .grace(Duration::from_secs(args.grace_secs));

    let report = supervisor.run(shutdown_signal()).await?;

    info!(
        launches = report.launches,
        restarts = report.restarts,
        outcome = ?report.outcome,
        "Supervisor stopped"
    );

    match report.outcome {
        SupervisorOutcome::Shutdown => Ok(()),
        SupervisorOutcome::GaveUp(reason) => Err(err!(SupervisorError::GaveUp {
            reason,
            launches: report.launches,
        })),
    }
}

async fn probe() -> Result {
    let config = Config::from_env()?;
    let identity = TelegramIdentity::new(&config.tg, config.health.timeout())?;
    let mut prober = HealthProber::new(identity, &config.health);

    let me = prober.probe_once().await?;
    println!("{me}");

    Ok(())
}

async fn run_backup(args: BackupArgs) -> Result {
    let config = BackupConfig::from_env()?;

    if args.daily {
        backup::run_daily(&config, shutdown_signal()).await;
        return Ok(());
    }

    let report = backup::run_once(&config, Local::now().date_naive()).await?;
    let yaml = serde_yaml::to_string(&report).fatal_ctx(|| "Failed to serialize the backup report")?;
    println!("{yaml}");

    Ok(())
}

impl SystemdUnitArgs {
    fn into_options(self) -> Result<UnitOptions> {
        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir().fatal_ctx(|| "Failed to get the current directory")?,
        };

        let exec = match self.exec {
            Some(exec) => exec,
            None => std::env::current_exe().fatal_ctx(|| "Failed to get the current executable")?,
        };

        Ok(UnitOptions {
            description: self.description,
            exec,
            env_file: Some(self.env_file.unwrap_or_else(|| working_dir.join(".env"))),
            working_dir,
            user: self.user,
            restart_delay_secs: self.restart_sec,
        })
    }
}
