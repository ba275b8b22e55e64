use super::{ChildExit, SupervisorError};
use crate::prelude::*;
use crate::{err_ctx, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

/// Starts new incarnations of the supervised process
#[async_trait]
pub trait Launcher: Send + Sync {
    type Child: ChildHandle;

    async fn launch(&self) -> Result<Self::Child>;

    /// Human-readable description of what is launched, used in logs
    fn describe(&self) -> String;
}

/// A running incarnation of the supervised process
#[async_trait]
pub trait ChildHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Waits until the process exits on its own
    async fn wait(&mut self) -> Result<ChildExit>;

    /// Asks the process to stop and waits for it to exit. If it doesn't
    /// exit within the `grace` period, it's killed forcefully.
    async fn terminate(&mut self, grace: Duration) -> Result<ChildExit>;
}

/// Runs the child as an OS process with inherited stdio, so its logs end up
/// in the same place as the logs of the supervisor.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Launches `tubewarden run` using the path of the currently running executable
    pub fn current_exe_run() -> Result<Self> {
        let exe = std::env::current_exe().map_err(err_ctx!(SupervisorError::CurrentExe))?;
        Ok(Self::new(exe, ["run"]))
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    type Child = CommandChild;

    async fn launch(&self) -> Result<CommandChild> {
        let mut cmd = tokio::process::Command::new(&self.program);

        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(err_ctx!(SupervisorError::Spawn {
            cmd: self.describe()
        }))?;

        Ok(CommandChild { child })
    }

    fn describe(&self) -> String {
        let program = self.program.to_string_lossy();
        let args: Vec<_> = self.args.iter().map(String::as_str).collect();
        crate::util::process::display_cmd(&program, &args)
            .unwrap_or_else(|_| format!("{program} {args:?}"))
    }
}

#[derive(Debug)]
pub struct CommandChild {
    child: tokio::process::Child,
}

impl CommandChild {
    async fn wait_status(&mut self) -> Result<ChildExit> {
        let status = self
            .child
            .wait()
            .await
            .map_err(err_ctx!(SupervisorError::Wait))?;

        Ok(status.into())
    }

    #[cfg(unix)]
    fn request_stop(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) else {
            // The process was already reaped
            return false;
        };

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => true,
            Err(err) => {
                warn!(pid, err = tracing_err(&err), "Failed to send SIGTERM to the child");
                false
            }
        }
    }

    // There is no graceful stop signal that we could send on other platforms
    #[cfg(not(unix))]
    fn request_stop(&self) -> bool {
        false
    }
}

#[async_trait]
impl ChildHandle for CommandChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ChildExit> {
        self.wait_status().await
    }

    async fn terminate(&mut self, grace: Duration) -> Result<ChildExit> {
        if self.request_stop() {
            if let Ok(exit) = tokio::time::timeout(grace, self.wait_status()).await {
                return exit;
            }

            warn!(
                pid = self.child.id(),
                grace = tracing_duration(grace),
                "The child didn't stop within the grace period, killing it"
            );
        }

        self.child
            .kill()
            .await
            .map_err(err_ctx!(SupervisorError::Kill))?;

        self.wait_status().await
    }
}
