//! Keeps the bot process running.
//!
//! The supervisor launches the child, waits for it to exit, asks the
//! [`RestartPolicy`] what to do, and relaunches the child after the delay
//! the policy chose. It stops when the shutdown future resolves (the child
//! is terminated gracefully in this case) or when the policy gives up.

mod launcher;
mod policy;

pub use launcher::{ChildHandle, CommandChild, CommandLauncher, Launcher};
pub use policy::{ChildExit, GiveUpReason, RestartDecision, RestartPolicy, RestartPolicyConfig};

use crate::observability::metrics::{SUPERVISOR_LAUNCHES_TOTAL, SUPERVISOR_RESTARTS_TOTAL};
use crate::prelude::*;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How long the child has to exit after it was asked to stop
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn the child process `{cmd}`")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },

    #[error("Failed to wait for the child process to exit")]
    Wait { source: std::io::Error },

    #[error("Failed to kill the child process")]
    Kill { source: std::io::Error },

    #[error("Failed to find the path of the current executable")]
    CurrentExe { source: std::io::Error },

    #[error("Gave up on the child process after {launches} launches: {reason}")]
    GaveUp { reason: GiveUpReason, launches: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The supervisor was asked to stop
    Shutdown,

    /// The restart policy decided that there is no point in restarting the child
    GaveUp(GiveUpReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub launches: u32,
    pub restarts: u32,
    pub outcome: SupervisorOutcome,
}

pub struct Supervisor<L> {
    launcher: L,
    policy: RestartPolicy,
    grace: Duration,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, policy: RestartPolicyConfig) -> Self {
        Self {
            launcher,
            policy: RestartPolicy::new(policy),
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<SupervisorReport> {
        tokio::pin!(shutdown);

        let cmd = self.launcher.describe();
        let mut launches = 0;
        let mut restarts = 0;

        let report = |launches, restarts, outcome| SupervisorReport {
            launches,
            restarts,
            outcome,
        };

        info!(
            %cmd,
            policy = ?self.policy.config(),
            grace = tracing_duration(self.grace),
            "Starting the supervisor"
        );

        loop {
            launches += 1;
            metrics::increment_counter!(SUPERVISOR_LAUNCHES_TOTAL);

            let started = Instant::now();

            let exit = match self.launcher.launch().await {
                Ok(mut child) => {
                    info!(pid = child.id(), launches, "Launched the child process");

                    tokio::select! {
                        exit = child.wait() => exit?,
                        () = &mut shutdown => {
                            info!(pid = child.id(), "Stopping the child process");
                            let exit = child.terminate(self.grace).await?;
                            info!(%exit, "The child process stopped");
                            return Ok(report(launches, restarts, SupervisorOutcome::Shutdown));
                        }
                    }
                }
                Err(err) => {
                    error!(err = tracing_err(&err), "Failed to launch the child process");
                    ChildExit::SpawnFailed
                }
            };

            let ran_for = started.elapsed();

            let after = match self.policy.on_exit(exit, ran_for) {
                RestartDecision::Restart { after } => after,
                RestartDecision::GiveUp { reason } => {
                    error!(
                        %exit,
                        ran_for = tracing_duration(ran_for),
                        %reason,
                        "Giving up on restarting the child process"
                    );
                    return Ok(report(launches, restarts, SupervisorOutcome::GaveUp(reason)));
                }
            };

            warn!(
                %exit,
                ran_for = tracing_duration(ran_for),
                delay = tracing_duration(after),
                "The child process exited, restarting it after a delay"
            );

            tokio::select! {
                () = tokio::time::sleep(after) => {}
                () = &mut shutdown => {
                    info!("Shutdown requested while waiting for the restart");
                    return Ok(report(launches, restarts, SupervisorOutcome::Shutdown));
                }
            }

            restarts += 1;
            metrics::increment_counter!(SUPERVISOR_RESTARTS_TOTAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Incarnation that exits with the given status after running for the
    /// given time. `None` means it runs until it's terminated.
    type Run = Option<(Duration, ChildExit)>;

    #[derive(Clone, Default)]
    struct FakeLauncher {
        script: Arc<Mutex<VecDeque<Result<Run, ()>>>>,
        launched_at: Arc<Mutex<Vec<Instant>>>,
        terminated: Arc<AtomicU32>,
    }

    impl FakeLauncher {
        fn new(script: impl IntoIterator<Item = Result<Run, ()>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into_iter().collect())),
                ..Default::default()
            }
        }

        fn crashes(count: usize, ran_for: Duration, exit: ChildExit) -> Self {
            let crashes = std::iter::repeat(Ok(Some((ran_for, exit)))).take(count);
            Self::new(crashes.chain([Ok(None)]))
        }

        /// Intervals between consecutive launches
        fn launch_gaps(&self) -> Vec<Duration> {
            let launched_at = self.launched_at.lock().unwrap();
            launched_at
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .collect()
        }

        fn terminated(&self) -> u32 {
            self.terminated.load(Ordering::SeqCst)
        }
    }

    struct FakeChild {
        run: Run,
        terminated: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        type Child = FakeChild;

        async fn launch(&self) -> Result<FakeChild> {
            self.launched_at.lock().unwrap().push(Instant::now());

            let run = self.script.lock().unwrap().pop_front().unwrap_or(Ok(None));
            let run = run.map_err(|()| fatal!("no such file or directory"))?;

            Ok(FakeChild {
                run,
                terminated: self.terminated.clone(),
            })
        }

        fn describe(&self) -> String {
            "fake-bot".to_owned()
        }
    }

    #[async_trait]
    impl ChildHandle for FakeChild {
        fn id(&self) -> Option<u32> {
            Some(42)
        }

        async fn wait(&mut self) -> Result<ChildExit> {
            let Some((ran_for, exit)) = self.run else {
                return std::future::pending().await;
            };
            tokio::time::sleep(ran_for).await;
            Ok(exit)
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<ChildExit> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(ChildExit::Signal(15))
        }
    }

    fn secs(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn relaunches_after_every_crash_with_fixed_delay() {
        let launcher = FakeLauncher::crashes(5, Duration::ZERO, ChildExit::Code(1));
        let supervisor = Supervisor::new(launcher.clone(), RestartPolicyConfig::fixed(secs(10)));

        let report = supervisor
            .run(tokio::time::sleep(secs(1000)))
            .await
            .unwrap();

        assert_eq!(
            report,
            SupervisorReport {
                launches: 6,
                restarts: 5,
                outcome: SupervisorOutcome::Shutdown,
            }
        );
        assert_eq!(launcher.launch_gaps(), vec![secs(10); 5]);
        assert_eq!(launcher.terminated(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn backs_off_and_gives_up_on_crash_loop() {
        let launcher = FakeLauncher::crashes(10, secs(1), ChildExit::Code(1));
        let policy = RestartPolicyConfig {
            max_restarts: 4,
            ..Default::default()
        };

        let report = Supervisor::new(launcher.clone(), policy)
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            report,
            SupervisorReport {
                launches: 5,
                restarts: 4,
                outcome: SupervisorOutcome::GaveUp(GiveUpReason::CrashLoop { restarts: 4 }),
            }
        );

        // One second of runtime plus the growing delay
        assert_eq!(
            launcher.launch_gaps(),
            [secs(11), secs(21), secs(41), secs(81)]
        );
        assert_eq!(launcher.terminated(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn stable_runs_never_trip_the_breaker() {
        let launcher = FakeLauncher::crashes(20, secs(120), ChildExit::Code(0));
        let policy = RestartPolicyConfig {
            max_restarts: 2,
            ..Default::default()
        };

        let report = Supervisor::new(launcher.clone(), policy)
            .run(tokio::time::sleep(secs(120 * 20 + 10 * 20 + 1)))
            .await
            .unwrap();

        assert_eq!(report.launches, 21);
        assert_eq!(report.restarts, 20);
        assert_eq!(report.outcome, SupervisorOutcome::Shutdown);
        assert_eq!(launcher.launch_gaps(), vec![secs(130); 20]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn config_error_exit_is_not_restarted() {
        let launcher = FakeLauncher::crashes(1, Duration::ZERO, ChildExit::Code(78));

        let report = Supervisor::new(launcher, RestartPolicyConfig::default())
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            report,
            SupervisorReport {
                launches: 1,
                restarts: 0,
                outcome: SupervisorOutcome::GaveUp(GiveUpReason::PermanentExitCode { code: 78 }),
            }
        );
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn spawn_failures_are_retried() {
        let launcher = FakeLauncher::new([Err(()), Err(()), Ok(None)]);

        let report = Supervisor::new(launcher.clone(), RestartPolicyConfig::fixed(secs(10)))
            .run(tokio::time::sleep(secs(25)))
            .await
            .unwrap();

        assert_eq!(report.launches, 3);
        assert_eq!(report.restarts, 2);
        assert_eq!(launcher.launch_gaps(), [secs(10), secs(10)]);
        assert_eq!(launcher.terminated(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn shutdown_interrupts_restart_delay() {
        let launcher = FakeLauncher::crashes(1, Duration::ZERO, ChildExit::Signal(9));

        let started = Instant::now();
        let report = Supervisor::new(launcher.clone(), RestartPolicyConfig::fixed(secs(10)))
            .run(tokio::time::sleep(secs(3)))
            .await
            .unwrap();

        assert_eq!(started.elapsed(), secs(3));
        assert_eq!(
            report,
            SupervisorReport {
                launches: 1,
                restarts: 0,
                outcome: SupervisorOutcome::Shutdown,
            }
        );
        assert_eq!(launcher.terminated(), 0);
    }

    #[cfg(unix)]
    mod os_process {
        use super::*;

        fn quick_policy(max_restarts: u32) -> RestartPolicyConfig {
            RestartPolicyConfig {
                max_restarts,
                stable_after: Duration::from_secs(60),
                ..RestartPolicyConfig::fixed(Duration::from_millis(10))
            }
        }

        #[test_log::test(tokio::test)]
        async fn restarts_crashing_command() {
            let launcher = CommandLauncher::new("sh", ["-c", "exit 3"]);

            let report = Supervisor::new(launcher, quick_policy(2))
                .run(std::future::pending())
                .await
                .unwrap();

            assert_eq!(
                report,
                SupervisorReport {
                    launches: 3,
                    restarts: 2,
                    outcome: SupervisorOutcome::GaveUp(GiveUpReason::CrashLoop { restarts: 2 }),
                }
            );
        }

        #[test_log::test(tokio::test)]
        async fn missing_program_counts_as_failure() {
            let launcher = CommandLauncher::new("/nonexistent/tubewarden-test-bot", ["run"]);

            let report = Supervisor::new(launcher, quick_policy(1))
                .run(std::future::pending())
                .await
                .unwrap();

            assert_eq!(report.launches, 2);
            assert_eq!(
                report.outcome,
                SupervisorOutcome::GaveUp(GiveUpReason::CrashLoop { restarts: 1 })
            );
        }

        #[test_log::test(tokio::test)]
        async fn shutdown_stops_running_command() {
            let launcher = CommandLauncher::new("sh", ["-c", "exec sleep 30"]);

            let started = std::time::Instant::now();
            let report = Supervisor::new(launcher, quick_policy(0))
                .grace(Duration::from_secs(5))
                .run(tokio::time::sleep(Duration::from_millis(200)))
                .await
                .unwrap();

            assert_eq!(report.outcome, SupervisorOutcome::Shutdown);
            assert_eq!(report.launches, 1);
            assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
        }
    }
}
