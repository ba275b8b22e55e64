use crate::prelude::*;
use retry_policies::policies::ExponentialBackoff;
use retry_policies::{Jitter, RetryDecision as BackoffDecision, RetryPolicy as _};
use std::fmt;
use std::time::{Duration, SystemTime};

/// How one incarnation of the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),

    /// The process was terminated by a signal (unix only)
    Signal(i32),

    /// The process couldn't even be started
    SpawnFailed,
}

impl ChildExit {
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(code),
            Self::Signal(_) | Self::SpawnFailed => None,
        }
    }
}

impl From<std::process::ExitStatus> for ChildExit {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }

        Self::Code(-1)
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::SpawnFailed => f.write_str("spawn failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicyConfig {
    /// Delay before the first restart after a failure
    pub restart_delay: Duration,

    /// Upper bound of the delay between restarts
    pub max_delay: Duration,

    /// The delay is multiplied by this factor after every restart
    /// that followed a rapid failure. `1` means a fixed delay.
    pub backoff_factor: u32,

    /// If the child ran at least this long, its exit is not considered a part
    /// of a crash loop and the backoff starts from scratch.
    pub stable_after: Duration,

    /// Give up after this many consecutive restarts without a stable run.
    /// `0` means retrying forever.
    pub max_restarts: u32,

    /// Exit codes, that mean restarting won't help (e.g. bad configuration)
    pub no_restart_exit_codes: Vec<i32>,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(5 * 60),
            backoff_factor: 2,
            stable_after: Duration::from_secs(60),
            max_restarts: 10,
            no_restart_exit_codes: vec![crate::EXIT_CODE_CONFIG.into()],
        }
    }
}

impl RestartPolicyConfig {
    /// Restart unconditionally and forever with the same delay.
    /// This is what `Restart=always` + `RestartSec=` does in systemd.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            restart_delay: delay,
            max_delay: delay,
            backoff_factor: 1,
            stable_after: Duration::ZERO,
            max_restarts: 0,
            no_restart_exit_codes: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { after: Duration },
    GiveUp { reason: GiveUpReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUpReason {
    PermanentExitCode { code: i32 },
    CrashLoop { restarts: u32 },
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermanentExitCode { code } => write!(
                f,
                "the child exited with code {code}, which means restarting it won't help"
            ),
            Self::CrashLoop { restarts } => write!(
                f,
                "the child keeps crashing, it was restarted {restarts} times in a row \
                without ever running stable"
            ),
        }
    }
}

/// Decides whether and when the child should be restarted after it exits.
///
/// The delays and the crash-loop limit come from an exponential backoff
/// without jitter, so the same sequence of exits always produces the same
/// sequence of delays.
pub struct RestartPolicy {
    config: RestartPolicyConfig,
    backoff: ExponentialBackoff,
    consecutive_restarts: u32,
}

impl RestartPolicy {
    pub fn new(config: RestartPolicyConfig) -> Self {
        let max_restarts = match config.max_restarts {
            0 => u32::MAX,
            max => max,
        };

        let backoff = ExponentialBackoff::builder()
            .base(config.backoff_factor.max(1))
            .jitter(Jitter::None)
            .retry_bounds(
                config.restart_delay,
                config.max_delay.max(config.restart_delay),
            )
            .build_with_max_retries(max_restarts);

        Self {
            config,
            backoff,
            consecutive_restarts: 0,
        }
    }

    pub fn config(&self) -> &RestartPolicyConfig {
        &self.config
    }

    pub fn on_exit(&mut self, exit: ChildExit, ran_for: Duration) -> RestartDecision {
        if let Some(code) = exit.code() {
            if self.config.no_restart_exit_codes.contains(&code) {
                return RestartDecision::GiveUp {
                    reason: GiveUpReason::PermanentExitCode { code },
                };
            }
        }

        if ran_for >= self.config.stable_after && self.consecutive_restarts > 0 {
            debug!(
                ran_for = tracing_duration(ran_for),
                "The child ran long enough to reset the restart backoff"
            );
            self.consecutive_restarts = 0;
        }

        let Some(after) = self.delay(self.consecutive_restarts) else {
            return RestartDecision::GiveUp {
                reason: GiveUpReason::CrashLoop {
                    restarts: self.consecutive_restarts,
                },
            };
        };

        self.consecutive_restarts = self.consecutive_restarts.saturating_add(1);

        RestartDecision::Restart { after }
    }

    fn delay(&self, past_restarts: u32) -> Option<Duration> {
        let now = SystemTime::now();

        let execute_after = match self.backoff.should_retry(now, past_restarts) {
            BackoffDecision::Retry { execute_after } => execute_after,
            BackoffDecision::DoNotRetry => return None,
        };

        // The backoff answers with a wall-clock instant computed from its own
        // reading of the clock, which is a few microseconds later than `now`
        let delay = execute_after
            .duration_since(now)
            .unwrap_or(self.config.restart_delay);

        Some(Duration::from_millis(
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::{expect, Expect};

    const RAPID: Duration = Duration::from_secs(1);

    #[track_caller]
    fn assert_decisions(
        config: RestartPolicyConfig,
        exits: &[(ChildExit, Duration)],
        expected: Expect,
    ) {
        let mut policy = RestartPolicy::new(config);
        let actual = exits
            .iter()
            .map(|&(exit, ran_for)| match policy.on_exit(exit, ran_for) {
                RestartDecision::Restart { after } => format!("restart after {after:?}"),
                RestartDecision::GiveUp { reason } => format!("give up: {reason:?}"),
            })
            .collect::<Vec<_>>()
            .join("\n");

        expected.assert_eq(&actual);
    }

    #[test]
    fn fixed_delay_restarts_forever() {
        let exits = vec![(ChildExit::Code(1), RAPID); 20];
        let mut policy = RestartPolicy::new(RestartPolicyConfig::fixed(Duration::from_secs(10)));

        for (exit, ran_for) in exits {
            assert_eq!(
                policy.on_exit(exit, ran_for),
                RestartDecision::Restart {
                    after: Duration::from_secs(10)
                }
            );
        }

        // Even "bad config" and successful exits are restarted
        assert_eq!(
            policy.on_exit(ChildExit::Code(78), RAPID),
            RestartDecision::Restart {
                after: Duration::from_secs(10)
            }
        );
        assert_eq!(
            policy.on_exit(ChildExit::Code(0), RAPID),
            RestartDecision::Restart {
                after: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn exponential_backoff_is_capped_and_gives_up() {
        assert_decisions(
            RestartPolicyConfig {
                max_restarts: 8,
                ..Default::default()
            },
            &vec![(ChildExit::Code(1), RAPID); 9],
            expect![[r#"
                restart after 10s
                restart after 20s
                restart after 40s
                restart after 80s
                restart after 160s
                restart after 300s
                restart after 300s
                restart after 300s
                give up: CrashLoop { restarts: 8 }"#]],
        );
    }

    #[test]
    fn stable_run_resets_backoff() {
        let stable = Duration::from_secs(61);
        assert_decisions(
            RestartPolicyConfig::default(),
            &[
                (ChildExit::Code(1), RAPID),
                (ChildExit::Signal(9), RAPID),
                (ChildExit::Code(1), RAPID),
                (ChildExit::Code(0), stable),
                (ChildExit::Code(1), RAPID),
            ],
            expect![[r#"
                restart after 10s
                restart after 20s
                restart after 40s
                restart after 10s
                restart after 20s"#]],
        );
    }

    #[test]
    fn zero_max_restarts_never_gives_up() {
        let mut policy = RestartPolicy::new(RestartPolicyConfig {
            max_restarts: 0,
            ..Default::default()
        });

        let delays: Vec<_> = (0..50)
            .map(|_| policy.on_exit(ChildExit::Code(1), RAPID))
            .collect();

        assert!(delays.iter().all(|decision| matches!(
            decision,
            RestartDecision::Restart { after } if *after <= Duration::from_secs(300)
        )));
        assert_eq!(
            delays.last(),
            Some(&RestartDecision::Restart {
                after: Duration::from_secs(300)
            })
        );
    }

    #[test]
    fn max_delay_below_restart_delay_keeps_restart_delay() {
        assert_decisions(
            RestartPolicyConfig {
                restart_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(5),
                ..Default::default()
            },
            &vec![(ChildExit::Code(1), RAPID); 3],
            expect![[r#"
                restart after 30s
                restart after 30s
                restart after 30s"#]],
        );
    }

    #[test]
    fn permanent_exit_code_is_not_restarted() {
        assert_decisions(
            RestartPolicyConfig::default(),
            &[(ChildExit::Code(1), RAPID), (ChildExit::Code(78), RAPID)],
            expect![[r#"
                restart after 10s
                give up: PermanentExitCode { code: 78 }"#]],
        );
    }

    #[test]
    fn spawn_failures_count_towards_crash_loop() {
        assert_decisions(
            RestartPolicyConfig {
                max_restarts: 2,
                backoff_factor: 1,
                ..Default::default()
            },
            &vec![(ChildExit::SpawnFailed, Duration::ZERO); 3],
            expect![[r#"
                restart after 10s
                restart after 10s
                give up: CrashLoop { restarts: 2 }"#]],
        );
    }

    #[test]
    fn displays_exits() {
        expect!["exit code 1"].assert_eq(&ChildExit::Code(1).to_string());
        expect!["signal 15"].assert_eq(&ChildExit::Signal(15).to_string());
        expect!["spawn failure"].assert_eq(&ChildExit::SpawnFailed.to_string());
    }
}
