//! Periodic self-check of the external dependency of the bot.
//!
//! The prober runs inside the bot host process. It sleeps for a fixed
//! interval, asks the Telegram Bot API who we are, and reports the result
//! to the logs, to the metrics and to the [`HealthStatus`] watch channel.
//!
//! A failing check is only logged, unless the number of consecutive failures
//! reaches the configured threshold. In that case [`HealthProber::run`] returns
//! an error, the process exits with a non-zero code, and the supervisor gets
//! a chance to restart it.

use crate::config::{check_range, ConfigError};
use crate::observability::metrics::{HEALTH_CHECKS_TOTAL, HEALTH_CHECK_DURATION_SECONDS};
use crate::prelude::*;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(
        "The Telegram Bot API failed {consecutive_failures} consecutive health checks, \
        giving up so that the process can be restarted"
    )]
    Unhealthy {
        consecutive_failures: u32,
        #[source]
        last_error: Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Timeout of a single identity request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of consecutive failed checks after which the process gives up.
    /// `0` means the failures are only logged.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_interval_secs() -> u64 {
    60 * 60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    0
}

impl HealthConfig {
    pub(crate) fn validate(self) -> Result<Self, ConfigError> {
        check_range("HEALTH_INTERVAL_SECS", self.interval_secs, 1..=7 * 24 * 60 * 60)?;
        check_range("HEALTH_TIMEOUT_SECS", self.timeout_secs, 1..=5 * 60)?;
        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Who the bot is according to the Telegram Bot API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotIdentity {
    pub id: u64,
    pub username: Option<String>,
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(f, "@{username} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Lightweight request that proves the external API is reachable and
/// accepts our credentials.
#[async_trait]
pub trait IdentityCheck: Send + Sync {
    async fn identify(&self) -> Result<BotIdentity>;
}

#[derive(Debug, Clone)]
pub enum HealthStatus {
    /// No check has finished yet
    Unknown,
    Healthy {
        identity: BotIdentity,
        checked_at: DateTime<Utc>,
    },
    Unhealthy {
        error: Error,
        consecutive_failures: u32,
        checked_at: DateTime<Utc>,
    },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

pub struct HealthProber<C> {
    check: C,
    interval: Duration,
    failure_threshold: u32,
    consecutive_failures: u32,
    status: watch::Sender<HealthStatus>,
}

impl<C: IdentityCheck> HealthProber<C> {
    pub fn new(check: C, config: &HealthConfig) -> Self {
        let (status, _) = watch::channel(HealthStatus::Unknown);
        Self {
            check,
            interval: config.interval(),
            failure_threshold: config.failure_threshold,
            consecutive_failures: 0,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }

    /// Runs the check once, logs and publishes the result
    pub async fn probe_once(&mut self) -> Result<BotIdentity> {
        let (result, duration) = self.check.identify().with_duration().await;

        metrics::histogram!(HEALTH_CHECK_DURATION_SECONDS, duration.as_secs_f64());

        let duration = tracing_duration(duration);
        let checked_at = Utc::now();

        match &result {
            Ok(identity) => {
                self.consecutive_failures = 0;
                metrics::increment_counter!(HEALTH_CHECKS_TOTAL, "result" => "ok");
                info!(bot = %identity, duration, "Health check passed");

                self.status.send_replace(HealthStatus::Healthy {
                    identity: identity.clone(),
                    checked_at,
                });
            }
            Err(err) => {
                self.consecutive_failures += 1;
                metrics::increment_counter!(HEALTH_CHECKS_TOTAL, "result" => "err");
                error!(
                    err = tracing_err(err),
                    consecutive_failures = self.consecutive_failures,
                    duration,
                    "Health check failed"
                );

                self.status.send_replace(HealthStatus::Unhealthy {
                    error: err.clone(),
                    consecutive_failures: self.consecutive_failures,
                    checked_at,
                });
            }
        }

        result
    }

    /// Checks the health every interval forever. Returns only when the number
    /// of consecutive failures reaches the threshold.
    pub async fn run(mut self) -> Result<Infallible> {
        info!(
            interval = tracing_duration(self.interval),
            failure_threshold = self.failure_threshold,
            "Starting the health prober"
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let Err(last_error) = self.probe_once().await else {
                continue;
            };

            if self.failure_threshold == 0 || self.consecutive_failures < self.failure_threshold {
                continue;
            }

            return Err(HealthError::Unhealthy {
                consecutive_failures: self.consecutive_failures,
                last_error,
            }
            .into());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fatal;
    use assert_matches::assert_matches;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Replays the scripted results, then keeps returning the last one
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedCheck {
        script: Arc<Mutex<VecDeque<bool>>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedCheck {
        pub(crate) fn new(script: impl IntoIterator<Item = bool>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into_iter().collect())),
                calls: Default::default(),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityCheck for ScriptedCheck {
        async fn identify(&self) -> Result<BotIdentity> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let reachable = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().copied().unwrap_or(true)
                }
            };

            if !reachable {
                return Err(fatal!("api.telegram.org is unreachable"));
            }

            Ok(BotIdentity {
                id: 42,
                username: Some("tube_bot".to_owned()),
            })
        }
    }

    fn config(failure_threshold: u32) -> HealthConfig {
        HealthConfig {
            interval_secs: 3600,
            timeout_secs: 30,
            failure_threshold,
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn reachable_dependency_reports_healthy_every_interval() {
        let check = ScriptedCheck::new([true]);
        let prober = HealthProber::new(check.clone(), &config(3));
        let mut status = prober.subscribe();
        let task = tokio::spawn(prober.run());

        let mut last = Instant::now();
        for _ in 0..5 {
            status.changed().await.unwrap();
            assert!(status.borrow_and_update().is_healthy());
            assert_eq!(last.elapsed(), Duration::from_secs(3600));
            last = Instant::now();
        }

        assert_eq!(check.calls(), 5);
        assert!(!task.is_finished());
        task.abort();
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn unreachable_dependency_is_only_logged_without_threshold() {
        let check = ScriptedCheck::new([false]);
        let prober = HealthProber::new(check.clone(), &config(0));
        let mut status = prober.subscribe();
        let task = tokio::spawn(prober.run());

        for expected in 1..=10 {
            status.changed().await.unwrap();
            let consecutive = match &*status.borrow_and_update() {
                HealthStatus::Unhealthy {
                    consecutive_failures,
                    ..
                } => *consecutive_failures,
                other => panic!("Unexpected status: {other:?}"),
            };
            assert_eq!(consecutive, expected);
        }

        assert!(!task.is_finished());
        task.abort();
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn gives_up_after_consecutive_failures() {
        let check = ScriptedCheck::new([false, false, true, false, false, false]);
        let prober = HealthProber::new(check.clone(), &config(3));

        let started = Instant::now();
        let err = prober.run().await.unwrap_err();

        // The success in the middle resets the counter
        assert_eq!(check.calls(), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(6 * 3600));
        assert_matches!(
            err.kind(),
            crate::ErrorKind::Health {
                source: HealthError::Unhealthy {
                    consecutive_failures: 3,
                    ..
                }
            }
        );
    }

    #[tokio::test]
    async fn probe_once_publishes_status() {
        let check = ScriptedCheck::new([true]);
        let mut prober = HealthProber::new(check, &config(3));
        let status = prober.subscribe();

        assert_matches!(*status.borrow(), HealthStatus::Unknown);

        let identity = prober.probe_once().await.unwrap();
        assert_eq!(identity.to_string(), "@tube_bot (42)");
        assert!(status.borrow().is_healthy());
    }

    #[test]
    fn config_validation() {
        let err = HealthConfig {
            interval_secs: 0,
            ..config(3)
        }
        .validate()
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "HEALTH_INTERVAL_SECS must be in range 1..=604800, but got 0"
        );
    }
}
