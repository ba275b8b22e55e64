//! The bot host process: what `tubewarden run` does from start to exit.

use crate::config::Config;
use crate::health::{HealthProber, HealthStatus, IdentityCheck};
use crate::prelude::*;
use crate::tg::TelegramIdentity;
use crate::util::display::human_duration;
use crate::{workdir, Result};
use chrono::prelude::*;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Runs the bot host until `shutdown` resolves or the bot becomes unhealthy
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result {
    let identity = TelegramIdentity::new(&config.tg, config.health.timeout())?;
    serve(&config, identity, shutdown).await
}

async fn serve<C: IdentityCheck>(
    config: &Config,
    check: C,
    shutdown: impl Future<Output = ()>,
) -> Result {
    let report = workdir::prepare(&config.bot.temp_dir).await?;

    debug!(?report, "Working directory is prepared");

    // Fail fast if the token is wrong, before the bot says it's ready
    let me = check.identify().await?;

    info!(
        bot = %me,
        max_filesize = %crate::util::display::human_size(config.bot.max_filesize_bytes()),
        temp_dir = ?config.bot.temp_dir,
        "Bot is ready"
    );

    let prober = HealthProber::new(check, &config.health);
    let transitions = log_health_transitions(prober.subscribe());

    // The status channel closes when the prober returns
    let health = async { tokio::join!(prober.run(), transitions).0 };

    tokio::select! {
        result = health => match result {
            Ok(never) => match never {},
            Err(err) => Err(err),
        },
        () = shutdown => {
            info!("Bot host is shutting down");
            Ok(())
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Transition {
    BecameUnhealthy,
    Recovered { downtime: Duration },
}

/// Remembers when the bot stopped being healthy. The readiness check has
/// already passed when the tracking starts, so the bot starts as healthy.
#[derive(Debug, Default)]
struct HealthTracker {
    unhealthy_since: Option<DateTime<Utc>>,
}

impl HealthTracker {
    fn observe(&mut self, status: &HealthStatus) -> Option<Transition> {
        match status {
            HealthStatus::Unknown => None,
            HealthStatus::Unhealthy { checked_at, .. } => {
                if self.unhealthy_since.is_some() {
                    return None;
                }
                self.unhealthy_since = Some(*checked_at);
                Some(Transition::BecameUnhealthy)
            }
            HealthStatus::Healthy { checked_at, .. } => {
                let since = self.unhealthy_since.take()?;
                let downtime = (*checked_at - since).to_std().unwrap_or_default();
                Some(Transition::Recovered { downtime })
            }
        }
    }
}

/// The prober logs every check. This logs only the moments when the health
/// changes, so that an outage is easy to find in the logs.
async fn log_health_transitions(mut status: watch::Receiver<HealthStatus>) {
    let mut tracker = HealthTracker::default();

    while status.changed().await.is_ok() {
        let status = status.borrow_and_update();

        match tracker.observe(&status) {
            Some(Transition::BecameUnhealthy) => {
                warn!("The bot became unhealthy, the Telegram Bot API is not reachable");
            }
            Some(Transition::Recovered { downtime }) => {
                info!(
                    downtime = %human_duration(downtime),
                    "The bot is healthy again"
                );
            }
            None => {}
        }
    }
}
