//! Preflight validation of the deployment, meant to be run by a human (or a
//! CI job) before the service is started.

use crate::config::Config;
use crate::health::IdentityCheck;
use crate::prelude::*;
use crate::tg::TelegramIdentity;
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Probe {
    Ok { details: String },

    /// The bot can work, but some of its features are degraded
    Warning { message: String },

    Error { message: String },
}

#[derive(Debug, Serialize)]
pub struct BotSummary {
    pub bot_id: String,
    pub max_filesize: String,
    pub temp_dir: PathBuf,
    pub api_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub bot: BotSummary,
    pub telegram: Probe,
    pub ffmpeg: Probe,

    #[serde(skip)]
    failure: Option<Error>,
}

impl CheckReport {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).fatal_ctx(|| "Failed to serialize the check report")
    }

    /// Returns the first hard failure found during the check, if any
    pub fn into_result(self) -> Result {
        self.failure.map_or(Ok(()), Err)
    }
}

pub async fn check(config: &Config) -> Result<CheckReport> {
    let identity = TelegramIdentity::new(&config.tg, config.health.timeout())?;
    Ok(check_with(config, &identity).await)
}

async fn check_with(config: &Config, identity: &impl IdentityCheck) -> CheckReport {
    let bot = BotSummary {
        bot_id: config.tg.token.bot_id().to_owned(),
        max_filesize: crate::util::display::human_size(config.bot.max_filesize_bytes()),
        temp_dir: config.bot.temp_dir.clone(),
        api_url: config.tg.api_url.as_ref().map(ToString::to_string),
    };

    let mut failure = None;

    let telegram = match identity.identify().await {
        Ok(me) => Probe::Ok {
            details: format!("authorized as {me}"),
        },
        Err(err) => {
            let message = err.display_chain().to_string();
            failure = Some(err);
            Probe::Error { message }
        }
    };

    let ffmpeg = probe_ffmpeg(&config.bot.ffmpeg_path).await;

    CheckReport {
        bot,
        telegram,
        ffmpeg,
        failure,
    }
}

async fn probe_ffmpeg(ffmpeg_path: &str) -> Probe {
    match crate::util::process::run_utf8(ffmpeg_path, &["-version"]).await {
        Ok(output) => Probe::Ok {
            details: output.lines().next().unwrap_or_default().trim().to_owned(),
        },
        Err(err) => {
            warn!(err = tracing_err(&err), "ffmpeg is not available");
            Probe::Warning {
                message: format!(
                    "`{ffmpeg_path} -version` failed, audio will be sent without conversion to MP3"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{vars, TEST_TOKEN};
    use crate::health::tests::ScriptedCheck;
    use assert_matches::assert_matches;

    fn config(ffmpeg_path: &str) -> Config {
        Config::from_vars(vars(&[
            ("TELEGRAM_BOT_TOKEN", TEST_TOKEN),
            ("FFMPEG_PATH", ffmpeg_path),
        ]))
        .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn missing_ffmpeg_is_only_a_warning() {
        let config = config("/nonexistent/ffmpeg");

        let report = check_with(&config, &ScriptedCheck::new([true])).await;

        assert_matches!(&report.telegram, Probe::Ok { details } if details == "authorized as @tube_bot (42)");
        assert_matches!(report.ffmpeg, Probe::Warning { .. });
        assert_eq!(report.bot.bot_id, "123456789");
        assert_eq!(report.bot.max_filesize, "50 MiB");

        let yaml = report.to_yaml().unwrap();
        assert!(yaml.contains("status: warning"), "{yaml}");
        assert!(!yaml.contains(TEST_TOKEN), "{yaml}");

        report.into_result().unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn unreachable_api_fails_the_check() {
        let config = config("/nonexistent/ffmpeg");

        let report = check_with(&config, &ScriptedCheck::new([false])).await;

        assert_matches!(report.telegram, Probe::Error { .. });
        assert!(report.into_result().is_err());
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn reports_ffmpeg_version_line() {
        // `echo -version` prints its argument and exits successfully,
        // which is enough to imitate a working binary
        let report = check_with(&config("echo"), &ScriptedCheck::new([true])).await;

        assert_matches!(report.ffmpeg, Probe::Ok { details } if details == "-version");
    }
}
