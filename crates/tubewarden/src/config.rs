use crate::health::HealthConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use thiserror::Error;

/// Telegram refuses uploads bigger than this for bots that use the
/// self-hosted Bot API server, so there is no reason to allow more.
const MAX_FILESIZE_MB_RANGE: RangeInclusive<u64> = 1..=2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "TELEGRAM_BOT_TOKEN is not set. Put it into the environment or the `.env` file \
        in the working directory"
    )]
    MissingBotToken,

    #[error("TELEGRAM_BOT_TOKEN doesn't look like a bot token (expected `<bot_id>:<secret>`): {token:?}")]
    InvalidBotToken { token: BotToken },

    #[error("The bot token was rejected by Telegram: {token:?}")]
    RejectedBotToken {
        token: BotToken,
        source: teloxide::RequestError,
    },

    #[error("{var} must be in range {range:?}, but got {value}")]
    OutOfRange {
        var: &'static str,
        value: u64,
        range: RangeInclusive<u64>,
    },

    #[error("Invalid value of {var}: {value:?}, expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid log filter directives in BOT_LOG: {directives:?}")]
    LogFilter {
        directives: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Couldn't load config {target} from environment variables with prefix {prefix:?}")]
    Env {
        target: &'static str,
        prefix: &'static str,
        source: envy::Error,
    },
}

/// Configuration of the bot host process. It is read once at startup and
/// stays immutable for the whole lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    pub tg: TgConfig,
    pub bot: BotConfig,
    pub health: HealthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`Config::from_env`], but reads the variables from the given
    /// iterator instead of the process environment.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let vars: Vec<_> = vars.into_iter().collect();

        let tg: TgEnv = from_vars("TELEGRAM_", vars.iter().cloned())?;
        let bot: BotConfig = from_vars("", vars.iter().cloned())?;
        let health: HealthConfig = from_vars("HEALTH_", vars)?;

        let config = Self {
            tg: tg.validate()?,
            bot: bot.validate()?,
            health: health.validate()?,
        };

        Ok(config)
    }
}

#[derive(Deserialize)]
struct TgEnv {
    bot_token: Option<String>,
    api_url: Option<url::Url>,
}

impl TgEnv {
    fn validate(self) -> Result<TgConfig, ConfigError> {
        let token = self.bot_token.ok_or(ConfigError::MissingBotToken)?;
        Ok(TgConfig {
            token: BotToken::parse(&token)?,
            api_url: self.api_url,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TgConfig {
    pub token: BotToken,

    /// Overrides the Bot API server URL, e.g. for a self-hosted Bot API server
    pub api_url: Option<url::Url>,
}

/// Telegram bot token. Its [`fmt::Debug`] and [`fmt::Display`] impls never
/// reveal the secret part, so it's safe to log.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn parse(token: &str) -> Result<Self, ConfigError> {
        let token = token.trim();

        if token.is_empty() {
            return Err(ConfigError::MissingBotToken);
        }

        let token = Self(token.to_owned());

        if !lazy_regex::regex_is_match!(r"^\d+:[A-Za-z0-9_-]+$", &token.0) {
            return Err(ConfigError::InvalidBotToken { token });
        }

        Ok(token)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Numeric part of the token, which is the public ID of the bot
    pub fn bot_id(&self) -> &str {
        self.0.split_once(':').map(|(id, _)| id).unwrap_or("")
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(':') {
            Some((id, _)) => write!(f, "{id}:***"),
            None => f.write_str("***"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Maximum size of a file the bot is allowed to send, in megabytes
    #[serde(default = "default_max_filesize_mb")]
    pub max_filesize_mb: u64,

    /// Directory where the downloads of the bot are stored temporarily
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Media-processing binary needed for audio conversion
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

fn default_max_filesize_mb() -> u64 {
    50
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp_downloads")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_owned()
}

impl BotConfig {
    fn validate(self) -> Result<Self, ConfigError> {
        check_range("MAX_FILESIZE_MB", self.max_filesize_mb, MAX_FILESIZE_MB_RANGE)?;
        Ok(self)
    }

    pub fn max_filesize_bytes(&self) -> u64 {
        self.max_filesize_mb * 1024 * 1024
    }
}

pub(crate) fn check_range(
    var: &'static str,
    value: u64,
    range: RangeInclusive<u64>,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(ConfigError::OutOfRange { var, value, range })
}

pub(crate) fn from_env<T: DeserializeOwned>(prefix: &'static str) -> Result<T, ConfigError> {
    from_vars(prefix, std::env::vars())
}

pub(crate) fn from_vars<T: DeserializeOwned>(
    prefix: &'static str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<T, ConfigError> {
    envy::prefixed(prefix)
        .from_iter(vars)
        .map_err(|source| ConfigError::Env {
            target: std::any::type_name::<T>(),
            prefix,
            source,
        })
}
