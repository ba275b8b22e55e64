mod error;
mod observability;
mod tg;
mod workdir;

pub mod backup;
pub mod check;
pub mod cli;
pub mod config;
pub mod health;
pub mod runtime;
pub mod service_unit;
pub mod supervisor;
pub mod util;

pub use crate::error::*;
pub use config::{BotConfig, BotToken, Config, ConfigError, TgConfig};
pub use observability::{
    init_logging, init_metrics, tracing_err, LoggingConfig, LoggingTask, MetricsConfig,
};

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}
