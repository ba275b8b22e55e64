use crate::config::{from_vars, ConfigError};
use crate::observability::GLOBAL_LABELS;
use crate::prelude::*;
use crate::Result;
use serde::Deserialize;
use serde_with::serde_as;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Keeps the background parts of the logging system alive.
/// Must be shut down at the end of `main` to flush the buffered records.
pub struct LoggingTask {
    file_guard: Option<WorkerGuard>,
    loki: Option<LokiTask>,
}

struct LokiTask {
    task: tokio::task::JoinHandle<()>,
    controller: tracing_loki::BackgroundTaskController,
}

impl LoggingTask {
    pub async fn shutdown(self) {
        if let Some(loki) = self.loki {
            info!("Waiting for the logging task to finish nicely...");

            let ((), duration) = loki.controller.shutdown().with_duration().await;

            eprintln!(
                "Stopped logging task in {:.2?}: {:?}",
                duration,
                loki.task.await
            );
        }

        // Dropping the guard flushes the records that are still buffered
        // in the non-blocking file writer
        drop(self.file_guard);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directives, e.g. `info,tubewarden=debug`
    #[serde(default = "default_log_filter")]
    bot_log: String,

    /// Log file path. The file name is used as a prefix for rotated files.
    log_file: Option<PathBuf>,

    #[serde(default)]
    log_rotation: LogRotation,

    /// Number of rotated log files to keep, `0` keeps all of them
    #[serde(default = "default_log_max_files")]
    log_max_files: usize,

    loki_url: Option<url::Url>,

    #[serde_as(as = "Option<serde_with::json::JsonString>")]
    #[serde(default)]
    loki_labels: Option<HashMap<String, String>>,
}

fn default_log_filter() -> String {
    "info".to_owned()
}

fn default_log_max_files() -> usize {
    14
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub(crate) fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        from_vars("", vars)
    }
}

pub fn init_logging(config: LoggingConfig) -> Result<LoggingTask> {
    config.init_logging()
}

impl LoggingConfig {
    fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        EnvFilter::try_new(&self.bot_log).map_err(|source| ConfigError::LogFilter {
            directives: self.bot_log.clone(),
            source,
        })
    }

    fn init_logging(self) -> Result<LoggingTask> {
        let env_filter = self.env_filter()?;

        let colors = std::env::var("COLORS").as_deref() != Ok("0");

        let fmt = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(colors)
            .with_writer(std::io::stderr);

        let (file, file_guard) = match &self.log_file {
            Some(path) => {
                let appender = self.file_appender(path)?;
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (Some(plain_text_layer(writer)), Some(guard))
            }
            None => (None, None),
        };

        let (loki, loki_task) = match &self.loki_url {
            Some(url) => {
                let mut labels = self
                    .loki_labels
                    .iter()
                    .flatten()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .chain(GLOBAL_LABELS.iter().copied());

                let (layer, controller, task) = labels
                    .try_fold(tracing_loki::builder(), |builder, (key, value)| {
                        builder.label(key, value)
                    })
                    .and_then(|builder| builder.build_controller_url(url.clone()))
                    .fatal_ctx(|| format!("Failed to set up the Loki log sink at {url}"))?;

                let task = tokio::spawn(task);
                (Some(layer), Some(LokiTask { task, controller }))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(fmt)
            .with(file)
            .with(loki)
            .with(env_filter)
            .with(tracing_error::ErrorLayer::default())
            .try_init()
            .fatal_ctx(|| "Failed to install the global tracing subscriber")?;

        init_panic_hook();

        Ok(LoggingTask {
            file_guard,
            loki: loki_task,
        })
    }

    fn file_appender(&self, path: &Path) -> Result<RollingFileAppender> {
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let file_name = path
            .file_name()
            .fatal_ctx(|| format!("Log file path has no file name: {path:?}"))?;

        let rotation = match self.log_rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        };

        let mut builder = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(file_name.to_string_lossy());

        if self.log_max_files > 0 && self.log_rotation != LogRotation::Never {
            builder = builder.max_log_files(self.log_max_files);
        }

        builder
            .build(directory)
            .fatal_ctx(|| format!("Failed to open the log file {path:?}"))
    }
}

/// `<timestamp> <LEVEL> <target>: <message> <fields>` without colors
fn plain_text_layer<S, W>(writer: W) -> tracing_subscriber::fmt::Layer<S, DefaultFields, Format, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
}

fn init_panic_hook() {
    let current_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        // It's super-important to call the default panic hook, otherwise
        // we may not see it in the logs at all, because the panic may
        // happen inside of `tracing` logging system itself.
        current_hook(panic_info);

        let location = panic_info.location().map(|location| {
            format!(
                "{}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            )
        });

        // If the panic message was formatted using interpolated values,
        // it will be a `String`. Otherwise, it will be a `&str`.
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<String>()
            .map(<_>::deref)
            .or_else(|| payload.downcast_ref::<&str>().map(<_>::deref))
            .unwrap_or("<unknown>");

        let span_trace = tracing_error::SpanTrace::capture();

        error!(
            target: "panic",
            thread = std::thread::current().name(),
            location,
            span_trace = %span_trace,
            "{message}"
        );
    }));
}
