mod ext;
mod macros;

use crate::prelude::*;
use crate::util::DynError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing_error::SpanTrace;

pub use ext::{OptionExt, ResultExt};
pub(crate) use macros::*;

pub(crate) mod prelude {
    pub(crate) use super::ext::{OptionExt as _, ResultExt as _};
}

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Exit code reported when the process can't start because of bad configuration.
/// Matches `EX_CONFIG` from `sysexits.h`, so that service managers can be told
/// not to restart the process (e.g. `RestartPreventExitStatus=78` in systemd).
pub const EXIT_CODE_CONFIG: u8 = 78;

/// Exit code for any other failure, that is worth restarting the process for.
pub const EXIT_CODE_FAILURE: u8 = 1;

/// Describes any possible error that may happen in the application lifetime.
#[derive(Clone)]
pub struct Error {
    imp: Arc<ErrorImp>,
}

struct ErrorImp {
    /// Small identifier used for debugging purposes.
    /// It is mentioned in the logs, so that it's easy to correlate the
    /// error reported by the supervisor with the records of the child.
    id: String,
    kind: ErrorKind,

    // Participates only in debug impl
    spantrace: SpanTrace,
}

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error(transparent)]
    Config {
        #[from]
        source: crate::config::ConfigError,
    },

    #[error(transparent)]
    Tg {
        #[from]
        source: teloxide::RequestError,
    },

    #[error(transparent)]
    Health {
        #[from]
        source: crate::health::HealthError,
    },

    #[error(transparent)]
    Supervisor {
        #[from]
        source: crate::supervisor::SupervisorError,
    },

    #[error(transparent)]
    Backup {
        #[from]
        source: crate::backup::BackupError,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: IoError,
    },

    /// Unrecoverable kind of error, that is not supposed to happen, but when
    /// it happens we can't do anything reasonable about it, so no structural
    /// error handling is possible, this error is just propagated to the top.
    #[error("FATAL: {message}")]
    Fatal {
        message: String,
        source: Option<Box<DynError>>,
    },
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io { source: err.into() }
    }
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("Failed to prepare the working directory {path:?}")]
    PrepareWorkdir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Other {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub fn id(&self) -> &str {
        &self.imp.id
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.imp.kind
    }

    /// Configuration errors can't be fixed by restarting the process.
    pub fn is_config_error(&self) -> bool {
        matches!(self.imp.kind, ErrorKind::Config { .. })
    }

    /// Process exit code that should be reported when this error reaches
    /// the top of the `main` function.
    pub fn exit_code(&self) -> u8 {
        if self.is_config_error() {
            EXIT_CODE_CONFIG
        } else {
            EXIT_CODE_FAILURE
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error (id: {}): {}", self.imp.id, self.imp.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.imp.kind.source()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)?;
        fmt::Display::fmt(&self.imp.spantrace, f)
    }
}

impl<T: Into<ErrorKind>> From<T> for Error {
    #[track_caller]
    fn from(kind: T) -> Self {
        let imp = ErrorImp {
            kind: kind.into(),
            id: nanoid::nanoid!(6),
            spantrace: SpanTrace::capture(),
        };

        let err = Self { imp: Arc::new(imp) };

        trace!(err = tracing_err(&err), "Created an error");

        err
    }
}
