use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::prelude::*;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        error!("Exitting with an error...\n{err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    xtask::run()
}
