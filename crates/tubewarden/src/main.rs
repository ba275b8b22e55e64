use clap::Parser;
use futures::prelude::*;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tracing::error;
use tubewarden::{tracing_err, LoggingConfig, MetricsConfig};

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    let args = tubewarden::cli::Args::parse();

    let logging_task = match LoggingConfig::from_env()
        .map_err(tubewarden::Error::from)
        .and_then(tubewarden::init_logging)
    {
        Ok(task) => task,
        Err(err) => {
            eprintln!("Failed to initialize logging: {err:?}");
            return ExitCode::from(err.exit_code());
        }
    };

    let main_fut = AssertUnwindSafe(async {
        let result = try_main(args).await;

        result.map(|()| ExitCode::SUCCESS).unwrap_or_else(|err| {
            error!(
                err = tracing_err(&err),
                exit_code = err.exit_code(),
                "Exitting with an error..."
            );
            ExitCode::from(err.exit_code())
        })
    })
    .catch_unwind()
    .unwrap_or_else(|_| {
        error!("Exitting due to a panic...");
        ExitCode::FAILURE
    });

    let exit_code = main_fut.await;

    logging_task.shutdown().await;

    exit_code
}

async fn try_main(args: tubewarden::cli::Args) -> tubewarden::Result {
    tubewarden::init_metrics(MetricsConfig::from_env()?)?;
    args.run().await
}
