use crate::prelude::*;
use crate::{fatal, Result};
use std::process::Stdio;

/// Runs the program to completion and returns its stdout.
/// Non-zero exit status is reported as an error.
pub(crate) async fn run(program: &str, args: &[&str]) -> Result<Vec<u8>> {
    let display_cmd = display_cmd(program, args)?;

    debug!(cmd = %display_cmd, "Running program");

    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .fatal_ctx(|| format!("Invocation failed. Command:\n`{display_cmd}`"))?;

    let status = output.status;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(fatal!(
            "{program} invocation failed with status {status}. Command:\n{display_cmd}\n\
            Stderr:\n{stderr}"
        ));
    }

    Ok(output.stdout)
}

pub(crate) async fn run_utf8(program: &str, args: &[&str]) -> Result<String> {
    let bytes = run(program, args).await?;
    String::from_utf8(bytes).fatal_ctx(|| {
        format!(
            "Bad output (invalid UTF-8).\n\
            Program: {program}.\n\
            Args: {args:?}.\n"
        )
    })
}

/// Renders the command line the way it would be typed in a shell
pub(crate) fn display_cmd(program: &str, args: &[&str]) -> Result<String> {
    let parts = std::iter::once(program).chain(args.iter().copied());
    shlex::try_join(parts).fatal_ctx(|| {
        format!("Couldn't run program that contains a nul byte: {program:?} {args:?}")
    })
}
