//! Local subprocess execution.

use crate::errors::StageExecutionError;
use std::path::Path;
use std::process::Stdio;

/// Runs a command through the shell, capturing stdout/stderr to
/// per-stage dump files in `log_dir`. Returns the (zero) exit code.
pub(crate) async fn run_local(
    stage: &str,
    command: &str,
    log_dir: &Path,
) -> Result<i32, StageExecutionError> {
    let stdout = dump_file(stage, log_dir.join(format!("{stage}.out")))?;
    let stderr = dump_file(stage, log_dir.join(format!("{stage}.err")))?;

    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .await
        .map_err(|source| StageExecutionError::Spawn {
            stage: stage.to_string(),
            source,
        })?;

    match status.code() {
        Some(0) => Ok(0),
        Some(code) => Err(StageExecutionError::NonZeroExit {
            stage: stage.to_string(),
            code,
        }),
        None => Err(StageExecutionError::Terminated {
            stage: stage.to_string(),
        }),
    }
}

fn dump_file(
    stage: &str,
    path: std::path::PathBuf,
) -> Result<std::fs::File, StageExecutionError> {
    std::fs::File::create(&path).map_err(|err| StageExecutionError::Environment {
        stage: stage.to_string(),
        reason: format!("cannot open log dump {}: {err}", path.display()),
    })
}
