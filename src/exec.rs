//! Shelled-out command helper.
//!
//! Both container backends are driven through their CLI tools (`kubectl`,
//! `docker`), so every backend call funnels through [`exec`]: run the
//! command, capture stdout+stderr, and turn a non-zero exit into a typed
//! error carrying the full command line and output for diagnosis.

use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Runs `argv`, waits for it to finish and returns its stdout.
///
/// Fails with [`Error::BackendCommandFailed`] on a non-zero exit code; the
/// error carries both stdout and stderr so the operator can see what the
/// tool reported.
pub async fn exec(argv: &[&str]) -> Result<String> {
    debug_assert!(!argv.is_empty());
    debug!("exec: {}", argv.join(" "));
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .output()
        .await
        .map_err(|e| Error::BackendCommandFailed {
            command: argv.join(" "),
            exit_code: -1,
            output: format!("failed to spawn: {e}"),
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let mut combined = stdout;
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(Error::BackendCommandFailed {
            command: argv.join(" "),
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        });
    }
    Ok(stdout)
}

/// Splits a line on runs of whitespace. Used when parsing tabular CLI
/// output (`kubectl get pods`, `docker stats`).
pub(crate) fn split_by_whitespace(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let out = exec(&["echo", "hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_is_typed() {
        let err = exec(&["false"]).await.unwrap_err();
        match err {
            Error::BackendCommandFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "false");
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
