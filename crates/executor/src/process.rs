//! Subprocess execution with live output streaming.

use crate::Result;
use std::process::Stdio;
use terrakube_logs::LogStream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Run a command, streaming stdout and stderr line by line into the log
/// stream. Returns the process exit code (-1 when killed by a signal).
pub async fn run_streamed(cmd: &mut Command, stream: &mut LogStream) -> Result<i32> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => match line? {
                Some(line) => stream.write_line(&line).await?,
                None => out_done = true,
            },
            line = err_lines.next_line(), if !err_done => match line? {
                Some(line) => stream.write_line(&line).await?,
                None => err_done = true,
            },
        }
    }

    let status = child.wait().await?;
    Ok(status.code().unwrap_or(-1))
}

/// Run a command and capture stdout, failing on a non-zero exit with the
/// stderr tail.
pub async fn run_captured(cmd: &mut Command) -> Result<String> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(crate::Error::build(
            format!(
                "{:?}: {}",
                cmd.as_std().get_program(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            output.status.code().unwrap_or(-1),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_streamed_captures_both_pipes() {
        let mut stream = LogStream::console();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2"]);

        let code = run_streamed(&mut cmd, &mut stream).await.unwrap();
        assert_eq!(code, 0);
        assert!(stream.contents().contains("out"));
        assert!(stream.contents().contains("err"));
    }

    #[tokio::test]
    async fn test_run_streamed_exit_code() {
        let mut stream = LogStream::console();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 2"]);
        assert_eq!(run_streamed(&mut cmd, &mut stream).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_captured() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello"]);
        assert_eq!(run_captured(&mut cmd).await.unwrap(), "hello");

        let mut failing = Command::new("sh");
        failing.args(["-c", "echo broken 1>&2; exit 1"]);
        let err = run_captured(&mut failing).await.unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
    }
}
