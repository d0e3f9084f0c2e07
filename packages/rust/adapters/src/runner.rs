//! Child-process execution bounded by a timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use luna_shared::{LunaError, Result};
use tokio::process::Command;

/// Lines of stderr kept in failure messages.
const STDERR_TAIL_LINES: usize = 5;

/// A fully built command line.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl std::fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn status_label(&self) -> String {
        match self.status {
            Some(code) => format!("status {code}"),
            None => "signal".to_string(),
        }
    }

    /// The last few non-empty stderr lines, joined.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        let tail = lines[start..].join(" | ");
        if tail.is_empty() {
            "no error output".to_string()
        } else {
            tail
        }
    }
}

/// Spawn `spec` and wait for it, killing the child when `timeout` elapses.
#[tracing::instrument(skip_all, fields(program = %spec.program.display()))]
pub async fn run(spec: &ProcessSpec, timeout: Duration) -> Result<ProcessOutput> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let child = command.spawn().map_err(|e| {
        LunaError::execution(format!("failed to spawn {}: {e}", spec.program.display()))
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let output = ProcessOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            tracing::debug!(status = ?output.status, "process finished");
            Ok(output)
        }
        Ok(Err(e)) => Err(LunaError::execution(format!(
            "failed waiting for {}: {e}",
            spec.program.display()
        ))),
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs(), "process timed out, killed");
            Err(LunaError::Timeout(timeout))
        }
    }
}
