//! External programs the engine shells out to (ping, masscan, amass).
//!
//! Components hold an `Arc<dyn ExternalTool>` so the production
//! [`SystemTool`] can be swapped for a canned implementation in tests.
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;

/// Why an external tool did not produce usable output.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The binary is not on the search path.
    #[error("{0} not found in PATH")]
    NotFound(String),

    /// The process could not be started.
    #[error("failed to launch {tool}: {source}")]
    Launch {
        /// Program name.
        tool: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// An input file for the process could not be written.
    #[error("failed to prepare input file for {tool}: {source}")]
    InputFile {
        /// Program name.
        tool: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process did not finish in time and was killed.
    #[error("{tool} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Program name.
        tool: String,
        /// The limit that was exceeded.
        after: Duration,
    },

    /// The process exited unsuccessfully.
    #[error("{tool} exited with {code:?}: {stderr}")]
    Failed {
        /// Program name.
        tool: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
}

/// A one-shot external program with a hard timeout.
#[async_trait]
pub trait ExternalTool: Send + Sync {
    /// Name used in notices.
    fn name(&self) -> &str;

    /// Whether the program can be launched at all.
    fn available(&self) -> bool;

    /// Runs the program with `args`. Non-zero exit, launch failure and
    /// timeout are all errors.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// A program resolved from `PATH` and run with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemTool {
    program: String,
}

impl SystemTool {
    /// Wraps `program`, looked up on `PATH` at run time.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Full path of the program, if it is on `PATH`.
    pub fn locate(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.is_file().then(|| program.to_path_buf());
        }

        let paths = env::var_os("PATH")?;
        env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(&self.program);
            if candidate.is_file() {
                return Some(candidate);
            }
            if cfg!(windows) {
                let exe = candidate.with_extension("exe");
                if exe.is_file() {
                    return Some(exe);
                }
            }
            None
        })
    }
}

#[async_trait]
impl ExternalTool for SystemTool {
    fn name(&self) -> &str {
        &self.program
    }

    fn available(&self) -> bool {
        self.locate().is_some()
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError> {
        let path = self
            .locate()
            .ok_or_else(|| ToolError::NotFound(self.program.clone()))?;

        debug!("Running {} {}", path.display(), args.join(" "));
        let child = Command::new(&path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Launch {
                tool: self.program.clone(),
                source,
            })?;

        let output = match time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ToolError::Launch {
                    tool: self.program.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool: self.program.clone(),
                    after: timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_not_available() {
        let tool = SystemTool::new("definitely-not-a-real-binary-7f3a");
        assert!(!tool.available());
        assert!(tool.locate().is_none());
    }

    #[tokio::test]
    async fn missing_program_run_reports_not_found() {
        let tool = SystemTool::new("definitely-not-a-real-binary-7f3a");
        let err = tool.run(&[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_of_successful_run() {
        let tool = SystemTool::new("echo");
        let out = tool
            .run(&["open tcp 80 10.0.0.5".to_owned()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "open tcp 80 10.0.0.5");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let tool = SystemTool::new("false");
        let err = tool.run(&[], Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed { code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_program_times_out() {
        let tool = SystemTool::new("sleep");
        let err = tool
            .run(&["5".to_owned()], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
