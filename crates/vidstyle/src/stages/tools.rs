//! Runs external media tools (ffmpeg, ffprobe, yt-dlp) and captures their
//! output.

use std::ffi::OsStr;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::ToolError;

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A configured executable, e.g. `ffmpeg` or `/opt/bin/yt-dlp`.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: String,
}

impl ToolRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the tool to completion. A non-zero exit status is an error that
    /// carries the tail of stderr.
    pub fn run<I, S>(&self, args: I) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %self.program, "Running external tool");

        let output = command.output().map_err(|e| ToolError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|code| format!("exit code {}", code))
                .unwrap_or_else(|| "a signal".to_string());
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status,
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
