//! Subprocess execution with buffered or line-streamed output.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdout, Command},
};

use crate::error::HarnessError;

/// Callback fired while a process has been silent for longer than the progress interval.
///
/// Receives the total time elapsed since the process was spawned.
pub type ProgressFn = Arc<dyn Fn(Duration) + Send + Sync>;

const READ_CHUNK_SIZE: usize = 8192;

/// Placeholder interval for the disabled progress branch.
const IDLE_FOREVER: Duration = Duration::from_secs(60 * 60 * 24);

/// Runs an external tool to completion and collects its output.
#[derive(Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    progress: Option<(Duration, ProgressFn)>,
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("envs", &self.envs)
            .field("current_dir", &self.current_dir)
            .finish_non_exhaustive()
    }
}

impl ProcessRunner {
    /// Create a runner for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            progress: None,
        }
    }

    /// Append arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the working directory of the child.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Report progress whenever no output arrived for `interval`.
    ///
    /// The callback never cancels the process.
    pub fn progress(mut self, interval: Duration, callback: ProgressFn) -> Self {
        self.progress = Some((interval, callback));
        self
    }

    fn command_line(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Spawn the process and hand back its output as line streams.
    ///
    /// The child is killed when the returned [`LineStream`] is dropped.
    pub fn spawn_lines(&self) -> anyhow::Result<LineStream> {
        tracing::debug!(
            program = %self.program.display(),
            args = ?self.args,
            "Spawning external command"
        );

        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.command_line()))?;
        let stdout = child.stdout.take().context("Child stdout was not captured")?;
        let stderr = child.stderr.take().context("Child stderr was not captured")?;

        Ok(LineStream {
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
        })
    }

    /// Run the process to completion and capture both streams, whatever the exit code.
    pub async fn output(&self) -> anyhow::Result<ProcessOutput> {
        tracing::debug!(
            program = %self.program.display(),
            args = ?self.args,
            "Running external command"
        );

        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.command_line()))?;

        let mut stdout = child.stdout.take().context("Child stdout was not captured")?;
        let mut stderr = child.stderr.take().context("Child stderr was not captured")?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_chunk = [0u8; READ_CHUNK_SIZE];
        let mut stderr_chunk = [0u8; READ_CHUNK_SIZE];
        let (mut stdout_done, mut stderr_done) = (false, false);

        let started = Instant::now();
        let (interval, progress) = match &self.progress {
            Some((interval, callback)) => (*interval, Some(callback.clone())),
            None => (IDLE_FOREVER, None),
        };

        while !(stdout_done && stderr_done) {
            tokio::select! {
                read = stdout.read(&mut stdout_chunk), if !stdout_done => {
                    match read.context("Failed to read child stdout")? {
                        0 => stdout_done = true,
                        n => stdout_buf.extend_from_slice(&stdout_chunk[..n]),
                    }
                }
                read = stderr.read(&mut stderr_chunk), if !stderr_done => {
                    match read.context("Failed to read child stderr")? {
                        0 => stderr_done = true,
                        n => stderr_buf.extend_from_slice(&stderr_chunk[..n]),
                    }
                }
                // Re-armed on every loop turn, so it only fires after `interval` of silence.
                _ = tokio::time::sleep(interval), if progress.is_some() => {
                    if let Some(callback) = &progress {
                        callback(started.elapsed());
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {}", self.command_line()))?;

        tracing::trace!(
            program = %self.program.display(),
            ?status,
            elapsed = ?started.elapsed(),
            "External command exited"
        );

        Ok(ProcessOutput {
            code: status.code(),
            success: status.success(),
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    }

    /// Build the [`HarnessError::Process`] describing a failed run of this command.
    pub fn failure(&self, output: &ProcessOutput) -> HarnessError {
        HarnessError::Process {
            code: output.code,
            stderr: output.stderr_text(),
            command: self.command_line(),
            args: self.args.clone(),
        }
    }

    /// Run the process and return its stdout.
    ///
    /// A non-zero exit code produces [`HarnessError::Process`] carrying the
    /// trimmed, ANSI-stripped stderr.
    pub async fn run(&self) -> anyhow::Result<Vec<u8>> {
        let output = self.output().await?;
        if !output.success {
            return Err(self.failure(&output).into());
        }
        Ok(output.stdout)
    }

    /// Run the process and parse its stdout as JSON.
    pub async fn run_json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let stdout = self.run().await?;
        serde_json::from_slice(&stdout).with_context(|| {
            format!(
                "Failed to parse JSON output of `{} {}`",
                self.command_line(),
                self.args.join(" ")
            )
        })
    }
}

/// A running process with line-buffered stdout and stderr.
#[derive(Debug)]
pub struct LineStream {
    pub child: Child,
    pub stdout: Lines<BufReader<ChildStdout>>,
    pub stderr: Lines<BufReader<ChildStderr>>,
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Stderr with ANSI escapes removed and surrounding whitespace trimmed.
    pub fn stderr_text(&self) -> String {
        strip_ansi(&String::from_utf8_lossy(&self.stderr))
            .trim()
            .to_string()
    }
}

/// Remove ANSI escape sequences (colors, cursor movement) from terminal output.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            // CSI: parameters and intermediates, terminated by a byte in '@'..='~'.
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
        } else {
            chars.next();
        }
    }

    out
}
