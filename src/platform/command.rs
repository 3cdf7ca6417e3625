//! External process execution for platform CLI verbs.

use std::{path::PathBuf, process::Stdio, time::Duration, time::Instant};

use async_trait::async_trait;
use metrics::histogram;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::PlatformError;

/// One CLI call. The working directory and environment are explicit so that
/// concurrent workflows never share process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new<I, S>(args: I, working_dir: PathBuf) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            working_dir,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The subcommand, safe to log; the remaining args may carry credentials.
    pub fn verb(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Combined output, trimmed to the last few kilobytes for error reporting.
    pub fn summary(&self) -> String {
        const LIMIT: usize = 2048;
        let combined = match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        };
        let count = combined.chars().count();
        if count > LIMIT {
            combined.chars().skip(count - LIMIT).collect()
        } else {
            combined
        }
    }
}

/// Runs platform CLI invocations. Non-zero exits are returned, not raised;
/// callers decide whether a failure is fatal.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, PlatformError>;
}

/// Spawns the `cf` binary.
#[derive(Debug, Clone)]
pub struct CfExecutor {
    binary: String,
    timeout: Duration,
}

impl CfExecutor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CommandExecutor for CfExecutor {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, PlatformError> {
        let verb = invocation.verb().to_string();

        let mut cmd = Command::new(&self.binary);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|source| PlatformError::Io {
            verb: verb.clone(),
            source,
        })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(PlatformError::Io { verb, source }),
            Err(_) => {
                warn!(verb = %verb, timeout_secs = self.timeout.as_secs(), "Platform command timed out");
                return Err(PlatformError::Timeout {
                    verb,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let elapsed = started.elapsed();
        histogram!("review_apps_platform_command_duration_ms", "verb" => verb.clone())
            .record(elapsed.as_secs_f64() * 1_000.0);

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            verb = %verb,
            code = ?result.code,
            elapsed_ms = elapsed.as_millis() as u64,
            "Platform command finished"
        );

        Ok(result)
    }
}
