//! Process-execution seam.
//!
//! Version-control operations never touch `std::process` directly; they go
//! through [`ProcessExecutor`] so that tests can swap in
//! [`ScriptedProcessExecutor`] and never spawn a real `git`.
//!
//! A non-zero exit status is a normal [`ProcessOutput`] at this layer. Only
//! a timeout or a failure to spawn is an error.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// A command in argv form. Never interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// A `git` invocation rooted at `repo`.
    pub fn git<I, S>(repo: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: "git".to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: Some(repo.into()),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Human-readable form for logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout and stderr, for matching benign git messages that
    /// may land on either stream.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Failures that prevented a process from producing an exit status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },
}

/// Executes commands under a hard timeout.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn exec(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError>;
}

// ── Tokio ──────────────────────────────────────────────────────────────

/// Runs real processes with `tokio::process`.
///
/// The child is killed when the timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessExecutor;

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn exec(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let started = Instant::now();
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let result = ProcessOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                debug!(
                    command = %command.display(),
                    exit_code = result.exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "process finished"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(ProcessError::Spawn {
                command: command.display(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(command = %command.display(), ?timeout, "process timed out");
                Err(ProcessError::Timeout {
                    command: command.display(),
                    timeout,
                })
            }
        }
    }
}

// ── Scripted ───────────────────────────────────────────────────────────

/// A scripted answer to a matched command.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(ProcessOutput),
    Timeout,
    SpawnError(String),
}

struct ScriptRule {
    args_prefix: Vec<String>,
    replies: VecDeque<ScriptedReply>,
}

/// In-memory executor that answers from scripted rules and records calls.
///
/// A rule matches when its argument list is a prefix of the invocation's
/// arguments; the longest matching prefix wins. Replies registered on the
/// same prefix are handed out in order and the last one repeats.
/// Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct ScriptedProcessExecutor {
    rules: Mutex<Vec<ScriptRule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for invocations starting with `args_prefix`.
    pub fn on<I, S>(&self, args_prefix: I, reply: ScriptedReply) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix: Vec<String> = args_prefix.into_iter().map(Into::into).collect();
        if let Ok(mut rules) = self.rules.lock() {
            match rules.iter_mut().find(|r| r.args_prefix == prefix) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(ScriptRule {
                    args_prefix: prefix,
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Shorthand for a successful reply with the given stdout.
    pub fn on_ok<I, S>(&self, args_prefix: I, stdout: impl Into<String>) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on(args_prefix, ScriptedReply::Output(ProcessOutput::ok(stdout)))
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of invocations whose arguments start with `args_prefix`.
    pub fn count_calls(&self, args_prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| starts_with(&c.args, args_prefix))
            .count()
    }

    fn next_reply(&self, args: &[String]) -> Option<ScriptedReply> {
        let mut rules = self.rules.lock().ok()?;
        let rule = rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.args_prefix.iter().map(String::as_str).collect();
                starts_with(args, &prefix)
            })
            .max_by_key(|r| r.args_prefix.len())?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

fn starts_with(args: &[String], prefix: &[&str]) -> bool {
    args.len() >= prefix.len() && args.iter().zip(prefix).all(|(a, p)| a == p)
}

#[async_trait]
impl ProcessExecutor for ScriptedProcessExecutor {
    async fn exec(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }
        match self.next_reply(&command.args) {
            None => Ok(ProcessOutput::ok("")),
            Some(ScriptedReply::Output(output)) => Ok(output),
            Some(ScriptedReply::Timeout) => Err(ProcessError::Timeout {
                command: command.display(),
                timeout,
            }),
            Some(ScriptedReply::SpawnError(reason)) => Err(ProcessError::Spawn {
                command: command.display(),
                reason,
            }),
        }
    }
}
