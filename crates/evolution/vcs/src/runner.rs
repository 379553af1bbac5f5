use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{VcsError, VcsResult};
use crate::process::{CommandSpec, ProcessError, ProcessExecutor, ProcessOutput};
use crate::settings::GitSettings;

/// Shared git invocation plumbing.
///
/// `read` retries timeouts up to `settings.read_retries` extra times and is
/// for commands with no side effects. `once` never retries.
#[derive(Clone)]
pub(crate) struct GitRunner {
    pub(crate) settings: GitSettings,
    executor: Arc<dyn ProcessExecutor>,
}

impl GitRunner {
    pub(crate) fn new(settings: GitSettings, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self { settings, executor }
    }

    fn spec(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::git(&self.settings.repo_path, args.iter().copied())
    }

    pub(crate) async fn once(&self, args: &[&str], timeout: Duration) -> VcsResult<ProcessOutput> {
        let spec = self.spec(args);
        Ok(self.executor.exec(&spec, timeout).await?)
    }

    pub(crate) async fn read(&self, args: &[&str], timeout: Duration) -> VcsResult<ProcessOutput> {
        let spec = self.spec(args);
        let attempts = self.settings.read_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.executor.exec(&spec, timeout).await {
                Err(ProcessError::Timeout { .. }) if attempt < attempts => {
                    warn!(
                        command = %spec.display(),
                        attempt,
                        attempts,
                        "read-only git command timed out, retrying"
                    );
                }
                other => return other.map_err(VcsError::from),
            }
        }
    }

    /// `read` that also treats a non-zero exit as [`VcsError::CommandFailed`].
    pub(crate) async fn read_ok(&self, args: &[&str], timeout: Duration) -> VcsResult<String> {
        let output = self.read(args, timeout).await?;
        require_success(args, output)
    }
}

pub(crate) fn require_success(args: &[&str], output: ProcessOutput) -> VcsResult<String> {
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(VcsError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
