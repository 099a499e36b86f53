use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

/// Time a timed-out process group gets between SIGTERM and SIGKILL.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },
}

/// Captured result of a finished external process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// Stderr when present, stdout otherwise. Git reports most failures on stderr.
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Both streams joined, for callers that scan output for markers.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// An external process invocation: program, argv, working directory and a hard timeout.
#[derive(Clone, Debug)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, cwd: &Path) -> Self {
        self.cwd = Some(cwd.to_path_buf());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Runs the process to completion. A non-zero exit is an `Ok` outcome with
    /// `success == false`; only spawn failures and timeouts are errors.
    ///
    /// The child leads its own process group. On timeout the whole group gets
    /// SIGTERM, then SIGKILL after a short grace, so programs started through a
    /// wrapper such as `sudo` do not outlive it.
    ///
    /// # Errors
    /// Returns [`CommandError::Spawn`] if the program cannot be started and
    /// [`CommandError::TimedOut`] if it outlives the configured timeout.
    pub async fn run(&self) -> Result<CommandOutcome, CommandError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let group = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(Pid::from_raw);

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = match tokio::time::timeout(self.timeout, &mut wait).await {
            Ok(output) => output.map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!(
                    program = %self.program,
                    seconds = self.timeout.as_secs(),
                    "process timed out, terminating its group"
                );
                if let Some(group) = group {
                    signal_group(group, Signal::SIGTERM);
                    if tokio::time::timeout(TERMINATION_GRACE, &mut wait).await.is_err() {
                        warn!(program = %self.program, "process ignored SIGTERM");
                    }
                    signal_group(group, Signal::SIGKILL);
                }
                return Err(CommandError::TimedOut {
                    program: self.program.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        Ok(CommandOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Group members that already exited are not an error.
fn signal_group(group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(error) => {
            warn!(pgid = group.as_raw(), ?signal, %error, "failed to signal process group");
        }
    }
}
