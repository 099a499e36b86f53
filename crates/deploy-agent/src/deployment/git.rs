use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::system::{CommandError, CommandOutcome, ProcessCommand};

pub mod remote;

pub use remote::{github_remote_url, strip_credentials};

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const HISTORY_CEILING: usize = 100;

const REMOTE_NAME: &str = "origin";
const FIELD_SEPARATOR: char = '\u{1f}';
const IDENTITY_NAME: &str = "Deploy Agent";
const IDENTITY_EMAIL: &str = "deploy-agent@localhost";

const AUTH_FAILURE_MARKERS: [&str; 6] = [
    "authentication failed",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "invalid username or password",
    "the requested url returned error: 403",
];

#[derive(Debug, Error)]
pub enum GitError {
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("directory is already a git repository: {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("not a git repository: {}", .0.display())]
    NotAGitRepository(PathBuf),

    #[error("nothing to commit, working tree clean")]
    NoChanges,

    #[error("refusing to merge unrelated histories: {output}")]
    UnrelatedHistories { output: String },

    #[error("push rejected, remote contains work that is not present locally: {output}")]
    NonFastForward { output: String },

    #[error("authentication with the remote failed: {output}")]
    AuthenticationFailed { output: String },

    #[error("git {command} failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("git {command} timed out after {seconds}s")]
    TimedOut { command: String, seconds: u64 },

    #[error("failed to execute git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{0}")]
    InvalidInput(String),
}

impl GitError {
    /// Stable machine-readable name, surfaced as `detail` in API errors and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyInitialized(_) => "already_initialized",
            Self::NotAGitRepository(_) => "not_a_git_repository",
            Self::NoChanges => "no_changes",
            Self::UnrelatedHistories { .. } => "unrelated_histories",
            Self::NonFastForward { .. } => "non_fast_forward",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::CommandFailed { .. } => "command_failed",
            Self::TimedOut { .. } => "timed_out",
            Self::Spawn(_) => "spawn_failed",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteReconciliation {
    Unchanged,
    Rewritten,
    Added,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchBootstrap {
    /// Created from the remote `main` branch, with any local commits merged on top.
    FromMain,
    /// No `main` on the remote; started from the working tree.
    FromWorkingTree,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub branch: String,
    pub output: String,
    pub bootstrap: Option<BranchBootstrap>,
    pub unrelated_histories_merged: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub branch: String,
    pub output: String,
    pub auto_merge_performed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub commit_id: String,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub timestamp: i64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub status: String,
    pub file: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepositoryStatus {
    pub branch: Option<String>,
    pub remote_url: Option<String>,
    pub has_changes: bool,
    pub changes: Vec<FileChange>,
    pub last_commit: Option<CommitSummary>,
}

/// Optional author override for commits made on behalf of a user.
#[derive(Clone, Debug, Default)]
pub struct CommitAuthor {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Pulls a working copy up to date with its remote branch.
#[async_trait]
pub trait RepositorySync: Send + Sync {
    async fn pull(
        &self,
        path: &Path,
        branch: &str,
        token: Option<&str>,
    ) -> Result<PullReport, GitError>;
}

/// Invokes the `git` executable against local working copies.
type CredentialScopes = Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>;

#[derive(Clone, Debug)]
pub struct GitAdapter {
    binary: String,
    timeout: Duration,
    /// One lock per working copy; `origin` carries at most one credential at a time.
    credential_scopes: Arc<CredentialScopes>,
}

impl Default for GitAdapter {
    fn default() -> Self {
        Self::new("git", DEFAULT_GIT_TIMEOUT)
    }
}

#[async_trait]
impl RepositorySync for GitAdapter {
    async fn pull(
        &self,
        path: &Path,
        branch: &str,
        token: Option<&str>,
    ) -> Result<PullReport, GitError> {
        GitAdapter::pull(self, path, branch, token).await
    }
}

impl GitAdapter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            credential_scopes: Arc::default(),
        }
    }

    /// Turns an existing directory into a repository with `origin` pointing at
    /// `remote_url` (credentials stripped) and `HEAD` on `branch`. Nothing is fetched.
    ///
    /// # Errors
    /// [`GitError::NotFound`] if `path` is not a directory and
    /// [`GitError::AlreadyInitialized`] if it already holds a repository.
    pub async fn ensure_initialized(
        &self,
        path: &Path,
        remote_url: &str,
        branch: &str,
    ) -> Result<(), GitError> {
        validate_branch(branch)?;
        if !path.is_dir() {
            return Err(GitError::NotFound(path.to_path_buf()));
        }
        if path.join(".git").exists() {
            return Err(GitError::AlreadyInitialized(path.to_path_buf()));
        }

        let clean_url = strip_credentials(remote_url);
        self.git_checked(path, &["init"]).await?;
        self.git_checked(path, &["config", "user.name", IDENTITY_NAME])
            .await?;
        self.git_checked(path, &["config", "user.email", IDENTITY_EMAIL])
            .await?;
        self.git_checked(path, &["remote", "add", REMOTE_NAME, &clean_url])
            .await?;
        let head_ref = format!("refs/heads/{branch}");
        self.git_checked(path, &["symbolic-ref", "HEAD", &head_ref])
            .await?;

        info!(path = %path.display(), branch, remote = %clean_url, "initialized repository");
        Ok(())
    }

    /// Makes `origin` equal to `expected_url` with any credentials removed.
    ///
    /// # Errors
    /// [`GitError::NotAGitRepository`] if `path` holds no repository.
    pub async fn reconcile_remote(
        &self,
        path: &Path,
        expected_url: &str,
    ) -> Result<RemoteReconciliation, GitError> {
        require_repository(path)?;
        let expected = strip_credentials(expected_url);

        let current = self.raw_remote_url(path).await?;
        let reconciliation = match current {
            Some(current) if current == expected => RemoteReconciliation::Unchanged,
            Some(_) => {
                self.set_remote_url(path, &expected).await?;
                RemoteReconciliation::Rewritten
            }
            None => {
                self.git_checked(path, &["remote", "add", REMOTE_NAME, &expected])
                    .await?;
                RemoteReconciliation::Added
            }
        };

        if reconciliation != RemoteReconciliation::Unchanged {
            info!(path = %path.display(), remote = %expected, ?reconciliation, "reconciled origin");
        }
        Ok(reconciliation)
    }

    /// Runs `body` while `origin` carries `token`, then restores the exact previous
    /// URL whether `body` succeeded, failed or was cancelled. Non-HTTPS remotes and
    /// empty tokens run `body` unchanged. Scopes on the same working copy, from any
    /// clone of this adapter, run one after another.
    ///
    /// # Errors
    /// Propagates errors from `body`, or from rewriting the remote URL.
    pub async fn with_temporary_credential<T, F, Fut>(
        &self,
        path: &Path,
        token: Option<&str>,
        body: F,
    ) -> Result<T, GitError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, GitError>> + Send,
    {
        let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) else {
            return body().await;
        };
        let _scope = self.credential_scope(path).lock_owned().await;
        let Some(original) = self.raw_remote_url(path).await? else {
            return body().await;
        };
        let Some(authenticated) = remote::inject_credential(&original, token) else {
            return body().await;
        };

        let mut guard = RemoteRestoreGuard {
            binary: self.binary.clone(),
            path: path.to_path_buf(),
            original_url: original.clone(),
            armed: true,
        };
        self.set_remote_url(path, &authenticated).await?;

        let result = body().await;

        match self.set_remote_url(path, &original).await {
            Ok(()) => guard.armed = false,
            Err(restore_error) => {
                error!(path = %path.display(), error = %restore_error, "failed to restore remote url");
                if result.is_ok() {
                    return Err(restore_error);
                }
            }
        }

        result
    }

    /// Brings `branch` up to date with `origin`, creating the remote branch first if
    /// it does not exist yet.
    ///
    /// # Errors
    /// [`GitError::AuthenticationFailed`] for credential problems, or any other
    /// classified git failure.
    pub async fn pull(
        &self,
        path: &Path,
        branch: &str,
        token: Option<&str>,
    ) -> Result<PullReport, GitError> {
        validate_branch(branch)?;
        require_repository(path)?;

        self.with_temporary_credential(path, token, || self.pull_with_remote(path, branch))
            .await
    }

    /// Publishes `branch`. A non-fast-forward rejection triggers one merge from the
    /// remote and one more push attempt.
    ///
    /// # Errors
    /// Any classified git failure; a second rejection is returned as-is.
    pub async fn push(
        &self,
        path: &Path,
        branch: &str,
        token: Option<&str>,
    ) -> Result<PushReport, GitError> {
        validate_branch(branch)?;
        require_repository(path)?;

        self.with_temporary_credential(path, token, || self.push_with_remote(path, branch))
            .await
    }

    /// Stages everything and commits it.
    ///
    /// # Errors
    /// [`GitError::NoChanges`] if the working tree is clean.
    pub async fn commit(
        &self,
        path: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitReport, GitError> {
        require_repository(path)?;
        if message.trim().is_empty() {
            return Err(GitError::InvalidInput(
                "commit message must not be empty".to_string(),
            ));
        }

        self.git_checked(path, &["add", "-A"]).await?;

        let mut args = self.identity_overrides(path, author).await?;
        args.extend(["commit".to_string(), "-m".to_string(), message.to_string()]);
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();

        let outcome = self.git(path, &args).await?;
        if !outcome.success {
            let combined = outcome.combined();
            if combined.contains("nothing to commit") || combined.contains("no changes added to commit") {
                return Err(GitError::NoChanges);
            }
            return Err(classify_failure("commit", &outcome));
        }

        let commit_id = self
            .git_checked(path, &["rev-parse", "HEAD"])
            .await?
            .stdout;
        info!(path = %path.display(), commit = %commit_id, "committed changes");

        Ok(CommitReport {
            commit_id,
            output: outcome.combined(),
        })
    }

    /// # Errors
    /// [`GitError::NotAGitRepository`] if `path` holds no repository.
    pub async fn status(&self, path: &Path) -> Result<RepositoryStatus, GitError> {
        require_repository(path)?;

        // The leading `##` header keeps the first entry's status column intact after
        // output trimming.
        let porcelain = self
            .git_checked(path, &["status", "--porcelain", "--branch"])
            .await?
            .stdout;
        let changes = porcelain
            .lines()
            .filter(|line| !line.starts_with("##") && line.len() > 3)
            .map(|line| FileChange {
                status: line[..2].trim().to_string(),
                file: line[3..].to_string(),
            })
            .collect::<Vec<_>>();

        let branch = self
            .git(path, &["symbolic-ref", "--short", "HEAD"])
            .await?;
        let branch = (branch.success && !branch.stdout.is_empty()).then_some(branch.stdout);

        let remote_url = self
            .raw_remote_url(path)
            .await?
            .map(|url| strip_credentials(&url));

        let last_commit = self.commit_history(path, 1).await?.into_iter().next();

        Ok(RepositoryStatus {
            branch,
            remote_url,
            has_changes: !changes.is_empty(),
            changes,
            last_commit,
        })
    }

    /// Most recent commits first, at most [`HISTORY_CEILING`]. A repository without
    /// commits has an empty history.
    ///
    /// # Errors
    /// [`GitError::NotAGitRepository`] if `path` holds no repository.
    pub async fn commit_history(
        &self,
        path: &Path,
        limit: usize,
    ) -> Result<Vec<CommitSummary>, GitError> {
        require_repository(path)?;
        if !self.has_commits(path).await? {
            return Ok(Vec::new());
        }

        let count = format!("-{}", history_limit(limit));
        let format = format!(
            "--pretty=format:%H{sep}%an{sep}%ae{sep}%at{sep}%s",
            sep = FIELD_SEPARATOR
        );
        let outcome = self.git_checked(path, &["log", &count, &format]).await?;

        Ok(outcome.stdout.lines().filter_map(parse_log_line).collect())
    }

    /// Working-tree diff, optionally limited to one file.
    ///
    /// # Errors
    /// [`GitError::NotAGitRepository`] if `path` holds no repository.
    pub async fn diff(&self, path: &Path, file: Option<&str>) -> Result<String, GitError> {
        require_repository(path)?;

        let mut args = vec!["diff"];
        if let Some(file) = file.map(str::trim).filter(|file| !file.is_empty()) {
            if file.contains("..") {
                return Err(GitError::InvalidInput(format!("invalid file path: {file}")));
            }
            args.extend(["--", file]);
        }

        Ok(self.git_checked(path, &args).await?.stdout)
    }

    /// Branch names published on `origin`.
    ///
    /// # Errors
    /// [`GitError::NotAGitRepository`] if `path` holds no repository, or a classified
    /// failure talking to the remote.
    pub async fn list_remote_branches(
        &self,
        path: &Path,
        token: Option<&str>,
    ) -> Result<Vec<String>, GitError> {
        require_repository(path)?;

        self.with_temporary_credential(path, token, || async {
            let outcome = self
                .git_checked(path, &["ls-remote", "--heads", REMOTE_NAME])
                .await?;
            Ok(outcome
                .stdout
                .lines()
                .filter_map(|line| line.split_once("refs/heads/"))
                .map(|(_, branch)| branch.trim().to_string())
                .collect())
        })
        .await
    }

    async fn pull_with_remote(&self, path: &Path, branch: &str) -> Result<PullReport, GitError> {
        if !self.remote_branch_exists(path, branch).await? {
            return self.bootstrap_branch(path, branch).await;
        }

        let (output, unrelated_histories_merged) = self.merge_from_remote(path, branch).await?;
        info!(path = %path.display(), branch, unrelated_histories_merged, "pulled branch");

        Ok(PullReport {
            branch: branch.to_string(),
            output,
            bootstrap: None,
            unrelated_histories_merged,
        })
    }

    async fn bootstrap_branch(&self, path: &Path, branch: &str) -> Result<PullReport, GitError> {
        let local_ref = format!("refs/heads/{branch}");
        let has_local_branch = self
            .git(path, &["rev-parse", "--verify", "-q", &local_ref])
            .await?
            .success;

        let bootstrap = if branch != "main" && self.remote_branch_exists(path, "main").await? {
            self.git_checked(path, &["fetch", REMOTE_NAME, "main"]).await?;
            if has_local_branch {
                self.git_checked(path, &["checkout", branch]).await?;
                self.merge_fetched_main(path, branch).await?;
            } else {
                self.git_checked(path, &["checkout", "-B", branch, "FETCH_HEAD"])
                    .await?;
            }
            BranchBootstrap::FromMain
        } else {
            if has_local_branch {
                self.git_checked(path, &["checkout", branch]).await?;
            } else if self.has_commits(path).await? {
                self.git_checked(path, &["checkout", "-B", branch]).await?;
            } else {
                self.git_checked(path, &["symbolic-ref", "HEAD", &local_ref])
                    .await?;
            }
            self.git_checked(path, &["add", "-A"]).await?;

            let message = format!("Initialize branch {branch}");
            let mut args = self.identity_overrides(path, &CommitAuthor::default()).await?;
            args.extend(
                ["commit", "--allow-empty", "-m", message.as_str()]
                    .into_iter()
                    .map(str::to_string),
            );
            let args = args.iter().map(String::as_str).collect::<Vec<_>>();
            self.git_checked(path, &args).await?;
            BranchBootstrap::FromWorkingTree
        };

        let outcome = self
            .git_checked(path, &["push", "-u", REMOTE_NAME, branch])
            .await?;
        info!(path = %path.display(), branch, ?bootstrap, "created remote branch");

        Ok(PullReport {
            branch: branch.to_string(),
            output: outcome.combined(),
            bootstrap: Some(bootstrap),
            unrelated_histories_merged: false,
        })
    }

    /// Merges the just-fetched `origin/main` into the checked-out local `branch`, so
    /// local-only commits are published on top of the remote history.
    async fn merge_fetched_main(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let mut args = self.identity_overrides(path, &CommitAuthor::default()).await?;
        args.extend(
            ["merge", "--no-edit", "--allow-unrelated-histories", "FETCH_HEAD"]
                .into_iter()
                .map(str::to_string),
        );
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();

        if let Err(merge_error) = self.git_checked(path, &args).await {
            warn!(path = %path.display(), branch, error = %merge_error, "merging origin/main into local branch failed");
            if let Err(abort_error) = self.git(path, &["merge", "--abort"]).await {
                warn!(path = %path.display(), error = %abort_error, "failed to abort merge");
            }
            return Err(merge_error);
        }

        Ok(())
    }

    async fn merge_from_remote(&self, path: &Path, branch: &str) -> Result<(String, bool), GitError> {
        let mut args = self.identity_overrides(path, &CommitAuthor::default()).await?;
        args.extend(
            ["pull", "--no-rebase", "--no-edit", REMOTE_NAME, branch]
                .into_iter()
                .map(str::to_string),
        );
        let plain = args.iter().map(String::as_str).collect::<Vec<_>>();

        match self.git_checked(path, &plain).await {
            Ok(outcome) => Ok((outcome.combined(), false)),
            Err(GitError::UnrelatedHistories { .. }) => {
                warn!(path = %path.display(), branch, "retrying pull with unrelated histories allowed");
                let mut retry = plain.clone();
                retry.insert(retry.len() - 2, "--allow-unrelated-histories");
                let outcome = self.git_checked(path, &retry).await?;
                Ok((outcome.combined(), true))
            }
            Err(error) => Err(error),
        }
    }

    async fn push_with_remote(&self, path: &Path, branch: &str) -> Result<PushReport, GitError> {
        let push = ["push", "-u", REMOTE_NAME, branch];

        match self.git_checked(path, &push).await {
            Ok(outcome) => Ok(PushReport {
                branch: branch.to_string(),
                output: outcome.combined(),
                auto_merge_performed: false,
            }),
            Err(GitError::NonFastForward { .. }) => {
                warn!(path = %path.display(), branch, "push rejected, merging remote changes");
                self.merge_from_remote(path, branch).await?;
                let outcome = self.git_checked(path, &push).await?;
                info!(path = %path.display(), branch, "pushed after automatic merge");
                Ok(PushReport {
                    branch: branch.to_string(),
                    output: outcome.combined(),
                    auto_merge_performed: true,
                })
            }
            Err(error) => Err(error),
        }
    }

    async fn remote_branch_exists(&self, path: &Path, branch: &str) -> Result<bool, GitError> {
        let head_ref = format!("refs/heads/{branch}");
        let outcome = self
            .git_checked(path, &["ls-remote", "--heads", REMOTE_NAME, &head_ref])
            .await?;
        Ok(!outcome.stdout.is_empty())
    }

    async fn has_commits(&self, path: &Path) -> Result<bool, GitError> {
        Ok(self
            .git(path, &["rev-parse", "--verify", "-q", "HEAD"])
            .await?
            .success)
    }

    /// `-c user.name=... -c user.email=...` for the author override, plus a fallback
    /// identity when the repository has none configured.
    async fn identity_overrides(
        &self,
        path: &Path,
        author: &CommitAuthor,
    ) -> Result<Vec<String>, GitError> {
        let mut overrides = Vec::new();

        let name = match author.name.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(name) => Some(name.to_string()),
            None => self.missing_config(path, "user.name", IDENTITY_NAME).await?,
        };
        let email = match author.email.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(email) => Some(email.to_string()),
            None => self.missing_config(path, "user.email", IDENTITY_EMAIL).await?,
        };

        if let Some(name) = name {
            overrides.extend(["-c".to_string(), format!("user.name={name}")]);
        }
        if let Some(email) = email {
            overrides.extend(["-c".to_string(), format!("user.email={email}")]);
        }
        Ok(overrides)
    }

    async fn missing_config(
        &self,
        path: &Path,
        key: &str,
        fallback: &str,
    ) -> Result<Option<String>, GitError> {
        let configured = self.git(path, &["config", "--get", key]).await?;
        Ok((!configured.success || configured.stdout.is_empty()).then(|| fallback.to_string()))
    }

    /// The exact `origin` URL, credentials included, or `None` without a remote.
    async fn raw_remote_url(&self, path: &Path) -> Result<Option<String>, GitError> {
        let outcome = self
            .command(path, &["remote", "get-url", REMOTE_NAME])
            .run()
            .await
            .map_err(|error| self.map_command_error("remote", error))?;
        Ok((outcome.success && !outcome.stdout.is_empty()).then_some(outcome.stdout))
    }

    async fn set_remote_url(&self, path: &Path, url: &str) -> Result<(), GitError> {
        self.git_checked(path, &["remote", "set-url", REMOTE_NAME, url])
            .await
            .map(|_| ())
    }

    async fn git_checked(&self, path: &Path, args: &[&str]) -> Result<CommandOutcome, GitError> {
        let outcome = self.git(path, args).await?;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(classify_failure(subcommand(args), &outcome))
        }
    }

    /// Runs git with credentials scrubbed from both output streams.
    async fn git(&self, path: &Path, args: &[&str]) -> Result<CommandOutcome, GitError> {
        let command = subcommand(args);
        debug!(path = %path.display(), command, "running git");

        let mut outcome = self
            .command(path, args)
            .run()
            .await
            .map_err(|error| self.map_command_error(command, error))?;
        outcome.stdout = remote::redact_credentials(&outcome.stdout);
        outcome.stderr = remote::redact_credentials(&outcome.stderr);
        Ok(outcome)
    }

    fn credential_scope(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut scopes = self
            .credential_scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            scopes
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn command(&self, path: &Path, args: &[&str]) -> ProcessCommand {
        ProcessCommand::new(&self.binary, self.timeout)
            .arg("-C")
            .arg(path.to_string_lossy())
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
    }

    fn map_command_error(&self, command: &str, error: CommandError) -> GitError {
        match error {
            CommandError::TimedOut { .. } => GitError::TimedOut {
                command: command.to_string(),
                seconds: self.timeout.as_secs(),
            },
            CommandError::Spawn { source, .. } => GitError::Spawn(source),
        }
    }
}

/// Restores `origin` synchronously if a credential scope is abandoned mid-flight.
struct RemoteRestoreGuard {
    binary: String,
    path: PathBuf,
    original_url: String,
    armed: bool,
}

impl Drop for RemoteRestoreGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let restored = std::process::Command::new(&self.binary)
            .arg("-C")
            .arg(&self.path)
            .args(["remote", "set-url", REMOTE_NAME, &self.original_url])
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .is_ok_and(|output| output.status.success());

        if restored {
            warn!(path = %self.path.display(), "restored remote url after interrupted operation");
        } else {
            error!(path = %self.path.display(), "remote url may still carry a credential");
        }
    }
}

fn require_repository(path: &Path) -> Result<(), GitError> {
    if path.join(".git").exists() {
        Ok(())
    } else {
        Err(GitError::NotAGitRepository(path.to_path_buf()))
    }
}

fn validate_branch(branch: &str) -> Result<(), GitError> {
    remote::validate_branch(branch).map_err(|error| GitError::InvalidInput(error.to_string()))
}

/// First non-option argument, skipping `-c key=value` pairs.
fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        if !arg.starts_with('-') {
            return arg;
        }
    }
    "git"
}

#[must_use]
pub fn history_limit(requested: usize) -> usize {
    requested.clamp(1, HISTORY_CEILING)
}

fn parse_log_line(line: &str) -> Option<CommitSummary> {
    let mut fields = line.splitn(5, FIELD_SEPARATOR);
    let hash = fields.next()?.to_string();
    let author = fields.next()?.to_string();
    let email = fields.next()?.to_string();
    let timestamp = fields.next()?.parse().ok()?;
    let message = fields.next().unwrap_or_default().to_string();

    Some(CommitSummary {
        hash,
        author,
        email,
        timestamp,
        message,
    })
}

fn classify_failure(command: &str, outcome: &CommandOutcome) -> GitError {
    let output = outcome.combined();
    let lowered = output.to_lowercase();

    if lowered.contains("refusing to merge unrelated histories") {
        return GitError::UnrelatedHistories { output };
    }
    if lowered.contains("[rejected]")
        || lowered.contains("non-fast-forward")
        || lowered.contains("fetch first")
    {
        return GitError::NonFastForward { output };
    }
    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return GitError::AuthenticationFailed { output };
    }

    GitError::CommandFailed {
        command: command.to_string(),
        output,
    }
}
