use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::deployment::git::{GitError, RepositorySync};
use crate::deployment::instance::{InstanceLayout, NamingPolicy};
use crate::deployment::lock::{DeployError, DeployLocks};
use crate::deployment::modules::{module_argument, ModuleUpdater};
use crate::deployment::service::ServiceLifecycle;
use crate::system::{CommandError, CommandOutcome, PrivilegedCommandError};

/// Commit metadata carried from the trigger into the attempt record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: Option<String>,
    pub message: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<String>,
    pub pusher: Option<String>,
    pub repository: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DeployRequest {
    pub instance_name: String,
    pub local_path: PathBuf,
    pub branch: String,
    pub token: Option<String>,
    pub run_module_update: bool,
    pub modules: Vec<String>,
    pub commit: CommitInfo,
    pub test: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployState {
    Pulling,
    ModuleUpdating,
    Done,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub success: bool,
    pub output: String,
}

impl StepOutcome {
    fn new(step: &str, success: bool, output: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            success,
            output: output.into(),
        }
    }

    fn from_command(step: &str, outcome: &CommandOutcome) -> Self {
        Self::new(step, outcome.success, outcome.combined())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleUpdateReport {
    pub service_name: String,
    pub modules: String,
    pub steps: Vec<StepOutcome>,
    pub success: bool,
}

/// Result of one deploy attempt. Not persisted beyond the action log.
#[derive(Clone, Debug, Serialize)]
pub struct DeployAttempt {
    pub instance_name: String,
    pub branch: String,
    pub commit_id: Option<String>,
    pub commit: CommitInfo,
    pub test: bool,
    pub state: DeployState,
    pub pull: Option<StepOutcome>,
    pub module_update: Option<ModuleUpdateReport>,
    pub success: bool,
    pub error: Option<String>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeployAttempt {
    fn start(request: &DeployRequest) -> Self {
        Self {
            instance_name: request.instance_name.clone(),
            branch: request.branch.clone(),
            commit_id: request.commit.id.clone(),
            commit: request.commit.clone(),
            test: request.test,
            state: DeployState::Pulling,
            pull: None,
            module_update: None,
            success: false,
            error: None,
            detail: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn fail(mut self, error: &DeployStepError) -> Self {
        warn!(
            instance = %self.instance_name,
            state = ?self.state,
            error = error.kind(),
            detail = %error,
            "deploy failed"
        );
        self.state = DeployState::Failed;
        self.success = false;
        self.error = Some(error.kind().to_string());
        self.detail = Some(error.to_string());
        self.finished_at = Some(Utc::now());
        self
    }

    fn finish(mut self) -> Self {
        info!(instance = %self.instance_name, branch = %self.branch, test = self.test, "deploy finished");
        self.state = DeployState::Done;
        self.success = true;
        self.finished_at = Some(Utc::now());
        self
    }
}

#[derive(Debug, Error)]
pub enum DeployStepError {
    #[error(transparent)]
    Pull(#[from] GitError),

    #[error("service {service} is not active; module update was not attempted")]
    ServiceNotActive { service: String },

    #[error("{0}")]
    Preflight(String),

    #[error("{step} failed for {service}: {output}")]
    StepFailed {
        step: &'static str,
        service: String,
        output: String,
    },

    #[error("{step} could not run for {service}: {source}")]
    Command {
        step: &'static str,
        service: String,
        #[source]
        source: PrivilegedCommandError,
    },

    #[error("service {service} is not active after restart")]
    NotRunningAfterStart { service: String },
}

impl DeployStepError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pull(error) => error.kind(),
            Self::ServiceNotActive { .. } => "service_not_active",
            Self::Preflight(_) => "preflight_failed",
            Self::StepFailed { step, .. } => match *step {
                STEP_STOP => "service_stop_failed",
                STEP_START => "service_start_failed",
                _ => "module_update_failed",
            },
            Self::Command { source, .. } => match source {
                PrivilegedCommandError::Command(CommandError::TimedOut { .. }) => "timed_out",
                PrivilegedCommandError::Rejected(_) => "command_rejected",
                PrivilegedCommandError::Command(CommandError::Spawn { .. }) => "command_failed",
            },
            Self::NotRunningAfterStart { .. } => "service_not_running",
        }
    }
}

const STEP_CHECK: &str = "is-active";
const STEP_PREFLIGHT: &str = "preflight";
const STEP_STOP: &str = "stop";
const STEP_UPDATE: &str = "update";
const STEP_START: &str = "start";
const STEP_VERIFY: &str = "verify";

/// Sequences pull, the optional module update and service restart for one instance.
#[derive(Clone)]
pub struct DeployPipeline {
    repository: Arc<dyn RepositorySync>,
    services: Arc<dyn ServiceLifecycle>,
    modules: Arc<dyn ModuleUpdater>,
    naming: Arc<dyn NamingPolicy>,
    locks: Arc<DeployLocks>,
}

impl DeployPipeline {
    pub fn new(
        repository: Arc<dyn RepositorySync>,
        services: Arc<dyn ServiceLifecycle>,
        modules: Arc<dyn ModuleUpdater>,
        naming: Arc<dyn NamingPolicy>,
        locks: Arc<DeployLocks>,
    ) -> Self {
        Self {
            repository,
            services,
            modules,
            naming,
            locks,
        }
    }

    #[must_use]
    pub fn naming(&self) -> &dyn NamingPolicy {
        self.naming.as_ref()
    }

    #[must_use]
    pub fn locks(&self) -> &Arc<DeployLocks> {
        &self.locks
    }

    /// Takes the instance lock and runs the attempt on its own task, so dropping the
    /// caller's future never interrupts a deploy between stopping and starting the
    /// service.
    ///
    /// # Errors
    /// [`DeployError::DeployInProgress`] if the instance is locked past the wait bound,
    /// or [`DeployError::Aborted`] if the task panicked.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployAttempt, DeployError> {
        let guard = self.locks.acquire(&request.instance_name).await?;
        let instance = request.instance_name.clone();
        let pipeline = self.clone();

        let task = tokio::spawn(async move {
            let attempt = pipeline.run(&request).await;
            drop(guard);
            attempt
        });

        task.await.map_err(|error| DeployError::Aborted {
            instance,
            reason: error.to_string(),
        })
    }

    /// Runs the attempt without taking the lock. Callers must hold the instance guard.
    pub async fn run(&self, request: &DeployRequest) -> DeployAttempt {
        let mut attempt = DeployAttempt::start(request);
        info!(
            instance = %request.instance_name,
            branch = %request.branch,
            test = request.test,
            module_update = request.run_module_update,
            "deploy started"
        );

        match self
            .repository
            .pull(&request.local_path, &request.branch, request.token.as_deref())
            .await
        {
            Ok(report) => {
                attempt.pull = Some(StepOutcome::new("pull", true, report.output));
            }
            Err(error) => {
                attempt.pull = Some(StepOutcome::new("pull", false, error.to_string()));
                return attempt.fail(&DeployStepError::Pull(error));
            }
        }

        if !request.run_module_update {
            return attempt.finish();
        }

        attempt.state = DeployState::ModuleUpdating;
        let layout = self.naming.layout(&request.instance_name);
        let mut report = ModuleUpdateReport {
            service_name: layout.service_name.clone(),
            modules: module_argument(&request.modules),
            steps: Vec::new(),
            success: false,
        };

        let result = self
            .update_modules(&layout, &request.modules, &mut report)
            .await;
        report.success = result.is_ok();
        attempt.module_update = Some(report);

        match result {
            Ok(()) => attempt.finish(),
            Err(error) => attempt.fail(&error),
        }
    }

    async fn update_modules(
        &self,
        layout: &InstanceLayout,
        modules: &[String],
        report: &mut ModuleUpdateReport,
    ) -> Result<(), DeployStepError> {
        let service = layout.service_name.as_str();

        let active = self
            .services
            .is_active(service)
            .await
            .map_err(|source| command_error(STEP_CHECK, service, source))?;
        report.steps.push(StepOutcome::new(
            STEP_CHECK,
            active,
            if active { "active" } else { "inactive" },
        ));
        if !active {
            return Err(DeployStepError::ServiceNotActive {
                service: service.to_string(),
            });
        }

        if let Err(reason) = self.modules.preflight(layout) {
            report.steps.push(StepOutcome::new(STEP_PREFLIGHT, false, reason.clone()));
            return Err(DeployStepError::Preflight(reason));
        }

        let stop = self
            .services
            .stop(service)
            .await
            .map_err(|source| command_error(STEP_STOP, service, source))?;
        report.steps.push(StepOutcome::from_command(STEP_STOP, &stop));
        check_outcome(STEP_STOP, service, &stop)?;
        info!(service, modules = %report.modules, "service stopped, updating modules");

        // Once stopped, the service is always started again, whatever the update did.
        let update = match self.modules.update_modules(layout, modules).await {
            Ok(outcome) => {
                report.steps.push(StepOutcome::from_command(STEP_UPDATE, &outcome));
                check_outcome(STEP_UPDATE, service, &outcome)
            }
            Err(source) => {
                report.steps.push(StepOutcome::new(STEP_UPDATE, false, source.to_string()));
                Err(command_error(STEP_UPDATE, service, source))
            }
        };

        let start = match self.services.start(service).await {
            Ok(outcome) => {
                report.steps.push(StepOutcome::from_command(STEP_START, &outcome));
                check_outcome(STEP_START, service, &outcome)
            }
            Err(source) => {
                report.steps.push(StepOutcome::new(STEP_START, false, source.to_string()));
                Err(command_error(STEP_START, service, source))
            }
        };

        update?;
        start?;

        let running = self
            .services
            .is_active(service)
            .await
            .map_err(|source| command_error(STEP_VERIFY, service, source))?;
        report.steps.push(StepOutcome::new(
            STEP_VERIFY,
            running,
            if running { "active" } else { "inactive" },
        ));
        if !running {
            return Err(DeployStepError::NotRunningAfterStart {
                service: service.to_string(),
            });
        }

        Ok(())
    }
}

fn command_error(
    step: &'static str,
    service: &str,
    source: PrivilegedCommandError,
) -> DeployStepError {
    DeployStepError::Command {
        step,
        service: service.to_string(),
        source,
    }
}

fn check_outcome(
    step: &'static str,
    service: &str,
    outcome: &CommandOutcome,
) -> Result<(), DeployStepError> {
    if outcome.success {
        return Ok(());
    }

    Err(DeployStepError::StepFailed {
        step,
        service: service.to_string(),
        output: outcome.diagnostic().to_string(),
    })
}

#[cfg(test)]
mod tests;
