use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::deployment::git::PullReport;
use crate::deployment::instance::PrefixNamingPolicy;

type CallLog = Arc<Mutex<Vec<String>>>;

struct FakeRepository {
    fail_with_auth: bool,
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl RepositorySync for FakeRepository {
    async fn pull(
        &self,
        _path: &Path,
        branch: &str,
        token: Option<&str>,
    ) -> Result<PullReport, GitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self.fail_with_auth {
            assert!(token.is_none());
            return Err(GitError::AuthenticationFailed {
                output: "fatal: could not read Username for 'https://github.com'".to_string(),
            });
        }

        Ok(PullReport {
            branch: branch.to_string(),
            output: "Already up to date.".to_string(),
            bootstrap: None,
            unrelated_histories_merged: false,
        })
    }
}

struct FakeServices {
    active_before: bool,
    active_after: bool,
    checks: AtomicUsize,
    log: CallLog,
}

fn outcome(success: bool, stdout: &str) -> CommandOutcome {
    CommandOutcome {
        success,
        exit_code: Some(i32::from(!success)),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ServiceLifecycle for FakeServices {
    async fn is_active(&self, _service_name: &str) -> Result<bool, PrivilegedCommandError> {
        self.log.lock().expect("log").push("is-active".to_string());
        let first = self.checks.fetch_add(1, Ordering::SeqCst) == 0;
        Ok(if first {
            self.active_before
        } else {
            self.active_after
        })
    }

    async fn stop(&self, _service_name: &str) -> Result<CommandOutcome, PrivilegedCommandError> {
        self.log.lock().expect("log").push("stop".to_string());
        Ok(outcome(true, ""))
    }

    async fn start(&self, _service_name: &str) -> Result<CommandOutcome, PrivilegedCommandError> {
        self.log.lock().expect("log").push("start".to_string());
        Ok(outcome(true, ""))
    }
}

struct FakeModules {
    update_succeeds: bool,
    log: CallLog,
}

#[async_trait]
impl ModuleUpdater for FakeModules {
    fn preflight(&self, _layout: &InstanceLayout) -> Result<(), String> {
        Ok(())
    }

    async fn update_modules(
        &self,
        _layout: &InstanceLayout,
        modules: &[String],
    ) -> Result<CommandOutcome, PrivilegedCommandError> {
        self.log
            .lock()
            .expect("log")
            .push(format!("update:{}", module_argument(modules)));
        Ok(outcome(
            self.update_succeeds,
            if self.update_succeeds { "ok" } else { "ParseError in view" },
        ))
    }
}

struct Harness {
    pipeline: DeployPipeline,
    repository: Arc<FakeRepository>,
    log: CallLog,
}

fn harness(
    fail_with_auth: bool,
    active_before: bool,
    update_succeeds: bool,
    pull_delay: Duration,
) -> Harness {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let repository = Arc::new(FakeRepository {
        fail_with_auth,
        delay: pull_delay,
        calls: AtomicUsize::new(0),
    });
    let services = Arc::new(FakeServices {
        active_before,
        active_after: true,
        checks: AtomicUsize::new(0),
        log: Arc::clone(&log),
    });
    let modules = Arc::new(FakeModules {
        update_succeeds,
        log: Arc::clone(&log),
    });
    let naming = Arc::new(PrefixNamingPolicy {
        dev_prefix: "dev-".to_string(),
        dev_root: PathBuf::from("/srv/develop/odoo"),
        prod_root: PathBuf::from("/srv/production/odoo"),
        service_prefix: "odoo19e-".to_string(),
    });

    Harness {
        pipeline: DeployPipeline::new(
            repository.clone(),
            services,
            modules,
            naming,
            Arc::new(DeployLocks::new(Duration::from_millis(50))),
        ),
        repository,
        log,
    }
}

fn request(run_module_update: bool) -> DeployRequest {
    DeployRequest {
        instance_name: "acme".to_string(),
        local_path: PathBuf::from("/srv/production/odoo/acme/addons"),
        branch: "main".to_string(),
        token: None,
        run_module_update,
        modules: Vec::new(),
        commit: CommitInfo {
            id: Some("abc123".to_string()),
            ..CommitInfo::default()
        },
        test: false,
    }
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().expect("log").clone()
}

#[tokio::test]
async fn pull_only_deploy_skips_module_update() {
    let harness = harness(false, true, true, Duration::ZERO);

    let attempt = harness
        .pipeline
        .deploy(request(false))
        .await
        .expect("deploy should run");

    assert!(attempt.success);
    assert_eq!(attempt.state, DeployState::Done);
    assert_eq!(attempt.commit_id.as_deref(), Some("abc123"));
    assert!(attempt.module_update.is_none());
    assert!(attempt.finished_at.is_some());
    assert!(calls(&harness.log).is_empty());
}

#[tokio::test]
async fn pull_failure_stops_the_attempt() {
    let harness = harness(true, true, true, Duration::ZERO);

    let attempt = harness
        .pipeline
        .deploy(request(true))
        .await
        .expect("deploy should run");

    assert!(!attempt.success);
    assert_eq!(attempt.state, DeployState::Failed);
    assert_eq!(attempt.error.as_deref(), Some("authentication_failed"));
    assert!(attempt.pull.as_ref().is_some_and(|pull| !pull.success));
    assert!(calls(&harness.log).is_empty());
}

#[tokio::test]
async fn inactive_service_is_never_stopped_or_started() {
    let harness = harness(false, false, true, Duration::ZERO);

    let attempt = harness
        .pipeline
        .deploy(request(true))
        .await
        .expect("deploy should run");

    assert!(!attempt.success);
    assert_eq!(attempt.error.as_deref(), Some("service_not_active"));
    assert!(attempt
        .detail
        .as_deref()
        .is_some_and(|detail| detail.contains("odoo19e-acme is not active")));
    assert_eq!(calls(&harness.log), vec!["is-active"]);
}

#[tokio::test]
async fn module_update_runs_steps_in_order() {
    let harness = harness(false, true, true, Duration::ZERO);

    let attempt = harness
        .pipeline
        .deploy(request(true))
        .await
        .expect("deploy should run");

    assert!(attempt.success);
    assert_eq!(
        calls(&harness.log),
        vec!["is-active", "stop", "update:all", "start", "is-active"]
    );
    let report = attempt.module_update.expect("module report");
    assert!(report.success);
    assert_eq!(report.service_name, "odoo19e-acme");
    assert_eq!(report.steps.len(), 5);
}

#[tokio::test]
async fn failed_update_still_restarts_service() {
    let harness = harness(false, true, false, Duration::ZERO);
    let mut deploy = request(true);
    deploy.modules = vec!["sale".to_string()];

    let attempt = harness
        .pipeline
        .deploy(deploy)
        .await
        .expect("deploy should run");

    assert!(!attempt.success);
    assert_eq!(attempt.error.as_deref(), Some("module_update_failed"));
    assert_eq!(
        calls(&harness.log),
        vec!["is-active", "stop", "update:sale", "start"]
    );
    let report = attempt.module_update.expect("module report");
    assert!(!report.success);
    assert!(report
        .steps
        .iter()
        .any(|step| step.step == "update" && step.output.contains("ParseError")));
}

#[tokio::test]
async fn concurrent_deploys_for_one_instance_fail_fast() {
    let harness = harness(false, true, true, Duration::from_millis(300));

    let first = {
        let pipeline = harness.pipeline.clone();
        tokio::spawn(async move { pipeline.deploy(request(false)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = harness.pipeline.deploy(request(false)).await;
    assert!(matches!(second, Err(DeployError::DeployInProgress { .. })));

    let first = first.await.expect("join").expect("first deploy");
    assert!(first.success);
    assert_eq!(harness.repository.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropped_caller_does_not_cancel_the_attempt() {
    let harness = harness(false, true, true, Duration::from_millis(100));

    let deploy = harness.pipeline.deploy(request(false));
    let cancelled = tokio::time::timeout(Duration::from_millis(20), deploy).await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.repository.calls.load(Ordering::SeqCst), 1);
    assert!(harness.pipeline.locks().acquire("acme").await.is_ok());
}
