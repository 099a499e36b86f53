use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("a deploy is already running for instance {instance}")]
    DeployInProgress { instance: String },

    #[error("deploy task for instance {instance} aborted: {reason}")]
    Aborted { instance: String, reason: String },
}

impl DeployError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DeployInProgress { .. } => "deploy_in_progress",
            Self::Aborted { .. } => "deploy_aborted",
        }
    }
}

/// Held for the whole of one deploy attempt or working-copy mutation.
#[derive(Debug)]
pub struct InstanceGuard {
    instance: String,
    _guard: OwnedMutexGuard<()>,
}

impl InstanceGuard {
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

/// One mutex per instance name, created on first use.
#[derive(Debug)]
pub struct DeployLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    wait: Duration,
}

impl Default for DeployLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT)
    }
}

impl DeployLocks {
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// Waits at most the configured bound for the instance lock.
    ///
    /// # Errors
    /// [`DeployError::DeployInProgress`] if another holder keeps the lock past the bound.
    pub async fn acquire(&self, instance: &str) -> Result<InstanceGuard, DeployError> {
        let lock = self.lock_for(instance);

        match tokio::time::timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => Ok(InstanceGuard {
                instance: instance.to_string(),
                _guard: guard,
            }),
            Err(_) => Err(DeployError::DeployInProgress {
                instance: instance.to_string(),
            }),
        }
    }

    fn lock_for(&self, instance: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(instance.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}
