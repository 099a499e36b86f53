use std::time::Duration;

use async_trait::async_trait;

use crate::system::{CommandOutcome, PrivilegeWrapper, PrivilegedCommandError};

/// Stop/start/status of an instance's host service.
#[async_trait]
pub trait ServiceLifecycle: Send + Sync {
    async fn is_active(&self, service_name: &str) -> Result<bool, PrivilegedCommandError>;

    async fn stop(&self, service_name: &str) -> Result<CommandOutcome, PrivilegedCommandError>;

    async fn start(&self, service_name: &str) -> Result<CommandOutcome, PrivilegedCommandError>;
}

#[derive(Clone, Debug)]
pub struct SystemdServiceManager {
    privilege_wrapper: PrivilegeWrapper,
    timeout: Duration,
}

impl SystemdServiceManager {
    #[must_use]
    pub fn new(privilege_wrapper: PrivilegeWrapper, timeout: Duration) -> Self {
        Self {
            privilege_wrapper,
            timeout,
        }
    }
}

#[async_trait]
impl ServiceLifecycle for SystemdServiceManager {
    async fn is_active(&self, service_name: &str) -> Result<bool, PrivilegedCommandError> {
        let outcome = self
            .privilege_wrapper
            .systemctl("is-active", service_name, self.timeout)
            .await?;
        Ok(outcome.success && outcome.stdout == "active")
    }

    async fn stop(&self, service_name: &str) -> Result<CommandOutcome, PrivilegedCommandError> {
        self.privilege_wrapper
            .systemctl("stop", service_name, self.timeout)
            .await
    }

    async fn start(&self, service_name: &str) -> Result<CommandOutcome, PrivilegedCommandError> {
        self.privilege_wrapper
            .systemctl("start", service_name, self.timeout)
            .await
    }
}
