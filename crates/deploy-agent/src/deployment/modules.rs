use std::time::Duration;

use async_trait::async_trait;

use crate::deployment::instance::InstanceLayout;
use crate::system::{CommandOutcome, PrivilegeWrapper, PrivilegedCommandError};

pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(300);
const ALL_MODULES: &str = "all";

/// Runs an instance's module update in "run once and exit" mode.
#[async_trait]
pub trait ModuleUpdater: Send + Sync {
    /// Checks that the instance can be updated at all, before its service is stopped.
    ///
    /// # Errors
    /// A human-readable reason when the update cannot run.
    fn preflight(&self, layout: &InstanceLayout) -> Result<(), String>;

    async fn update_modules(
        &self,
        layout: &InstanceLayout,
        modules: &[String],
    ) -> Result<CommandOutcome, PrivilegedCommandError>;
}

#[derive(Clone, Debug)]
pub struct OdooModuleUpdater {
    privilege_wrapper: PrivilegeWrapper,
    system_user: String,
    timeout: Duration,
}

impl OdooModuleUpdater {
    #[must_use]
    pub fn new(privilege_wrapper: PrivilegeWrapper, system_user: &str, timeout: Duration) -> Self {
        Self {
            privilege_wrapper,
            system_user: system_user.to_string(),
            timeout,
        }
    }
}

#[must_use]
pub fn module_argument(modules: &[String]) -> String {
    if modules.is_empty() {
        ALL_MODULES.to_string()
    } else {
        modules.join(",")
    }
}

#[async_trait]
impl ModuleUpdater for OdooModuleUpdater {
    fn preflight(&self, layout: &InstanceLayout) -> Result<(), String> {
        if layout.odoo_bin.is_file() {
            Ok(())
        } else {
            Err(format!(
                "odoo-bin not found at {}",
                layout.odoo_bin.display()
            ))
        }
    }

    async fn update_modules(
        &self,
        layout: &InstanceLayout,
        modules: &[String],
    ) -> Result<CommandOutcome, PrivilegedCommandError> {
        let config_file = layout.config_file.to_string_lossy().to_string();
        let module_list = module_argument(modules);
        let args = ["-c", config_file.as_str(), "-u", module_list.as_str(), "--stop-after-init"];

        self.privilege_wrapper
            .run_odoo(
                &layout.odoo_bin,
                &args,
                &self.system_user,
                &layout.instance_dir,
                self.timeout,
            )
            .await
    }
}
