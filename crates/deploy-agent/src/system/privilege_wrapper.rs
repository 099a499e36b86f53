use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::process::{CommandError, CommandOutcome, ProcessCommand};

mod validators;

const SUDO_BIN: &str = "/usr/bin/sudo";
const SYSTEMCTL_BIN: &str = "/usr/bin/systemctl";
const ODOO_BIN_NAME: &str = "odoo-bin";

/// Runs allowlisted host commands, through `sudo -n` unless configured otherwise.
#[derive(Clone, Debug)]
pub struct PrivilegeWrapper {
    use_sudo: bool,
    service_prefix: String,
    instance_roots: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum PrivilegedCommandError {
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl PrivilegeWrapper {
    #[must_use]
    pub fn new(use_sudo: bool, service_prefix: &str, instance_roots: Vec<PathBuf>) -> Self {
        Self {
            use_sudo,
            service_prefix: service_prefix.to_string(),
            instance_roots,
        }
    }

    /// Runs `systemctl <verb> <service>`.
    ///
    /// # Errors
    /// Returns [`PrivilegedCommandError::Rejected`] if the verb or service name is not
    /// allowlisted, or a command error if the process cannot run or times out.
    pub async fn systemctl(
        &self,
        verb: &str,
        service_name: &str,
        timeout: Duration,
    ) -> Result<CommandOutcome, PrivilegedCommandError> {
        let args = [verb, service_name];
        self.validate(SYSTEMCTL_BIN, &args)
            .map_err(|error| PrivilegedCommandError::Rejected(error.to_string()))?;

        let command = self.base_command(SYSTEMCTL_BIN, None, timeout).args(args);
        Ok(command.run().await?)
    }

    /// Runs an instance's `odoo-bin` as `run_as`, from `working_dir`.
    ///
    /// # Errors
    /// Returns [`PrivilegedCommandError::Rejected`] if the executable lies outside the
    /// configured instance roots or the arguments are not allowlisted, or a command
    /// error if the process cannot run or times out.
    pub async fn run_odoo(
        &self,
        odoo_bin: &Path,
        args: &[&str],
        run_as: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutcome, PrivilegedCommandError> {
        let binary = odoo_bin.to_string_lossy().to_string();
        self.validate(&binary, args)
            .map_err(|error| PrivilegedCommandError::Rejected(error.to_string()))?;

        let command = self
            .base_command(&binary, Some(run_as), timeout)
            .args(args.iter().copied())
            .current_dir(working_dir);
        Ok(command.run().await?)
    }

    fn base_command(&self, binary: &str, run_as: Option<&str>, timeout: Duration) -> ProcessCommand {
        if !self.use_sudo {
            return ProcessCommand::new(binary, timeout);
        }

        let mut command = ProcessCommand::new(SUDO_BIN, timeout).arg("-n");
        if let Some(user) = run_as {
            command = command.args(["-u", user]);
        }
        command.arg(binary)
    }

    fn validate(&self, binary_path: &str, args: &[&str]) -> Result<()> {
        if binary_path == SYSTEMCTL_BIN {
            return validators::validate_systemctl_args(&self.service_prefix, args);
        }

        let path = Path::new(binary_path);
        if path.file_name().is_some_and(|name| name == ODOO_BIN_NAME) {
            if !self.instance_roots.iter().any(|root| path.starts_with(root))
                || binary_path.contains("..")
            {
                return Err(anyhow!(
                    "odoo-bin outside configured instance roots: {binary_path}"
                ));
            }
            return validators::validate_odoo_args(args);
        }

        Err(anyhow!("binary path is not allowed: {binary_path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper() -> PrivilegeWrapper {
        PrivilegeWrapper::new(
            false,
            "odoo19e-",
            vec![PathBuf::from("/home/go/apps/production/odoo")],
        )
    }

    #[tokio::test]
    async fn systemctl_rejects_services_without_prefix() {
        let error = wrapper()
            .systemctl("stop", "nginx", Duration::from_secs(1))
            .await
            .expect_err("should reject");
        assert!(matches!(error, PrivilegedCommandError::Rejected(_)));
        assert!(error.to_string().contains("systemctl arguments are not allowed"));
    }

    #[tokio::test]
    async fn systemctl_rejects_unknown_verbs() {
        let error = wrapper()
            .systemctl("disable", "odoo19e-acme", Duration::from_secs(1))
            .await
            .expect_err("should reject");
        assert!(matches!(error, PrivilegedCommandError::Rejected(_)));
    }

    #[tokio::test]
    async fn run_odoo_rejects_binaries_outside_roots() {
        let error = wrapper()
            .run_odoo(
                Path::new("/tmp/odoo-server/odoo-bin"),
                &["-c", "/tmp/odoo.conf", "-u", "all", "--stop-after-init"],
                "go",
                Path::new("/tmp"),
                Duration::from_secs(1),
            )
            .await
            .expect_err("should reject");
        assert!(error.to_string().contains("outside configured instance roots"));
    }

    #[tokio::test]
    async fn run_odoo_rejects_traversal() {
        let error = wrapper()
            .run_odoo(
                Path::new("/home/go/apps/production/odoo/../../odoo-bin"),
                &["-c", "/x/odoo.conf", "-u", "all", "--stop-after-init"],
                "go",
                Path::new("/tmp"),
                Duration::from_secs(1),
            )
            .await
            .expect_err("should reject");
        assert!(matches!(error, PrivilegedCommandError::Rejected(_)));
    }

    #[test]
    fn validate_rejects_other_binaries() {
        let error = wrapper()
            .validate("/bin/echo", &["hello"])
            .expect_err("should reject");
        assert!(format!("{error:#}").contains("binary path is not allowed"));
    }
}
