use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const PRODUCTION_BRANCH: &str = "main";

static INSTANCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]{0,99}$").expect("instance name regex is valid")
});
static MODULE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").expect("module name regex is valid"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceClass {
    Development,
    Production,
}

impl InstanceClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// Production always tracks `main`; development defaults to a branch named after
    /// the instance.
    #[must_use]
    pub fn default_branch(self, instance_name: &str) -> String {
        match self {
            Self::Production => PRODUCTION_BRANCH.to_string(),
            Self::Development => instance_name.to_string(),
        }
    }

    /// Applies the write-time branch rule: production ignores the requested branch.
    #[must_use]
    pub fn effective_branch(self, instance_name: &str, requested: Option<&str>) -> String {
        match (self, requested.map(str::trim).filter(|value| !value.is_empty())) {
            (Self::Production, _) => PRODUCTION_BRANCH.to_string(),
            (Self::Development, Some(branch)) => branch.to_string(),
            (Self::Development, None) => self.default_branch(instance_name),
        }
    }
}

impl fmt::Display for InstanceClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for InstanceClass {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(anyhow!("unknown instance class: {other}")),
        }
    }
}

/// Filesystem and service names for one Odoo instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceLayout {
    pub instance_name: String,
    pub class: InstanceClass,
    pub service_name: String,
    pub instance_dir: PathBuf,
    pub odoo_bin: PathBuf,
    pub config_file: PathBuf,
}

pub trait NamingPolicy: Send + Sync {
    fn classify(&self, instance_name: &str) -> InstanceClass;

    fn layout(&self, instance_name: &str) -> InstanceLayout;
}

/// Instances named with the development prefix (`dev-` by default) are development
/// instances; everything else is production.
#[derive(Clone, Debug)]
pub struct PrefixNamingPolicy {
    pub dev_prefix: String,
    pub dev_root: PathBuf,
    pub prod_root: PathBuf,
    pub service_prefix: String,
}

impl NamingPolicy for PrefixNamingPolicy {
    fn classify(&self, instance_name: &str) -> InstanceClass {
        if instance_name.starts_with(&self.dev_prefix) {
            InstanceClass::Development
        } else {
            InstanceClass::Production
        }
    }

    fn layout(&self, instance_name: &str) -> InstanceLayout {
        let class = self.classify(instance_name);
        let root = match class {
            InstanceClass::Development => &self.dev_root,
            InstanceClass::Production => &self.prod_root,
        };
        let instance_dir = root.join(instance_name);

        InstanceLayout {
            instance_name: instance_name.to_string(),
            class,
            service_name: format!("{}{instance_name}", self.service_prefix),
            odoo_bin: instance_dir.join("odoo-server").join("odoo-bin"),
            config_file: instance_dir.join("odoo.conf"),
            instance_dir,
        }
    }
}

pub fn validate_instance_name(instance_name: &str) -> Result<()> {
    if !INSTANCE_NAME.is_match(instance_name) {
        bail!("instance name must match ^[a-zA-Z0-9][a-zA-Z0-9_-]{{0,99}}$");
    }

    Ok(())
}

pub fn validate_module_names(modules: &[String]) -> Result<()> {
    if let Some(invalid) = modules.iter().find(|module| !MODULE_NAME.is_match(module)) {
        bail!("module name must match ^[a-z0-9_]+$: {invalid}");
    }

    Ok(())
}
