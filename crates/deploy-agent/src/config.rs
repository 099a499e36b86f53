use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "/opt/deploy-agent/config.json";

const DEFAULT_DB_PATH: &str = "/opt/deploy-agent/data/deploy-agent.db";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";

const DEFAULT_GIT_BINARY: &str = "git";
const DEFAULT_GIT_TIMEOUT_SECONDS: u64 = 60;

const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";
const DEFAULT_GITHUB_TIMEOUT_SECONDS: u64 = 10;

const DEFAULT_DEV_PREFIX: &str = "dev-";
const DEFAULT_DEV_ROOT: &str = "/home/go/apps/develop/odoo";
const DEFAULT_PROD_ROOT: &str = "/home/go/apps/production/odoo";
const DEFAULT_SERVICE_PREFIX: &str = "odoo19e-";
const DEFAULT_SYSTEM_USER: &str = "go";
const DEFAULT_UPDATE_TIMEOUT_SECONDS: u64 = 300;

const DEFAULT_LOCK_WAIT_SECONDS: u64 = 2;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub database_path: Option<String>,
    pub bind_address: Option<String>,
    pub public_base_url: Option<String>,
    pub encryption_key: Option<String>,
    pub git: GitConfig,
    pub github: GitHubConfig,
    pub odoo: OdooConfig,
    pub deploy: DeployConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub binary: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OdooConfig {
    pub dev_prefix: Option<String>,
    pub dev_root: Option<String>,
    pub prod_root: Option<String>,
    pub service_prefix: Option<String>,
    pub system_user: Option<String>,
    pub use_sudo: Option<bool>,
    pub update_timeout_seconds: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub lock_wait_seconds: Option<u64>,
}

fn trimmed_or(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AgentConfig {
    /// Reads the JSON config named by `DEPLOY_AGENT_CONFIG_PATH`. A missing file
    /// yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = env_value("DEPLOY_AGENT_CONFIG_PATH")
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let path = Path::new(&config_path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {config_path}"))?;

        let config = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("Failed to parse config JSON: {config_path}"))?;

        Ok(config)
    }

    #[must_use]
    pub fn database_path(&self) -> String {
        self.database_path
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .or_else(|| env_value("DEPLOY_AGENT_DATABASE_PATH"))
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        self.bind_address
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .or_else(|| env_value("DEPLOY_AGENT_BIND_ADDRESS"))
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
    }

    #[must_use]
    pub fn public_base_url(&self) -> Option<String> {
        self.public_base_url
            .clone()
            .or_else(|| std::env::var("DEPLOY_AGENT_PUBLIC_BASE_URL").ok())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn encryption_key(&self) -> Option<String> {
        self.encryption_key
            .clone()
            .or_else(|| std::env::var("DEPLOY_AGENT_ENCRYPTION_KEY").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn git_binary(&self) -> String {
        trimmed_or(self.git.binary.as_deref(), DEFAULT_GIT_BINARY)
    }

    #[must_use]
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(
            self.git
                .timeout_seconds
                .unwrap_or(DEFAULT_GIT_TIMEOUT_SECONDS),
        )
    }

    #[must_use]
    pub fn github_api_base_url(&self) -> String {
        trimmed_or(
            self.github.api_base_url.as_deref(),
            DEFAULT_GITHUB_API_BASE_URL,
        )
        .trim_end_matches('/')
        .to_string()
    }

    #[must_use]
    pub fn github_timeout(&self) -> Duration {
        Duration::from_secs(
            self.github
                .timeout_seconds
                .unwrap_or(DEFAULT_GITHUB_TIMEOUT_SECONDS),
        )
    }

    #[must_use]
    pub fn dev_prefix(&self) -> String {
        trimmed_or(self.odoo.dev_prefix.as_deref(), DEFAULT_DEV_PREFIX)
    }

    #[must_use]
    pub fn dev_root(&self) -> PathBuf {
        PathBuf::from(trimmed_or(self.odoo.dev_root.as_deref(), DEFAULT_DEV_ROOT))
    }

    #[must_use]
    pub fn prod_root(&self) -> PathBuf {
        PathBuf::from(trimmed_or(self.odoo.prod_root.as_deref(), DEFAULT_PROD_ROOT))
    }

    #[must_use]
    pub fn service_prefix(&self) -> String {
        trimmed_or(self.odoo.service_prefix.as_deref(), DEFAULT_SERVICE_PREFIX)
    }

    #[must_use]
    pub fn system_user(&self) -> String {
        trimmed_or(self.odoo.system_user.as_deref(), DEFAULT_SYSTEM_USER)
    }

    #[must_use]
    pub fn use_sudo(&self) -> bool {
        self.odoo.use_sudo.unwrap_or(true)
    }

    #[must_use]
    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(
            self.odoo
                .update_timeout_seconds
                .unwrap_or(DEFAULT_UPDATE_TIMEOUT_SECONDS),
        )
    }

    #[must_use]
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(
            self.deploy
                .lock_wait_seconds
                .unwrap_or(DEFAULT_LOCK_WAIT_SECONDS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn load_returns_default_when_file_missing() {
        let _guard = env_lock().lock().expect("env lock poisoned");
        std::env::set_var(
            "DEPLOY_AGENT_CONFIG_PATH",
            "/path/that/does/not/exist/config.json",
        );
        std::env::remove_var("DEPLOY_AGENT_DATABASE_PATH");
        std::env::remove_var("DEPLOY_AGENT_BIND_ADDRESS");

        let config = AgentConfig::load().expect("load should succeed");
        assert_eq!(config.database_path(), DEFAULT_DB_PATH);
        assert_eq!(config.bind_address(), DEFAULT_BIND_ADDRESS);
        assert_eq!(config.git_timeout(), Duration::from_secs(60));
        assert_eq!(config.github_timeout(), Duration::from_secs(10));
        assert_eq!(config.update_timeout(), Duration::from_secs(300));
        assert_eq!(config.service_prefix(), "odoo19e-");
        assert!(config.use_sudo());

        std::env::remove_var("DEPLOY_AGENT_CONFIG_PATH");
    }

    #[test]
    fn load_parses_and_trims_values() {
        let _guard = env_lock().lock().expect("env lock poisoned");
        let tempdir = tempfile::tempdir().expect("tempdir");
        let config_path = tempdir.path().join("config.json");

        fs::write(
            &config_path,
            r#"{
  "database_path": "  /tmp/test.db  ",
  "public_base_url": "  https://ops.example.com/  ",
  "git": { "binary": "  /usr/local/bin/git  ", "timeout_seconds": 5 },
  "github": { "api_base_url": " http://127.0.0.1:9000/ " },
  "odoo": {
    "dev_prefix": " test- ",
    "prod_root": " /srv/odoo ",
    "use_sudo": false
  },
  "deploy": { "lock_wait_seconds": 7 }
}"#,
        )
        .expect("write config");

        std::env::set_var(
            "DEPLOY_AGENT_CONFIG_PATH",
            config_path.to_string_lossy().to_string(),
        );

        let config = AgentConfig::load().expect("load should succeed");
        assert_eq!(config.database_path(), "/tmp/test.db");
        assert_eq!(
            config.public_base_url().as_deref(),
            Some("https://ops.example.com")
        );
        assert_eq!(config.git_binary(), "/usr/local/bin/git");
        assert_eq!(config.git_timeout(), Duration::from_secs(5));
        assert_eq!(config.github_api_base_url(), "http://127.0.0.1:9000");
        assert_eq!(config.dev_prefix(), "test-");
        assert_eq!(config.prod_root(), PathBuf::from("/srv/odoo"));
        assert_eq!(config.dev_root(), PathBuf::from(DEFAULT_DEV_ROOT));
        assert!(!config.use_sudo());
        assert_eq!(config.lock_wait(), Duration::from_secs(7));

        std::env::remove_var("DEPLOY_AGENT_CONFIG_PATH");
    }

    #[test]
    fn load_rejects_invalid_json() {
        let _guard = env_lock().lock().expect("env lock poisoned");
        let tempdir = tempfile::tempdir().expect("tempdir");
        let config_path = tempdir.path().join("config.json");
        fs::write(&config_path, "{ not json").expect("write config");

        std::env::set_var(
            "DEPLOY_AGENT_CONFIG_PATH",
            config_path.to_string_lossy().to_string(),
        );
        let error = AgentConfig::load().expect_err("invalid JSON");
        assert!(format!("{error:#}").contains("Failed to parse config JSON"));

        std::env::remove_var("DEPLOY_AGENT_CONFIG_PATH");
    }

    #[test]
    fn encryption_key_falls_back_to_env_var() {
        let _guard = env_lock().lock().expect("env lock poisoned");
        std::env::set_var("DEPLOY_AGENT_ENCRYPTION_KEY", "  a2V5  ");

        let config = AgentConfig::default();
        assert_eq!(config.encryption_key().as_deref(), Some("a2V5"));

        std::env::remove_var("DEPLOY_AGENT_ENCRYPTION_KEY");
    }
}
