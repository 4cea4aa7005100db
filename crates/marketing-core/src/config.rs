use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "MARKETING_SYNC_CONFIG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfiguration {
    pub enabled: bool,
    pub api_key: String,
    pub api_secret: Option<String>,
    pub api_url: String,
    pub new_user_list: String,
    pub welcome_template: String,
    pub welcome_send_delay_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub retryable_error_codes: Vec<i64>,
    pub default_language: String,
    pub default_site_id: u64,
    pub request_timeout_secs: u64,
    pub cookie_timeout_ms: u64,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            api_secret: None,
            api_url: "https://api.sailthru.com".to_string(),
            new_user_list: String::new(),
            welcome_template: String::new(),
            welcome_send_delay_secs: 600,
            max_retries: 24,
            retry_delay_secs: 60,
            // 9: internal error, 43: rate limited
            retryable_error_codes: vec![9, 43],
            default_language: "en".to_string(),
            default_site_id: 1,
            request_timeout_secs: 10,
            cookie_timeout_ms: 1500,
        }
    }
}

impl SyncConfiguration {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).context("read config")?;
        let config = serde_json::from_str(&data).context("parse config")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create config directory")?;
        }
        let data = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, data).context("write config")?;
        Ok(())
    }

    pub fn welcome_template(&self) -> Option<&str> {
        let template = self.welcome_template.trim();
        (!template.is_empty()).then_some(template)
    }

    /// Applies a `key=value` edit from the command line.
    pub fn set_field(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "enabled" => self.enabled = value.parse().context("parse enabled")?,
            "api_key" => self.api_key = value.to_string(),
            "api_secret" => {
                self.api_secret = (!value.is_empty()).then(|| value.to_string());
            }
            "api_url" => self.api_url = value.trim_end_matches('/').to_string(),
            "new_user_list" => self.new_user_list = value.to_string(),
            "welcome_template" => self.welcome_template = value.to_string(),
            "welcome_send_delay_secs" => {
                self.welcome_send_delay_secs = value.parse().context("parse delay")?
            }
            "max_retries" => self.max_retries = value.parse().context("parse max_retries")?,
            "retry_delay_secs" => {
                self.retry_delay_secs = value.parse().context("parse retry delay")?
            }
            "retryable_error_codes" => {
                self.retryable_error_codes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(|code| code.parse::<i64>().context("parse error code"))
                    .collect::<anyhow::Result<_>>()?
            }
            "default_language" => self.default_language = value.to_string(),
            "default_site_id" => {
                self.default_site_id = value.parse().context("parse site id")?
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = value.parse().context("parse timeout")?
            }
            "cookie_timeout_ms" => {
                self.cookie_timeout_ms = value.parse().context("parse cookie timeout")?
            }
            other => anyhow::bail!("unknown config key: {other}"),
        }
        Ok(())
    }
}

/// Supplies the configuration for each task invocation.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> anyhow::Result<SyncConfiguration>;
}

pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ConfigSource for ConfigFile {
    fn load(&self) -> anyhow::Result<SyncConfiguration> {
        SyncConfiguration::load(&self.path)
    }
}

impl ConfigSource for SyncConfiguration {
    fn load(&self) -> anyhow::Result<SyncConfiguration> {
        Ok(self.clone())
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", "marketing-sync", "marketing-sync").context("resolve project dirs")
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(project_dirs()?.config_dir().join("config.json"))
}

pub fn default_content_root() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("content"))
}

pub fn default_audit_dir() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.data_local_dir().join("audit"))
}
