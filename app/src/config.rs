use std::time::Duration;

use config::{Config, Environment, File};
use serde::*;

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Seconds between two polling rounds
    #[serde(default = "ManagerConfig::default_refresh_jobs_interval")]
    pub refresh_jobs_interval: u64,

    /// Directory of the calculation store
    #[serde(default = "ManagerConfig::default_save_path")]
    pub save_path: String,

    /// `tracing_subscriber::EnvFilter` directives, `RUST_LOG` takes precedence
    #[serde(default = "ManagerConfig::default_log_filter")]
    pub log_filter: String,

    #[serde(default = "Default::default")]
    pub computers: Vec<ComputerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputerConfig {
    pub name: String,

    #[serde(default = "Default::default")]
    pub scheduler: SchedulerConfig,

    /// Account whose jobs are listed
    #[serde(default = "Default::default")]
    pub username: Option<String>,

    /// Commands run locally without it
    #[serde(default = "Default::default")]
    pub ssh_proxy: Option<SshProxyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshProxyConfig {
    pub host: String,

    pub username: String,

    #[serde(default = "SshProxyConfig::default_port")]
    pub port: u16,
}

/// `config.yaml` (or any other format `config` knows) in the working
/// directory, overridden by `EXECMANAGER__*` variables.
pub fn build_config() -> anyhow::Result<ManagerConfig> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("EXECMANAGER").separator("__"))
        .build()?;
    Ok(config.try_deserialize()?)
}

impl ManagerConfig {
    pub fn default_refresh_jobs_interval() -> u64 {
        60
    }

    pub fn default_save_path() -> String {
        ".".to_owned()
    }

    pub fn default_log_filter() -> String {
        "info".to_owned()
    }

    /// Never below five seconds.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_jobs_interval.max(5))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            r#type: Self::default_type(),
        }
    }
}

impl SchedulerConfig {
    pub fn default_type() -> String {
        "pbspro".to_owned()
    }
}

impl SshProxyConfig {
    pub fn default_port() -> u16 {
        22
    }
}
