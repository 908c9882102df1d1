use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use crate::error::AutoscaleError;
use crate::types::Instance;

/// Longest heartbeat interval a callback may ask for.
pub const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 86_400;
/// Upper bound for the election timeout, delay allowance and execution budget.
pub const MAX_SETTING_SECS: u64 = 7 * 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub autoscale: AutoscaleSettings,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    /// Write JSON logs to a daily rolling file in `directory`
    #[serde(default)]
    pub file: bool,
    #[serde(default = "default_log_files")]
    pub files_to_keep: usize,
}

/// Election and heartbeat tuning shared by every callback invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleSettings {
    /// Only members of this group may start a master election
    #[serde(default = "default_master_group")]
    pub master_scaling_group_name: String,
    /// Let slaves come up headless while a vote is pending
    #[serde(default)]
    pub master_election_no_wait: bool,
    #[serde(default = "default_master_election_timeout")]
    pub master_election_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_loss_count")]
    pub heartbeat_loss_count: u32,
    #[serde(default = "default_heartbeat_delay_allowance")]
    pub heartbeat_delay_allowance_secs: u64,
    #[serde(default = "default_election_poll_interval")]
    pub election_poll_interval_ms: u64,
    #[serde(default = "default_execution_budget")]
    pub execution_budget_secs: u64,
    #[serde(default = "default_execution_safety_margin")]
    pub execution_safety_margin_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoryConfig {
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            file: false,
            files_to_keep: default_log_files(),
        }
    }
}

impl Default for AutoscaleSettings {
    fn default() -> Self {
        Self {
            master_scaling_group_name: default_master_group(),
            master_election_no_wait: false,
            master_election_timeout_secs: default_master_election_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_loss_count: default_heartbeat_loss_count(),
            heartbeat_delay_allowance_secs: default_heartbeat_delay_allowance(),
            election_poll_interval_ms: default_election_poll_interval(),
            execution_budget_secs: default_execution_budget(),
            execution_safety_margin_ms: default_execution_safety_margin(),
        }
    }
}

impl AutoscaleSettings {
    pub fn election_poll_interval(&self) -> Duration {
        Duration::from_millis(self.election_poll_interval_ms)
    }

    pub fn execution_budget(&self) -> Duration {
        Duration::from_secs(self.execution_budget_secs)
    }

    pub fn execution_safety_margin(&self) -> Duration {
        Duration::from_millis(self.execution_safety_margin_ms)
    }

    pub fn master_election_timeout(&self) -> chrono::Duration {
        seconds_delta(self.master_election_timeout_secs)
    }

    pub fn heartbeat_delay_allowance(&self) -> chrono::Duration {
        seconds_delta(self.heartbeat_delay_allowance_secs)
    }

    pub fn validate(&self) -> Result<(), AutoscaleError> {
        if self.master_scaling_group_name.trim().is_empty() {
            return Err(AutoscaleError::config("master_scaling_group_name must not be empty"));
        }
        if self.heartbeat_interval_secs == 0 || self.heartbeat_interval_secs > MAX_HEARTBEAT_INTERVAL_SECS {
            return Err(AutoscaleError::config(format!(
                "heartbeat_interval_secs must be between 1 and {}",
                MAX_HEARTBEAT_INTERVAL_SECS
            )));
        }
        if self.heartbeat_loss_count == 0 {
            return Err(AutoscaleError::config("heartbeat_loss_count must be greater than zero"));
        }
        if self.election_poll_interval_ms == 0 || self.election_poll_interval_ms > MAX_SETTING_SECS * 1000 {
            return Err(AutoscaleError::config("election_poll_interval_ms is out of range"));
        }
        let bounded = [
            ("master_election_timeout_secs", self.master_election_timeout_secs),
            ("heartbeat_delay_allowance_secs", self.heartbeat_delay_allowance_secs),
            ("execution_budget_secs", self.execution_budget_secs),
        ];
        for (name, secs) in bounded {
            if secs > MAX_SETTING_SECS {
                return Err(AutoscaleError::config(format!(
                    "{} must not exceed {}",
                    name, MAX_SETTING_SECS
                )));
            }
        }
        if self.execution_safety_margin_ms > self.execution_budget_secs.saturating_mul(1000) {
            return Err(AutoscaleError::config(
                "execution_safety_margin_ms must not exceed the execution budget",
            ));
        }
        Ok(())
    }
}

// Saturates instead of panicking; validated settings never reach the cap.
fn seconds_delta(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_files() -> usize {
    7
}

fn default_master_group() -> String {
    "fgt-master-asg".to_string()
}

fn default_master_election_timeout() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_loss_count() -> u32 {
    3
}

fn default_heartbeat_delay_allowance() -> u64 {
    2
}

fn default_election_poll_interval() -> u64 {
    5000
}

fn default_execution_budget() -> u64 {
    300
}

fn default_execution_safety_margin() -> u64 {
    6000 // about one poll interval plus a second
}

impl Config {
    pub fn load() -> Result<Self, AutoscaleError> {
        // Try loading from different locations in order
        let config_paths = [
            PathBuf::from("autoscale.yml"),
            dirs::config_dir()
                .map(|p| p.join("autoscale/config.yml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/autoscale/config.yml"),
        ];

        for path in &config_paths {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn load_from_file(path: &PathBuf) -> Result<Self, AutoscaleError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AutoscaleError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| AutoscaleError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), AutoscaleError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| AutoscaleError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| AutoscaleError::Config(format!("Failed to create config directory: {}", e)))?;
            }
        }

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml)
            .map_err(|e| AutoscaleError::Config(format!("Failed to write config: {}", e)))?;

        fs::rename(&temp_path, path)
            .map_err(|e| AutoscaleError::Config(format!("Failed to save config: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), AutoscaleError> {
        self.autoscale.validate()?;
        for instance in &self.inventory.instances {
            if instance.instance_id.is_empty() {
                return Err(AutoscaleError::config("inventory instance without instance_id"));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
