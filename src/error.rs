use std::io;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AutoscaleError {
    /// The calling instance is not part of any known scaling group
    #[error("Unauthorized calling instance: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Election timeout: {0}")]
    ElectionTimeout(String),

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Control error: {0}")]
    Control(String),
}

pub type Result<T> = std::result::Result<T, AutoscaleError>;

impl AutoscaleError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AutoscaleError::Unauthorized(msg.into())
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        AutoscaleError::Platform(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AutoscaleError::Config(msg.into())
    }

    pub fn invalid_interval(interval: u64) -> Self {
        AutoscaleError::InvalidRequest(format!("heartbeat interval {}s is out of range", interval))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AutoscaleError::ElectionTimeout(_))
    }
}

impl From<&str> for AutoscaleError {
    fn from(s: &str) -> Self {
        AutoscaleError::Platform(s.to_string())
    }
}

impl From<String> for AutoscaleError {
    fn from(s: String) -> Self {
        AutoscaleError::Platform(s)
    }
}

impl From<io::Error> for AutoscaleError {
    fn from(e: io::Error) -> Self {
        AutoscaleError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AutoscaleError {
    fn from(e: serde_json::Error) -> Self {
        AutoscaleError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AutoscaleError {
    fn from(e: serde_yaml::Error) -> Self {
        AutoscaleError::Yaml(e.to_string())
    }
}

impl From<reqwest::Error> for AutoscaleError {
    fn from(e: reqwest::Error) -> Self {
        AutoscaleError::Http(e.to_string())
    }
}

impl From<ctrlc::Error> for AutoscaleError {
    fn from(e: ctrlc::Error) -> Self {
        AutoscaleError::Control(e.to_string())
    }
}
