//! CLI for the autoscale coordinator
//!
//! Provides command-line access to:
//! - Running the callback API server
//! - Sending heartbeats and resetting elections against a running server
//! - Writing a starter configuration file

use clap::{Parser, Subcommand};
use log::{debug, info};
use reqwest::{Client, Response};
use std::path::PathBuf;

use crate::api::{ErrorBody, ResetResponse};
use crate::config::Config;
use crate::error::AutoscaleError;
use crate::types::{HeartbeatResponse, RequestInfo};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8443";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file, otherwise the standard locations are searched
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the heartbeat callback API server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send one heartbeat sync callback on behalf of an instance
    Heartbeat {
        #[arg(long)]
        instance: String,
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
    /// Remove the master record so the next heartbeat starts a new election
    ResetElection {
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
    /// Check whether the API server is up
    Status {
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
    /// Write a default configuration file
    InitConfig {
        #[arg(default_value = "autoscale.yml")]
        path: PathBuf,
    },
}

impl Cli {
    /// Config from `--config`, or the first one found on the search path.
    pub fn load_config(&self) -> Result<Config, AutoscaleError> {
        match &self.config {
            Some(path) => Config::load_from_file(path),
            None => Config::load(),
        }
    }
}

/// HTTP client side of the commands that talk to a running server.
pub struct CliHandler {
    client: Client,
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CliHandler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub async fn send_heartbeat(
        &self,
        url: &str,
        instance: &str,
        interval: Option<u64>,
    ) -> Result<HeartbeatResponse, AutoscaleError> {
        let request = RequestInfo {
            instance_id: instance.to_string(),
            interval,
            status: None,
        };
        debug!("Sending heartbeat for {} to {}", instance, url);
        let response = self
            .client
            .post(format!("{}/heartbeat", url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn reset_election(&self, url: &str) -> Result<bool, AutoscaleError> {
        let response = self
            .client
            .post(format!("{}/election/reset", url.trim_end_matches('/')))
            .send()
            .await?;
        let body: ResetResponse = check(response).await?.json().await?;
        Ok(body.success)
    }

    pub async fn status(&self, url: &str) -> Result<bool, AutoscaleError> {
        info!("Checking autoscale server status at {}", url);
        match self
            .client
            .get(format!("{}/health", url.trim_end_matches('/')))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_connect() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn init_config(&self, path: &PathBuf) -> Result<(), AutoscaleError> {
        if path.exists() {
            return Err(AutoscaleError::config(format!(
                "{} already exists",
                path.display()
            )));
        }
        Config::default().save(path)
    }
}

async fn check(response: Response) -> Result<Response, AutoscaleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => "no error details".to_string(),
    };
    Err(AutoscaleError::Http(format!("{}: {}", status, message)))
}
