use clap::Parser;
use log::{error, info};
use std::process;

use autoscale_core::api;
use autoscale_core::cli::{Cli, CliHandler, Commands};
use autoscale_core::error::AutoscaleError;
use autoscale_core::logging;
use autoscale_core::types::HeartbeatResponse;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // the server installs its own tracing subscriber
    if !matches!(cli.command, Commands::Serve { .. }) {
        env_logger::init();
    }

    if let Err(e) = process_command(&cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn process_command(cli: &Cli) -> Result<(), AutoscaleError> {
    let handler = CliHandler::new();

    match &cli.command {
        Commands::Serve { port } => {
            let mut config = cli.load_config()?;
            if let Some(port) = port {
                config.server.port = *port;
            }
            logging::init(&config.logging)?;
            api::run(&config).await?;
        }
        Commands::Heartbeat {
            instance,
            interval,
            url,
        } => match handler.send_heartbeat(url, instance, *interval).await? {
            HeartbeatResponse::Empty => println!("{{}}"),
            HeartbeatResponse::MasterIp(ip) => println!("master-ip: {}", ip),
            HeartbeatResponse::Shutdown => println!("action: shutdown"),
        },
        Commands::ResetElection { url } => {
            if handler.reset_election(url).await? {
                println!("Master election reset");
            } else {
                println!("Master election reset failed");
            }
        }
        Commands::Status { url } => {
            let running = handler.status(url).await?;
            println!(
                "Server Status: {}",
                if running { "Running" } else { "Stopped" }
            );
        }
        Commands::InitConfig { path } => {
            handler.init_config(path)?;
            info!("Wrote default configuration to {}", path.display());
            println!("Configuration written to {}", path.display());
        }
    }

    Ok(())
}
