//! Print a SAS token for the configured device.
//!
//! Usage:
//!   cargo run --bin sas-token -- --duration 3600
//!
//! Reads the same environment (and `.env`) as the agent. Handy for testing
//! the hub connection with a generic MQTT client.

use clap::Parser;
use log::error;
use occupancy_agent::auth::{CredentialManager, SystemClock};
use occupancy_agent::config::{self, Config};
use occupancy_agent::session::HubIdentity;

#[derive(Parser)]
#[command(name = "sas-token")]
#[command(about = "Generate a SAS token for the configured IoT Hub device")]
struct Cli {
    /// Token validity in seconds
    #[arg(long, env = "TOKEN_DURATION_SECS", default_value_t = 60)]
    duration: u64,
}

fn main() {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = Config::from_env();
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    let identity = HubIdentity::new(&config.hub.host, &config.device.id);
    let mut manager =
        CredentialManager::new(&config.hub.host, &config.device.id, &config.device.key);

    match manager.ensure_fresh_credential(&SystemClock, cli.duration) {
        Ok(credential) => {
            println!("host:      {}:{}", config.hub.host, config.hub.port);
            println!("client id: {}", identity.client_id());
            println!("username:  {}", identity.username());
            println!("expires:   {}", credential.expires_at_unix());
            println!("password:  {}", credential.password());
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
