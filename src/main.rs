use clap::Parser;
use log::{error, info, warn};
use occupancy_agent::agent::{self, Agent, AgentParts};
use occupancy_agent::auth::{CredentialManager, SystemClock};
use occupancy_agent::config::{self, Config};
use occupancy_agent::delivery::HttpPath;
use occupancy_agent::error::Result;
use occupancy_agent::hardware::{self, InterfaceLink, SensorSource};
use occupancy_agent::instance_lock::InstanceLock;
use occupancy_agent::session::{
    ConnectionSupervisor, HubIdentity, MqttSession, SupervisorTiming,
};
use std::path::Path;
use std::time::{Duration, Instant};

/// The broker is given this long to answer a connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "occupancy-agent")]
#[command(about = "Reports room occupancy from a PIR sensor to Azure IoT Hub")]
struct Cli {
    /// Use a simulated sensor (`<on_ms>/<off_ms>`) instead of SENSOR_SOURCE
    #[arg(long, value_name = "ON/OFF")]
    simulate: Option<String>,

    /// Print the effective configuration (secrets masked) and continue
    #[arg(long)]
    log_config: bool,

    /// Skip the single instance lock
    #[arg(long, env = "OCCUPANCY_NO_LOCK")]
    no_lock: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn log_config(config: &Config) {
    info!("Configuration loaded:");
    info!("  Device ID: {}", config.device.id);
    info!("  IoT Hub: {}:{} (TLS: {})", config.hub.host, config.hub.port, config.hub.use_tls);
    info!(
        "  HTTP function: {}",
        config.http.function_url.as_deref().unwrap_or("(disabled)")
    );
    info!("  Interface: {} (SSID: {})", config.wifi.interface, config.wifi.ssid);
    info!("  Sensor: {}", config.hardware.sensor);
    info!(
        "  Token: {}s, hysteresis: {}ms, poll: {}ms, retry: {}ms",
        config.timing.token_duration_secs,
        config.timing.hysteresis_ms,
        config.timing.poll_interval_ms,
        config.timing.retry_backoff_ms
    );
}

async fn run(config: Config) -> Result<()> {
    let identity = HubIdentity::new(&config.hub.host, &config.device.id);
    let credentials = CredentialManager::new(&config.hub.host, &config.device.id, &config.device.key);
    let mut supervisor = ConnectionSupervisor::new(
        MqttSession::new(identity.clone(), &config.hub),
        credentials,
        &identity,
        SupervisorTiming {
            token_duration_secs: config.timing.token_duration_secs,
            retry_backoff: config.timing.retry_backoff(),
            connect_timeout: CONNECT_TIMEOUT,
        },
    )
    .with_announcement(config.device.id.clone());
    supervisor.on_control_message(|msg| {
        info!("[Control] {} bytes on {}", msg.payload().len(), msg.topic());
    });

    let source = SensorSource::parse(&config.hardware.sensor)?;
    let sensor = source.open(Path::new(&config.hardware.gpio_root))?;
    let indicators = hardware::open_indicators(&config.hardware, &source)?;

    let agent = Agent::new(
        &config,
        AgentParts {
            supervisor,
            clock: SystemClock,
            link: Box::new(InterfaceLink::new(&config.wifi)),
            sensor,
            indicators,
            http: Box::new(HttpPath::new(&config.http)?),
        },
        Instant::now(),
    );

    info!("Occupancy agent is running");
    info!("  - Press Ctrl+C to exit");
    agent::run(agent, config.timing.poll_interval()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env file before anything else
    config::load_dotenv();
    init_logger();

    let cli = Cli::parse();
    info!("Starting occupancy agent");

    let mut config = Config::from_env();
    if let Some(timing) = cli.simulate {
        config.hardware.sensor = format!("sim:{}", timing);
    }
    if cli.log_config {
        log_config(&config);
    }
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    let _lock = if cli.no_lock {
        warn!("Running without instance lock");
        None
    } else {
        match InstanceLock::acquire(&config.device.id) {
            Ok(lock) => Some(lock),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = run(config).await {
        error!("Occupancy agent stopped: {}", e);
        std::process::exit(1);
    }

    info!("Occupancy agent stopped");
}
