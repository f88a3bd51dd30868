use crate::error::{AgentError, Result};
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for the back-off and setup timeouts (one day).
const MAX_WAIT_MS: u64 = 24 * 60 * 60 * 1000;

/// Load environment variables from `.env` in the working directory.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

/// Load environment variables from a dotenv-style file.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv_from(env_path: &Path) {
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: called from main before the runtime starts any other thread
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let mut value = value.trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            pairs.push((key.trim(), value));
        }
    }

    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub wifi: WifiConfig,
    pub hub: HubConfig,
    pub device: DeviceConfig,
    pub http: HttpConfig,
    pub timing: TimingConfig,
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub passphrase: String,
    /// Interface that must hold an IPv4 address before the agent proceeds.
    pub interface: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// `<name>.azure-devices.net`
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    /// Base64 primary key of the device identity.
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Function endpoint receiving the telemetry payload. HTTP delivery is off when unset.
    pub function_url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub token_duration_secs: u64,
    pub hysteresis_ms: u64,
    pub poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub attach_timeout_ms: u64,
    pub clock_sync_timeout_ms: u64,
}

impl TimingConfig {
    pub fn hysteresis(&self) -> Duration {
        Duration::from_millis(self.hysteresis_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn clock_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.clock_sync_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// `gpio:<pin>` or `sim:<on_ms>/<off_ms>`
    pub sensor: String,
    pub led_occupied_pin: Option<u32>,
    pub led_free_pin: Option<u32>,
    pub gpio_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi: WifiConfig {
                ssid: String::new(),
                passphrase: String::new(),
                interface: "wlan0".to_string(),
            },
            hub: HubConfig {
                host: String::new(),
                port: 8883,
                use_tls: true,
            },
            device: DeviceConfig {
                id: String::new(),
                key: String::new(),
            },
            http: HttpConfig {
                function_url: None,
                timeout_ms: 10_000,
            },
            timing: TimingConfig {
                token_duration_secs: 60,
                hysteresis_ms: 10_000,
                poll_interval_ms: 100,
                retry_backoff_ms: 5_000,
                attach_timeout_ms: 10_000,
                clock_sync_timeout_ms: 30_000,
            },
            hardware: HardwareConfig {
                sensor: "gpio:14".to_string(),
                led_occupied_pin: Some(18),
                led_free_pin: Some(19),
                gpio_root: "/sys/class/gpio".to_string(),
            },
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ssid) = env_string("WIFI_SSID") {
            config.wifi.ssid = ssid;
        }
        if let Some(passphrase) = env_string("WIFI_PASSPHRASE") {
            config.wifi.passphrase = passphrase;
        }
        if let Some(interface) = env_string("WIFI_INTERFACE") {
            config.wifi.interface = interface;
        }

        // IoT Hub
        if let Some(host) = env_string("IOT_HUB_HOST") {
            config.hub.host = host;
        }
        if let Some(port) = env_parsed("IOT_HUB_PORT") {
            config.hub.port = port;
        }
        if let Some(tls) = env_flag("IOT_HUB_TLS") {
            config.hub.use_tls = tls;
        }
        if let Some(id) = env_string("DEVICE_ID") {
            config.device.id = id;
        }
        if let Some(key) = env_string("DEVICE_KEY") {
            config.device.key = key;
        }

        // HTTP fallback
        if let Some(url) = env_string("HTTP_FUNCTION_URL")
            && !url.trim().is_empty()
        {
            config.http.function_url = Some(url);
        }
        if let Some(ms) = env_parsed("HTTP_TIMEOUT_MS") {
            config.http.timeout_ms = ms;
        }

        // Timing
        if let Some(secs) = env_parsed("TOKEN_DURATION_SECS") {
            config.timing.token_duration_secs = secs;
        }
        if let Some(ms) = env_parsed("HYSTERESIS_MS") {
            config.timing.hysteresis_ms = ms;
        }
        if let Some(ms) = env_parsed("POLL_INTERVAL_MS") {
            config.timing.poll_interval_ms = ms;
        }
        if let Some(ms) = env_parsed("RETRY_BACKOFF_MS") {
            config.timing.retry_backoff_ms = ms;
        }
        if let Some(ms) = env_parsed("ATTACH_TIMEOUT_MS") {
            config.timing.attach_timeout_ms = ms;
        }
        if let Some(ms) = env_parsed("CLOCK_SYNC_TIMEOUT_MS") {
            config.timing.clock_sync_timeout_ms = ms;
        }

        // Hardware
        if let Some(sensor) = env_string("SENSOR_SOURCE") {
            config.hardware.sensor = sensor;
        }
        if let Some(pin) = env_parsed("LED_OCCUPIED_PIN") {
            config.hardware.led_occupied_pin = Some(pin);
        }
        if let Some(pin) = env_parsed("LED_FREE_PIN") {
            config.hardware.led_free_pin = Some(pin);
        }
        if let Some(root) = env_string("GPIO_ROOT") {
            config.hardware.gpio_root = root;
        }

        config
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.device.id.trim().is_empty() {
            return Err(AgentError::Config("DEVICE_ID is required".into()));
        }
        if self.hub.host.trim().is_empty() {
            return Err(AgentError::Config("IOT_HUB_HOST is required".into()));
        }
        if let Err(e) = BASE64_STANDARD.decode(self.device.key.trim()) {
            return Err(AgentError::Config(format!(
                "DEVICE_KEY is not valid base64: {}",
                e
            )));
        }
        if self.timing.token_duration_secs == 0 {
            return Err(AgentError::Config(
                "TOKEN_DURATION_SECS must be positive".into(),
            ));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(AgentError::Config("POLL_INTERVAL_MS must be positive".into()));
        }
        for (name, value) in [
            ("RETRY_BACKOFF_MS", self.timing.retry_backoff_ms),
            ("ATTACH_TIMEOUT_MS", self.timing.attach_timeout_ms),
            ("CLOCK_SYNC_TIMEOUT_MS", self.timing.clock_sync_timeout_ms),
        ] {
            if value > MAX_WAIT_MS {
                return Err(AgentError::Config(format!(
                    "{} must not exceed {} ms",
                    name, MAX_WAIT_MS
                )));
            }
        }
        Ok(())
    }
}
