use clap::Parser;
use lib_smartfarm::connections::{BusConfig, MqttConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0} (set it via CLI, environment or config file)")]
    Missing(&'static str),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Smart farm telemetry and pump control server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SERVER_PORT", help = "Port the HTTP API listens on.")]
    pub port: Option<u16>,

    #[clap(long, env = "FARM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FARM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FARM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FARM_HOST", help = "Telemetry bus (AMQP) host.")]
    pub bus_host: Option<String>,

    #[clap(long, env = "FARM_PORT", help = "Telemetry bus (AMQP) port.")]
    pub bus_port: Option<u16>,

    #[clap(long, env = "FARM_VHOST", help = "Telemetry bus virtual host.")]
    pub bus_vhost: Option<String>,

    #[clap(long, env = "FARM_USER", help = "Telemetry bus username.")]
    pub bus_user: Option<String>,

    #[clap(long, env = "FARM_PASS", help = "Telemetry bus password.")]
    pub bus_pass: Option<String>,

    #[clap(long, env = "FARM_EXCHANGE", help = "Fanout exchange the sensors publish to.")]
    pub bus_exchange: Option<String>,

    #[clap(long, env = "MQTT_HOST", help = "Command broker (MQTT) host.")]
    pub mqtt_host: Option<String>,

    #[clap(long, env = "MQTT_PORT", help = "Command broker (MQTT) port.")]
    pub mqtt_port: Option<u16>,

    #[clap(long, env = "MQTT_USER", help = "Command broker username.")]
    pub mqtt_user: Option<String>,

    #[clap(long, env = "MQTT_PASS", help = "Command broker password.")]
    pub mqtt_pass: Option<String>,

    #[clap(long, env = "MQTT_TOPIC", help = "Topic the pump controllers subscribe to.")]
    pub mqtt_topic: Option<String>,

    #[clap(long, env = "MQTT_CONNECT_TIMEOUT_SECONDS", help = "Seconds allowed for one command connect+publish.")]
    pub mqtt_connect_timeout_seconds: Option<u64>,
}

/// Fully resolved settings, ready to hand to the library.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub bus: BusConfig,
    pub mqtt: MqttConfig,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            bus_host: other.bus_host.or(self.bus_host),
            bus_port: other.bus_port.or(self.bus_port),
            bus_vhost: other.bus_vhost.or(self.bus_vhost),
            bus_user: other.bus_user.or(self.bus_user),
            bus_pass: other.bus_pass.or(self.bus_pass),
            bus_exchange: other.bus_exchange.or(self.bus_exchange),
            mqtt_host: other.mqtt_host.or(self.mqtt_host),
            mqtt_port: other.mqtt_port.or(self.mqtt_port),
            mqtt_user: other.mqtt_user.or(self.mqtt_user),
            mqtt_pass: other.mqtt_pass.or(self.mqtt_pass),
            mqtt_topic: other.mqtt_topic.or(self.mqtt_topic),
            mqtt_connect_timeout_seconds: other
                .mqtt_connect_timeout_seconds
                .or(self.mqtt_connect_timeout_seconds),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            bus_port: Some(5672),
            bus_vhost: Some("/".to_string()),
            bus_exchange: Some("smart_farm_data".to_string()),
            mqtt_port: Some(1883),
            mqtt_connect_timeout_seconds: Some(10),
            ..Default::default()
        }
    }

    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let bus = BusConfig {
            host: self.bus_host.ok_or(ConfigError::Missing("FARM_HOST"))?,
            port: self.bus_port.unwrap_or(5672),
            vhost: self.bus_vhost.unwrap_or_else(|| "/".to_string()),
            username: self.bus_user.ok_or(ConfigError::Missing("FARM_USER"))?,
            password: self.bus_pass.ok_or(ConfigError::Missing("FARM_PASS"))?,
            exchange: self.bus_exchange.unwrap_or_else(|| "smart_farm_data".to_string()),
            consumer_tag: String::new(),
        };

        let mqtt = MqttConfig {
            host: self.mqtt_host.ok_or(ConfigError::Missing("MQTT_HOST"))?,
            port: self.mqtt_port.unwrap_or(1883),
            username: self.mqtt_user,
            password: self.mqtt_pass,
            topic: self.mqtt_topic.ok_or(ConfigError::Missing("MQTT_TOPIC"))?,
            connect_timeout: Duration::from_secs(self.mqtt_connect_timeout_seconds.unwrap_or(10)),
        };

        Ok(Settings {
            port: self.port.unwrap_or(8000),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            bus,
            mqtt,
        })
    }
}

/// Layers defaults, then the JSON config file, then CLI/environment.
pub fn layer_config(file_config: Option<Config>, cli_args: Config) -> Config {
    let mut current_config = Config::defaults();
    if let Some(file_config) = file_config {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli_args)
}

// Runs before the logger is installed, so failures go to stderr.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                eprintln!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            eprintln!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

pub fn load_config() -> Result<Settings, ConfigError> {
    // 1. Pick up a .env file if there is one; real environment variables win.
    let _ = dotenvy::dotenv();

    // 2. CLI args (which include env vars) also tell us where the config file is.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_farm.conf"));

    let file_config = read_config_file(&config_file_path);

    // 3. Defaults < file < CLI/env
    layer_config(file_config, cli_args).resolve()
}
