use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

use crate::discovery::WatcherOptions;
use crate::service::{Protocol, ServiceConfig};
use crate::transport::TransportOptions;

/// mDNS discovery daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Socket and probing configuration
    #[serde(default)]
    pub mdns: MdnsConfig,

    /// Browsing configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Local services to publish
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// UDP port to bind and send to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Multicast TTL for outgoing packets
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,

    /// Receive our own multicast packets
    #[serde(default = "default_true")]
    pub multicast_loopback: bool,

    /// Restrict multicast to the interface with this IPv4 address
    #[serde(default)]
    pub interface: Option<Ipv4Addr>,

    /// Interval between group membership refreshes in milliseconds
    #[serde(default = "default_membership_refresh")]
    pub membership_refresh_ms: u64,

    /// Probe before announcing configured services
    #[serde(default = "default_true")]
    pub probe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Browse the network for `service_type`
    #[serde(default = "default_true")]
    pub autodiscover: bool,

    /// Service type to browse, without underscore or protocol
    #[serde(default = "default_service_type")]
    pub service_type: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Seconds between repeated PTR queries
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// Only report instances whose name starts with one of these
    #[serde(default)]
    pub name_prefixes: Vec<String>,

    /// Devices known up front, reported without network discovery
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub ip: Ipv4Addr,
    #[serde(default = "default_target_port")]
    pub port: u16,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    crate::transport::MDNS_PORT
}

fn default_multicast_ttl() -> u32 {
    255
}

fn default_true() -> bool {
    true
}

fn default_membership_refresh() -> u64 {
    5000
}

fn default_service_type() -> String {
    "http".to_string()
}

fn default_polling_interval() -> u64 {
    30
}

fn default_target_port() -> u16 {
    crate::discovery::DEFAULT_PORT
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            multicast_ttl: default_multicast_ttl(),
            multicast_loopback: true,
            interface: None,
            membership_refresh_ms: default_membership_refresh(),
            probe: true,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            autodiscover: true,
            service_type: default_service_type(),
            protocol: Protocol::default(),
            polling_interval_secs: default_polling_interval(),
            name_prefixes: Vec::new(),
            targets: Vec::new(),
        }
    }
}

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (TOML format)
    #[arg(short, long, env = "MDNS_DISCOVERY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MDNS_DISCOVERY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Service type to browse (e.g. http, ipp)
    #[arg(short, long, env = "MDNS_DISCOVERY_SERVICE_TYPE")]
    pub service_type: Option<String>,

    /// Do not browse the network; only report configured targets
    #[arg(long, env = "MDNS_DISCOVERY_NO_AUTODISCOVER")]
    pub no_autodiscover: bool,

    /// Seconds between repeated discovery queries
    #[arg(long, env = "MDNS_DISCOVERY_POLLING_INTERVAL")]
    pub polling_interval: Option<u64>,

    /// Print an example configuration file with defaults and exit
    #[arg(long)]
    pub print_example_config: bool,
}

impl Config {
    /// Print an example configuration file with all defaults and comments
    pub fn print_example_config() {
        println!(r#"# mDNS Discovery Configuration
#
# All settings have defaults and are optional.

[logging]
# Options: trace, debug, info, warn, error
# Default: info
level = "info"

[mdns]
# UDP port used for mDNS traffic
# Default: 5353
port = 5353

# TTL of outgoing multicast packets
# Default: 255
multicast_ttl = 255

# Deliver our own multicast packets back to us
# Default: true
multicast_loopback = true

# IPv4 address of the interface to use for multicast
# Default: all interfaces
# interface = "192.168.1.2"

# How often group memberships are refreshed, in milliseconds
# Default: 5000
membership_refresh_ms = 5000

# Probe the network for name conflicts before announcing services
# Default: true
probe = true

[discovery]
# Browse the network for service_type
# Default: true
autodiscover = true

# Service type to browse, without the leading underscore
# Default: http
service_type = "http"

# tcp or udp
# Default: tcp
protocol = "tcp"

# Seconds between repeated discovery queries
# Default: 30
polling_interval_secs = 30

# Only report instances whose name starts with one of these (case-insensitive)
# Default: [] (report everything)
name_prefixes = []

# Devices reported at startup without network discovery
# [[discovery.targets]]
# name = "Living Room"
# ip = "192.168.1.40"
# port = 80

# Local services to publish
# [[services]]
# name = "My Web Server"
# type = "http"
# port = 8080
# txt = {{ path = "/" }}
"#);
    }

    /// Load configuration from file, environment variables, and CLI arguments
    pub fn load(args: Args) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut config = if let Some(config_path) = &args.config {
            let contents = std::fs::read_to_string(config_path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if let Some(service_type) = args.service_type {
            config.discovery.service_type = service_type;
        }

        if args.no_autodiscover {
            config.discovery.autodiscover = false;
        }

        if let Some(polling_interval) = args.polling_interval {
            config.discovery.polling_interval_secs = polling_interval;
        }

        for service in &config.services {
            service.validate()?;
        }

        Ok(config)
    }

    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> Level {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => {
                eprintln!("Invalid log level '{}', defaulting to INFO", self.logging.level);
                Level::INFO
            }
        }
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            port: self.mdns.port,
            multicast_ttl: self.mdns.multicast_ttl,
            multicast_loopback: self.mdns.multicast_loopback,
            interface_v4: self.mdns.interface,
            membership_refresh: Duration::from_millis(self.mdns.membership_refresh_ms),
            ..Default::default()
        }
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            service_type: self.discovery.service_type.clone(),
            protocol: self.discovery.protocol,
            name_prefixes: self.discovery.name_prefixes.clone(),
            polling_interval: (self.discovery.polling_interval_secs > 0)
                .then(|| Duration::from_secs(self.discovery.polling_interval_secs)),
        }
    }

    /// Configured services, with `[mdns] probe = false` overriding each entry.
    pub fn services_to_publish(&self) -> Vec<ServiceConfig> {
        self.services
            .iter()
            .cloned()
            .map(|mut service| {
                service.probe &= self.mdns.probe;
                service
            })
            .collect()
    }
}
