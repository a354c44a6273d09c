//! Local service descriptions and the record sets they advertise.

mod service_type;
pub mod txt;


use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ServiceError;
use crate::wire::{RData, ResourceRecord, Srv};

pub use service_type::{Protocol, ServiceType};
pub use txt::{TxtFilter, TxtMap};

pub const TLD: &str = "local";

pub const PTR_TTL: u32 = 28800;
pub const SRV_TTL: u32 = 120;
pub const TXT_TTL: u32 = 4500;
pub const ADDRESS_TTL: u32 = 120;

/// What a caller asks to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,
    /// Bare type name, e.g. `http` for `_http._tcp`.
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub port: u16,
    /// Target host of the SRV record. Defaults to `<hostname>.local`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub subtypes: Vec<String>,
    #[serde(default)]
    pub txt: TxtMap,
    #[serde(default)]
    pub disable_ipv6: bool,
    #[serde(default = "default_probe")]
    pub probe: bool,
}

fn default_probe() -> bool {
    true
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            port,
            probe: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.name.is_empty() {
            return Err(ServiceError::MissingName);
        }
        if self.service_type.is_empty() {
            return Err(ServiceError::MissingType);
        }
        if self.port == 0 {
            return Err(ServiceError::MissingPort);
        }
        Ok(())
    }
}

/// A host network address as seen by the record builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub addr: IpAddr,
    /// Loopback.
    pub internal: bool,
    /// Hardware address, when the platform exposes one.
    pub mac: Option<[u8; 6]>,
}

impl NetworkInterface {
    /// Loopback interfaces and those with an all-zero hardware address are
    /// never advertised.
    pub fn is_advertisable(&self) -> bool {
        !self.internal && self.mac != Some([0; 6])
    }
}

/// Enumerates host addresses.
pub fn network_interfaces() -> Vec<NetworkInterface> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .map(|iface| NetworkInterface {
                mac: hardware_address(&iface.name),
                internal: iface.is_loopback(),
                addr: iface.ip(),
                name: iface.name,
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate network interfaces: {}", e);
            Vec::new()
        }
    }
}

#[cfg(target_os = "linux")]
fn hardware_address(interface: &str) -> Option<[u8; 6]> {
    let raw = std::fs::read_to_string(format!("/sys/class/net/{interface}/address")).ok()?;
    parse_mac(raw.trim())
}

#[cfg(not(target_os = "linux"))]
fn hardware_address(_interface: &str) -> Option<[u8; 6]> {
    None
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

/// The default SRV target: the system hostname under `.local`.
pub fn default_host() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    if host.to_ascii_lowercase().ends_with(".local") {
        host
    } else {
        format!("{host}.{TLD}")
    }
}

/// A validated local service and the names derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalService {
    /// Instance name with dots replaced by `-`.
    pub name: String,
    pub service_type: ServiceType,
    pub port: u16,
    pub host: String,
    pub fqdn: String,
    pub subtypes: Vec<String>,
    pub txt: TxtMap,
    pub disable_ipv6: bool,
}

impl LocalService {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let name = config.name.replace('.', "-");
        let service_type = ServiceType::new(config.service_type, config.protocol);
        let fqdn = format!("{name}.{service_type}.{TLD}");
        Ok(Self {
            name,
            service_type,
            port: config.port,
            host: config.host.unwrap_or_else(default_host),
            fqdn,
            subtypes: config.subtypes,
            txt: config.txt,
            disable_ipv6: config.disable_ipv6,
        })
    }

    /// `_type._proto.local`
    pub fn type_name(&self) -> String {
        format!("{}.{TLD}", self.service_type)
    }

    /// The full record set using the host's current interfaces.
    pub fn records(&self) -> Vec<ResourceRecord> {
        self.records_with(&network_interfaces())
    }

    pub fn records_with(&self, interfaces: &[NetworkInterface]) -> Vec<ResourceRecord> {
        let type_name = self.type_name();
        let mut records = vec![
            ResourceRecord::new(&type_name, PTR_TTL, RData::Ptr(self.fqdn.clone())),
            ResourceRecord::new(
                &self.fqdn,
                SRV_TTL,
                RData::Srv(Srv {
                    priority: 0,
                    weight: 0,
                    port: self.port,
                    target: self.host.clone(),
                }),
            ),
            ResourceRecord::new(&self.fqdn, TXT_TTL, RData::Txt(self.txt_strings())),
        ];

        for subtype in &self.subtypes {
            records.push(ResourceRecord::new(
                format!("_{subtype}._sub.{type_name}"),
                PTR_TTL,
                RData::Ptr(self.fqdn.clone()),
            ));
        }

        for iface in interfaces.iter().filter(|i| i.is_advertisable()) {
            let data = match iface.addr {
                IpAddr::V4(v4) => RData::A(v4),
                IpAddr::V6(_) if self.disable_ipv6 => continue,
                IpAddr::V6(v6) => RData::Aaaa(v6),
            };
            records.push(ResourceRecord::new(&self.host, ADDRESS_TTL, data));
        }
        records
    }

    /// An empty map is sent as a single empty string (RFC 6763 section 6.1).
    fn txt_strings(&self) -> Vec<Vec<u8>> {
        let strings = txt::encode(&self.txt);
        if strings.is_empty() {
            vec![Vec::new()]
        } else {
            strings
        }
    }
}
