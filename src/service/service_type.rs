use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport protocol label of a DNS-SD service type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('_').to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol {other:?}")),
        }
    }
}

/// A service type such as `_http._tcp`, optionally with a subtype
/// (`_printer._sub._http._tcp`).
///
/// Parsing is lenient: leading underscores are optional, a missing or
/// unrecognised protocol leaves `protocol` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceType {
    pub name: String,
    pub protocol: Option<Protocol>,
    pub subtype: Option<String>,
}

impl ServiceType {
    pub fn new(name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            protocol: Some(protocol),
            subtype: None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(subtype) = &self.subtype {
            write!(f, "_{subtype}._sub.")?;
        }
        write!(f, "_{}", self.name)?;
        if let Some(protocol) = self.protocol {
            write!(f, "._{protocol}")?;
        }
        Ok(())
    }
}

impl FromStr for ServiceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.strip_prefix('_').unwrap_or(part))
            .collect();

        let mut subtype = None;
        if parts.contains(&"sub") && parts.len() >= 2 {
            subtype = Some(parts.remove(0).to_string());
            parts.remove(0);
        }
        let mut parts = parts.into_iter();
        Ok(Self {
            name: parts.next().unwrap_or_default().to_string(),
            protocol: parts.next().and_then(|p| p.parse().ok()),
            subtype,
        })
    }
}
