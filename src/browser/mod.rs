//! DNS-SD browsing.
//!
//! A [`Browser`] sends a PTR query for one service type (or for every type,
//! via the DNS-SD meta-query) and turns incoming responses into
//! [`RemoteService`] up / txt-update / down events.

#[cfg(test)]
mod tests;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::events::{Emitter, ListenerId};
use crate::service::{Protocol, ServiceType, TLD, TxtFilter, TxtMap, txt};
use crate::transport::{Packet, PacketTransport};
use crate::wire::{Message, Question, RData, RecordType, ResourceRecord, name};

/// Meta-query name listing every advertised service type.
pub const WILDCARD: &str = "_services._dns-sd._udp.local";

#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    /// Bare type name such as `http`. `None` browses every type.
    pub service_type: Option<String>,
    pub protocol: Protocol,
    /// Restricts the query to one instance name.
    pub name: Option<String>,
    /// Required TXT pairs.
    pub txt: Option<TxtMap>,
}

impl BrowserOptions {
    pub fn for_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: Some(service_type.into()),
            ..Default::default()
        }
    }
}

/// A service instance discovered on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub name: String,
    pub fqdn: String,
    pub host: String,
    pub port: u16,
    pub service_type: String,
    pub protocol: Option<Protocol>,
    pub subtypes: Vec<String>,
    pub txt: TxtMap,
    pub raw_txt: Vec<Vec<u8>>,
    pub addresses: Vec<IpAddr>,
    /// Sender of the response the service was assembled from.
    pub referer: SocketAddr,
}

#[derive(Debug, Default)]
pub struct BrowserEvents {
    pub up: Emitter<RemoteService>,
    pub down: Emitter<RemoteService>,
    pub txt_update: Emitter<RemoteService>,
}

/// A service assembled from one response.
struct Candidate {
    service: RemoteService,
    /// Whether the response carried a TXT record for it.
    has_txt: bool,
}

enum Change {
    Up(RemoteService),
    Down(RemoteService),
    TxtUpdate(RemoteService),
}

#[derive(Default)]
struct BrowserState {
    /// Names whose PTR records are tracked.
    names: Vec<String>,
    services: Vec<RemoteService>,
}

pub struct Browser {
    transport: Arc<dyn PacketTransport>,
    name: String,
    wildcard: bool,
    filter: Option<TxtFilter>,
    state: Mutex<BrowserState>,
    events: BrowserEvents,
    listener: Mutex<Option<ListenerId>>,
    weak: Weak<Browser>,
}

impl Browser {
    /// Creates a browser. Nothing is sent until [`start`](Self::start).
    pub fn new(transport: Arc<dyn PacketTransport>, options: BrowserOptions) -> Arc<Self> {
        let (name, wildcard) = match &options.service_type {
            None => (WILDCARD.to_string(), true),
            Some(service_type) => {
                let type_name = format!(
                    "{}.{TLD}",
                    ServiceType::new(service_type.clone(), options.protocol)
                );
                match &options.name {
                    Some(instance) => (format!("{instance}.{type_name}"), false),
                    None => (type_name, false),
                }
            }
        };
        let names = if wildcard { Vec::new() } else { vec![name.clone()] };

        Arc::new_cyclic(|weak| Self {
            transport,
            name,
            wildcard,
            filter: options.txt.map(TxtFilter::new),
            state: Mutex::new(BrowserState {
                names,
                services: Vec::new(),
            }),
            events: BrowserEvents::default(),
            listener: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// The PTR name being queried.
    pub fn query_name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &BrowserEvents {
        &self.events
    }

    /// Currently known services.
    pub fn services(&self) -> Vec<RemoteService> {
        self.lock_state().services.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_listener().is_some()
    }

    /// Listens for responses and sends the first PTR query.
    pub async fn start(&self) -> Result<(), TransportError> {
        {
            let mut listener = self.lock_listener();
            if listener.is_some() {
                return Ok(());
            }
            let weak = self.weak.clone();
            *listener = Some(self.transport.events().response.subscribe(
                move |packet: &Packet| {
                    if let Some(browser) = weak.upgrade() {
                        browser.handle_response(packet);
                    }
                },
            ));
        }
        info!("Browsing {}", self.name);
        if let Err(e) = self.update().await {
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    /// Sends the PTR query again.
    pub async fn update(&self) -> Result<(), TransportError> {
        self.transport
            .query(vec![Question::new(&self.name, RecordType::PTR)], None)
            .await
    }

    /// Stops listening. Known services are kept.
    pub fn stop(&self) {
        if let Some(id) = self.lock_listener().take() {
            self.transport.events().response.unsubscribe(id);
            debug!("Stopped browsing {}", self.name);
        }
    }

    fn handle_response(&self, packet: &Packet) {
        let message = &packet.message;
        let mut new_types = Vec::new();
        let mut changes = Vec::new();
        {
            let mut state = self.lock_state();

            if self.wildcard {
                for answer in message.answers.iter().filter_map(|r| r.as_resource()) {
                    let RData::Ptr(target) = &answer.data else {
                        continue;
                    };
                    if !name::names_equal(&answer.name, &self.name)
                        || state.names.iter().any(|n| name::names_equal(n, target))
                    {
                        continue;
                    }
                    state.names.push(target.clone());
                    new_types.push(target.clone());
                }
            }

            let mut assembled: Vec<String> = Vec::new();
            for interest in state.names.clone() {
                for fqdn in goodbyes(&interest, message) {
                    if let Some(service) = state.remove(&fqdn) {
                        changes.push(Change::Down(service));
                    }
                }
                for candidate in build_services_for(&interest, message, packet.from) {
                    assembled.push(candidate.service.fqdn.clone());
                    self.apply(&mut state, candidate, &mut changes);
                }
            }

            // A bare TXT refresh for a service we already know.
            for record in message.resources().filter(|r| r.ttl > 0) {
                let RData::Txt(strings) = &record.data else {
                    continue;
                };
                if assembled.iter().any(|f| name::names_equal(f, &record.name)) {
                    continue;
                }
                if let Some(known) = state.find(&record.name) {
                    let mut refreshed = known.clone();
                    refreshed.txt = txt::decode(strings);
                    refreshed.raw_txt = strings.clone();
                    let candidate = Candidate {
                        service: refreshed,
                        has_txt: true,
                    };
                    self.apply(&mut state, candidate, &mut changes);
                }
            }
        }

        for change in changes {
            match change {
                Change::Up(service) => {
                    info!("Service up: {} ({}:{})", service.fqdn, service.host, service.port);
                    self.events.up.emit(&service);
                }
                Change::Down(service) => {
                    info!("Service down: {}", service.fqdn);
                    self.events.down.emit(&service);
                }
                Change::TxtUpdate(service) => {
                    debug!("TXT updated: {}", service.fqdn);
                    self.events.txt_update.emit(&service);
                }
            }
        }

        for service_type in new_types {
            debug!("Discovered service type {}", service_type);
            let transport = self.transport.clone();
            tokio::spawn(async move {
                let question = Question::new(service_type, RecordType::PTR);
                if let Err(e) = transport.query(vec![question], None).await {
                    warn!("Failed to query discovered service type: {}", e);
                }
            });
        }
    }

    fn apply(&self, state: &mut BrowserState, candidate: Candidate, changes: &mut Vec<Change>) {
        let Candidate {
            service: candidate,
            has_txt,
        } = candidate;
        let passes = self
            .filter
            .as_ref()
            .is_none_or(|filter| filter.matches(&candidate.txt));

        let Some(known) = state.find(&candidate.fqdn) else {
            if passes {
                state.services.push(candidate.clone());
                changes.push(Change::Up(candidate));
            }
            return;
        };
        // Without a TXT record there is nothing to compare against.
        if !has_txt || known.txt == candidate.txt {
            return;
        }
        if !passes {
            if let Some(removed) = state.remove(&candidate.fqdn) {
                changes.push(Change::Down(removed));
            }
            return;
        }
        if let Some(slot) = state
            .services
            .iter_mut()
            .find(|s| name::names_equal(&s.fqdn, &candidate.fqdn))
        {
            *slot = candidate.clone();
        }
        changes.push(Change::TxtUpdate(candidate));
    }

    fn lock_state(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<ListenerId>> {
        self.listener.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.stop();
    }
}

impl BrowserState {
    fn find(&self, fqdn: &str) -> Option<&RemoteService> {
        self.services
            .iter()
            .find(|s| name::names_equal(&s.fqdn, fqdn))
    }

    fn remove(&mut self, fqdn: &str) -> Option<RemoteService> {
        let index = self
            .services
            .iter()
            .position(|s| name::names_equal(&s.fqdn, fqdn))?;
        Some(self.services.remove(index))
    }
}

/// Targets of TTL-0 PTR records owned by `interest`.
fn goodbyes(interest: &str, message: &Message) -> Vec<String> {
    message
        .resources()
        .filter(|r| r.ttl == 0 && name::names_equal(&r.name, interest))
        .filter_map(|r| match &r.data {
            RData::Ptr(target) => Some(target.clone()),
            _ => None,
        })
        .collect()
}

/// Joins PTR, subtype PTR, SRV, TXT and address records of one response
/// into services. PTR targets without an SRV record are dropped.
fn build_services_for(interest: &str, message: &Message, referer: SocketAddr) -> Vec<Candidate> {
    let records: Vec<&ResourceRecord> = message.resources().filter(|r| r.ttl > 0).collect();

    records
        .iter()
        .filter(|r| name::names_equal(&r.name, interest))
        .filter_map(|ptr| match &ptr.data {
            RData::Ptr(target) => Some(target),
            _ => None,
        })
        .filter_map(|target| {
            let subtypes = records
                .iter()
                .filter(|r| r.name.contains("._sub"))
                .filter(|r| matches!(&r.data, RData::Ptr(t) if name::names_equal(t, target)))
                .filter_map(|r| r.name.parse::<ServiceType>().ok()?.subtype)
                .collect();

            let mut srv = None;
            let mut txt_strings = None;
            for record in records.iter().filter(|r| name::names_equal(&r.name, target)) {
                match &record.data {
                    RData::Srv(s) => srv = Some((record.name.clone(), s.clone())),
                    RData::Txt(strings) => txt_strings = Some(strings.clone()),
                    _ => {}
                }
            }
            let (fqdn, srv) = srv?;

            let labels: Vec<&str> = fqdn.split('.').collect();
            let instance = labels.first().copied().unwrap_or_default().to_string();
            let type_part = labels
                .get(1..labels.len().saturating_sub(1))
                .map(|l| l.join("."))
                .unwrap_or_default();
            let service_type = type_part.parse::<ServiceType>().ok()?;

            let addresses = records
                .iter()
                .filter(|r| name::names_equal(&r.name, &srv.target))
                .filter_map(|r| match r.data {
                    RData::A(v4) => Some(IpAddr::V4(v4)),
                    RData::Aaaa(v6) => Some(IpAddr::V6(v6)),
                    _ => None,
                })
                .collect();

            let has_txt = txt_strings.is_some();
            let raw_txt = txt_strings.unwrap_or_default();
            let service = RemoteService {
                name: instance,
                fqdn,
                host: srv.target,
                port: srv.port,
                service_type: service_type.name,
                protocol: service_type.protocol,
                subtypes,
                txt: txt::decode(&raw_txt),
                raw_txt,
                addresses,
                referer,
            };
            Some(Candidate { service, has_txt })
        })
        .collect()
}
