//! Consumer-facing entry points.
//!
//! [`Discovery`] bundles one transport with its responder and registry.
//! [`ServiceWatcher`] reduces browsing to a callback per newly found
//! `{name, ip, port}`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::browser::{Browser, BrowserOptions, RemoteService};
use crate::error::{ServiceError, TransportError};
use crate::registry::{Registry, ServiceHandle};
use crate::responder::Responder;
use crate::service::{Protocol, ServiceConfig};
use crate::transport::{MulticastTransport, PacketTransport, TransportOptions};

/// Port assumed when a service advertises port 0.
pub const DEFAULT_PORT: u16 = 80;

/// An mDNS session: publish local services and browse remote ones.
pub struct Discovery {
    transport: Arc<dyn PacketTransport>,
    multicast: Option<Arc<MulticastTransport>>,
    responder: Arc<Responder>,
    registry: Arc<Registry>,
}

impl Discovery {
    /// Opens a session on a multicast socket. The socket binds lazily.
    pub fn new(options: TransportOptions) -> Result<Self, TransportError> {
        let multicast = Arc::new(MulticastTransport::new(options)?);
        let mut discovery = Self::with_transport(multicast.clone());
        discovery.multicast = Some(multicast);
        Ok(discovery)
    }

    pub fn with_transport(transport: Arc<dyn PacketTransport>) -> Self {
        let responder = Responder::new(transport.clone());
        let registry = Registry::new(transport.clone(), responder.clone());
        Self {
            transport,
            multicast: None,
            responder,
            registry,
        }
    }

    pub fn transport(&self) -> &Arc<dyn PacketTransport> {
        &self.transport
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn publish(&self, config: ServiceConfig) -> Result<ServiceHandle, ServiceError> {
        self.registry.publish(config)
    }

    pub async fn unpublish_all(&self) -> Result<(), TransportError> {
        self.registry.unpublish_all().await
    }

    /// Starts a browser. Hold on to the returned value to keep it alive.
    pub async fn find(&self, options: BrowserOptions) -> Result<Arc<Browser>, TransportError> {
        let browser = Browser::new(self.transport.clone(), options);
        browser.start().await?;
        Ok(browser)
    }

    /// Waits for the first matching service, giving up after `timeout`.
    pub async fn find_one(
        &self,
        options: BrowserOptions,
        timeout: Duration,
    ) -> Result<Option<RemoteService>, TransportError> {
        let browser = Browser::new(self.transport.clone(), options);
        let (tx, mut rx) = mpsc::unbounded_channel();
        browser.events().up.subscribe(move |service: &RemoteService| {
            let _ = tx.send(service.clone());
        });
        browser.start().await?;

        let found = tokio::time::timeout(timeout, rx.recv())
            .await
            .ok()
            .flatten();
        browser.stop();
        if found.is_none() {
            debug!("No service answered {} within {:?}", browser.query_name(), timeout);
        }
        Ok(found)
    }

    /// Stops every service without goodbyes and closes the socket.
    pub async fn destroy(&self) {
        self.registry.destroy();
        self.responder.detach();
        if let Some(multicast) = &self.multicast {
            multicast.destroy().await;
        }
    }
}

/// A discovered instance reduced to what a client needs to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Discovered {
    /// First IPv4 address outside 169.254.0.0/16. Port 0 becomes
    /// [`DEFAULT_PORT`].
    pub fn from_service(service: &RemoteService) -> Option<Self> {
        let ip = service.addresses.iter().find_map(|addr| match addr {
            IpAddr::V4(v4) if !v4.is_link_local() => Some(*v4),
            _ => None,
        })?;
        let port = if service.port == 0 {
            DEFAULT_PORT
        } else {
            service.port
        };
        Some(Self {
            name: service.name.clone(),
            ip,
            port,
        })
    }

    fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub service_type: String,
    pub protocol: Protocol,
    /// Case-insensitive instance-name prefixes. Empty accepts every name.
    pub name_prefixes: Vec<String>,
    /// Re-query interval. `None` queries once.
    pub polling_interval: Option<Duration>,
}

impl WatcherOptions {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            protocol: Protocol::Tcp,
            name_prefixes: Vec::new(),
            polling_interval: None,
        }
    }

    fn accepts(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.name_prefixes.is_empty()
            || self
                .name_prefixes
                .iter()
                .any(|prefix| name.starts_with(&prefix.to_lowercase()))
    }
}

/// Reports each newly discovered instance once per `ip:port`.
pub struct ServiceWatcher {
    discovery: Discovery,
    browser: Arc<Browser>,
    seen: Arc<Mutex<HashMap<String, Discovered>>>,
    poller: Option<JoinHandle<()>>,
}

impl ServiceWatcher {
    pub async fn start<F>(
        discovery: Discovery,
        options: WatcherOptions,
        callback: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(&Discovered) + Send + Sync + 'static,
    {
        info!("Starting mDNS discovery for _{}._{}", options.service_type, options.protocol);
        let browser = Browser::new(
            discovery.transport().clone(),
            BrowserOptions {
                service_type: Some(options.service_type.clone()),
                protocol: options.protocol,
                ..Default::default()
            },
        );

        let seen: Arc<Mutex<HashMap<String, Discovered>>> = Arc::default();
        {
            let seen = seen.clone();
            let options = options.clone();
            browser.events().up.subscribe(move |service: &RemoteService| {
                if !options.accepts(&service.name) {
                    return;
                }
                let Some(found) = Discovered::from_service(service) else {
                    debug!("Found \"{}\" but no usable IPv4 address", service.name);
                    return;
                };
                let fresh = {
                    let mut seen = seen.lock().unwrap_or_else(|p| p.into_inner());
                    let key = found.key();
                    if seen.contains_key(&key) {
                        false
                    } else {
                        seen.insert(key, found.clone());
                        true
                    }
                };
                if fresh {
                    info!("Discovered {} at {}:{}", found.name, found.ip, found.port);
                    callback(&found);
                }
            });
        }
        browser.start().await?;

        let poller = options.polling_interval.map(|period| {
            let browser = browser.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = browser.update().await {
                        debug!("Discovery poll failed: {}", e);
                    }
                }
            })
        });

        Ok(Self {
            discovery,
            browser,
            seen,
            poller,
        })
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Everything reported so far.
    pub fn discovered(&self) -> Vec<Discovered> {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub async fn update(&self) -> Result<(), TransportError> {
        self.browser.update().await
    }

    /// Stops browsing and destroys the session.
    pub async fn stop(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.browser.stop();
        self.discovery.destroy().await;
        info!("Stopped mDNS discovery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::wire::{Message, PacketKind, RData, Record, RecordType, ResourceRecord, Srv};
    use std::net::Ipv6Addr;

    fn remote(name: &str, port: u16, addresses: Vec<IpAddr>) -> RemoteService {
        RemoteService {
            name: name.into(),
            fqdn: format!("{name}._http._tcp.local"),
            host: "speaker.local".into(),
            port,
            service_type: "http".into(),
            protocol: Some(Protocol::Tcp),
            subtypes: Vec::new(),
            txt: Default::default(),
            raw_txt: Vec::new(),
            addresses,
            referer: crate::transport::mock::peer(),
        }
    }

    fn announcement(name: &str, last: u8, port: u16) -> Message {
        let fqdn = format!("{name}._http._tcp.local");
        let host = format!("{}.local", name.to_lowercase());
        let mut message = Message::response(vec![
            ResourceRecord::new("_http._tcp.local", 28800, RData::Ptr(fqdn.clone())).into(),
        ]);
        message.additionals = vec![
            Record::from(ResourceRecord::new(
                &fqdn,
                120,
                RData::Srv(Srv {
                    priority: 0,
                    weight: 0,
                    port,
                    target: host.clone(),
                }),
            )),
            ResourceRecord::new(&fqdn, 4500, RData::Txt(vec![Vec::new()])).into(),
            ResourceRecord::new(&host, 120, RData::A(Ipv4Addr::new(192, 168, 1, last))).into(),
        ];
        message
    }

    #[test]
    fn test_discovered_from_service() {
        let service = remote(
            "LSX II",
            0,
            vec![
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                IpAddr::V4(Ipv4Addr::new(169, 254, 3, 4)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            ],
        );
        let found = Discovered::from_service(&service).unwrap();
        assert_eq!(found.ip, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(found.port, 80);
        assert_eq!(found.name, "LSX II");

        let link_local_only = remote("x", 8080, vec![IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))]);
        assert!(Discovered::from_service(&link_local_only).is_none());
    }

    #[test]
    fn test_name_prefix_filter() {
        let mut options = WatcherOptions::new("http");
        assert!(options.accepts("anything"));
        options.name_prefixes = vec!["LSX".into(), "kef".into()];
        assert!(options.accepts("lsx II"));
        assert!(options.accepts("KEF LS50"));
        assert!(!options.accepts("Printer"));
    }

    #[tokio::test]
    async fn test_watcher_reports_each_endpoint_once() {
        let transport = MockTransport::new();
        let discovery = Discovery::with_transport(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = ServiceWatcher::start(discovery, WatcherOptions::new("http"), move |d| {
            let _ = tx.send(d.clone());
        })
        .await
        .unwrap();
        assert_eq!(transport.sent_of(PacketKind::Query).len(), 1);

        transport.inject(announcement("Kitchen", 10, 80));
        // Same endpoint under another name.
        transport.inject(announcement("Kitchen2", 10, 80));
        transport.inject(announcement("Hall", 11, 0));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.name, "Kitchen");
        assert_eq!(first.ip, Ipv4Addr::new(192, 168, 1, 10));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.name, "Hall");
        assert_eq!(second.port, 80);
        assert!(rx.try_recv().is_err());
        assert_eq!(watcher.discovered().len(), 2);

        watcher.stop().await;
        transport.inject(announcement("Office", 12, 80));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_polls() {
        let transport = MockTransport::new();
        let discovery = Discovery::with_transport(transport.clone());
        let mut options = WatcherOptions::new("http");
        options.polling_interval = Some(Duration::from_secs(30));
        let watcher = ServiceWatcher::start(discovery, options, |_| {}).await.unwrap();

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(transport.sent_of(PacketKind::Query).len(), 3);
        watcher.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.sent_of(PacketKind::Query).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_one() {
        let transport = MockTransport::new();
        transport.reply_to_queries(|query| {
            (query.questions.first()?.qtype == RecordType::PTR)
                .then(|| announcement("Kitchen", 10, 8080))
        });
        let discovery = Discovery::with_transport(transport.clone());

        let found = discovery
            .find_one(BrowserOptions::for_type("http"), Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.port, 8080);

        let missing = discovery
            .find_one(BrowserOptions::for_type("ipp"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_and_browse_through_one_session() {
        let transport = MockTransport::new();
        let discovery = Discovery::with_transport(transport.clone());
        let mut config = ServiceConfig::new("Kitchen", "http", 8080);
        config.probe = false;
        config.host = Some("kitchen.local".into());
        let handle = discovery.publish(config).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.service().is_published());

        discovery.unpublish_all().await.unwrap();
        assert!(!handle.service().is_published());
        discovery.destroy().await;
    }
}
