//! Two sessions talking over an in-memory network. Every packet goes through
//! the wire codec on its way between them.

use async_trait::async_trait;
use mdns_discovery::browser::{BrowserOptions, RemoteService};
use mdns_discovery::discovery::Discovery;
use mdns_discovery::error::TransportError;
use mdns_discovery::service::ServiceConfig;
use mdns_discovery::transport::{Packet, PacketTransport, TransportEvents};
use mdns_discovery::wire::Message;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

#[derive(Default)]
struct Network {
    hosts: Mutex<Vec<Weak<Host>>>,
}

struct Host {
    network: Arc<Network>,
    addr: SocketAddr,
    events: TransportEvents,
}

impl Host {
    fn join(network: &Arc<Network>, last_octet: u8) -> Arc<Self> {
        let host = Arc::new(Self {
            network: network.clone(),
            addr: SocketAddr::from((Ipv4Addr::new(192, 168, 1, last_octet), 5353)),
            events: TransportEvents::default(),
        });
        network.hosts.lock().unwrap().push(Arc::downgrade(&host));
        host
    }
}

#[async_trait]
impl PacketTransport for Host {
    async fn send(
        &self,
        message: Message,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        let peers: Vec<Arc<Host>> = self
            .network
            .hosts
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|peer| peer.addr != self.addr)
            .filter(|peer| destination.is_none_or(|d| d == peer.addr))
            .collect();

        let from = self.addr;
        for peer in peers {
            let bytes = bytes.clone();
            tokio::spawn(async move {
                let message = Message::decode(&bytes).expect("peer sent a valid packet");
                peer.events.dispatch(Packet { message, from });
            });
        }
        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

fn sessions() -> (Discovery, Discovery) {
    let network = Arc::new(Network::default());
    let publisher = Discovery::with_transport(Host::join(&network, 10));
    let browser = Discovery::with_transport(Host::join(&network, 20));
    (publisher, browser)
}

fn kitchen(probe: bool) -> ServiceConfig {
    let mut config = ServiceConfig::new("Kitchen", "http", 8080);
    config.host = Some("kitchen.local".into());
    config.txt.insert("model".into(), "LSX".into());
    config.probe = probe;
    config
}

fn channel() -> (
    impl Fn(&RemoteService) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<RemoteService>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |service: &RemoteService| {
            let _ = tx.send(service.clone());
        },
        rx,
    )
}

#[tokio::test(start_paused = true)]
async fn test_announcement_reaches_browser() {
    let (publisher, other) = sessions();
    let _handle = publisher.publish(kitchen(true)).unwrap();

    let found = other
        .find_one(BrowserOptions::for_type("http"), Duration::from_secs(5))
        .await
        .unwrap()
        .expect("service found");
    assert_eq!(found.name, "Kitchen");
    assert_eq!(found.fqdn, "Kitchen._http._tcp.local");
    assert_eq!(found.host, "kitchen.local");
    assert_eq!(found.port, 8080);
    assert_eq!(found.txt.get("model").map(String::as_str), Some("LSX"));
    assert_eq!(found.referer.ip(), Ipv4Addr::new(192, 168, 1, 10));
}

#[tokio::test(start_paused = true)]
async fn test_browse_query_is_answered_by_responder() {
    let (publisher, other) = sessions();
    let handle = publisher.publish(kitchen(false)).unwrap();
    let (tx, mut up) = mpsc::unbounded_channel();
    handle.on_up(move |_| {
        let _ = tx.send(());
    });
    timeout(Duration::from_secs(1), up.recv()).await.unwrap().unwrap();

    // Announcements are over for now; only a query can produce an answer.
    let (on_up, mut found) = channel();
    let browser = other.find(BrowserOptions::for_type("http")).await.unwrap();
    browser.events().up.subscribe(on_up);
    let service = timeout(Duration::from_millis(500), found.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(service.port, 8080);

    // Re-announcements with the same TXT are not new services.
    sleep(Duration::from_secs(30)).await;
    assert!(found.try_recv().is_err());
    assert_eq!(browser.services().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_seen_as_down() {
    let (publisher, other) = sessions();
    let handle = publisher.publish(kitchen(false)).unwrap();

    let browser = other.find(BrowserOptions::for_type("http")).await.unwrap();
    let (on_up, mut up) = channel();
    let (on_down, mut down) = channel();
    browser.events().up.subscribe(on_up);
    browser.events().down.subscribe(on_down);

    timeout(Duration::from_secs(2), up.recv()).await.unwrap().unwrap();
    handle.stop().await.unwrap();
    let gone = timeout(Duration::from_secs(1), down.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gone.fqdn, "Kitchen._http._tcp.local");
    assert!(browser.services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_probe_detects_name_taken_by_other_session() {
    let (first, second) = sessions();
    let owner = first.publish(kitchen(false)).unwrap();
    let (tx, mut up) = mpsc::unbounded_channel();
    owner.on_up(move |_| {
        let _ = tx.send(());
    });
    timeout(Duration::from_secs(1), up.recv()).await.unwrap().unwrap();

    let mut config = kitchen(true);
    config.port = 9090;
    let contender = second.publish(config).unwrap();
    let (tx, mut errors) = mpsc::unbounded_channel();
    contender.on_error(move |e| {
        let _ = tx.send(e.to_string());
    });

    let error = timeout(Duration::from_secs(2), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(error.contains("Kitchen._http._tcp.local"), "{error}");
    assert!(!contender.service().is_published());
    assert!(owner.service().is_published());
}
