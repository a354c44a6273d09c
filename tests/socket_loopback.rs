//! A browser on a real UDP socket receiving a unicast announcement.

use async_trait::async_trait;
use mdns_discovery::browser::{Browser, BrowserOptions};
use mdns_discovery::error::TransportError;
use mdns_discovery::transport::{
    MulticastTransport, PacketTransport, TransportEvents, TransportOptions,
};
use mdns_discovery::wire::{Message, RData, Record, ResourceRecord, Srv};
use serial_test::serial;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn unicast_options() -> TransportOptions {
    TransportOptions {
        port: 0,
        bind_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        multicast: false,
        ..Default::default()
    }
}

/// Sends group-bound messages back to the socket itself.
struct Looped {
    inner: Arc<MulticastTransport>,
    own: SocketAddr,
}

#[async_trait]
impl PacketTransport for Looped {
    async fn send(
        &self,
        message: Message,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        self.inner
            .send(message, Some(destination.unwrap_or(self.own)))
            .await
    }

    fn events(&self) -> &TransportEvents {
        self.inner.events()
    }
}

fn announcement() -> Message {
    let fqdn = "Hall._ipp._tcp.local";
    let mut message = Message::response(vec![
        ResourceRecord::new("_ipp._tcp.local", 28800, RData::Ptr(fqdn.into())).into(),
    ]);
    message.additionals = vec![
        Record::from(ResourceRecord::new(
            fqdn,
            120,
            RData::Srv(Srv {
                priority: 0,
                weight: 0,
                port: 631,
                target: "printer.local".into(),
            }),
        )),
        ResourceRecord::new(fqdn, 4500, RData::Txt(vec![b"rp=ipp/print".to_vec()])).into(),
        ResourceRecord::new("printer.local", 120, RData::A(Ipv4Addr::new(10, 0, 0, 9))).into(),
    ];
    message
}

#[tokio::test]
#[serial]
async fn test_browser_on_real_socket() {
    let transport = Arc::new(MulticastTransport::new(unicast_options()).unwrap());
    transport.start().await.unwrap();
    let addr = transport.local_addr().await.expect("bound");
    let looped = Arc::new(Looped {
        inner: transport.clone(),
        own: addr,
    });

    let browser = Browser::new(looped, BrowserOptions::for_type("ipp"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    browser.events().up.subscribe(move |service| {
        let _ = tx.send(service.clone());
    });
    browser.start().await.unwrap();
    assert!(browser.is_running());

    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let bytes = announcement().encode().unwrap();
    sender.send_to(&bytes, addr).unwrap();

    let service = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(service.name, "Hall");
    assert_eq!(service.port, 631);
    assert_eq!(service.txt.get("rp").map(String::as_str), Some("ipp/print"));
    assert_eq!(service.addresses, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
    assert_eq!(service.referer, sender.local_addr().unwrap());

    browser.stop();
    transport.destroy().await;
}
