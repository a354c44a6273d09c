use super::*;
use crate::transport::mock::{MockTransport, peer};
use crate::wire::{PacketKind, Record, Srv};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const TYPE: &str = "_http._tcp.local";
const KITCHEN: &str = "Kitchen._http._tcp.local";

fn ptr(name: &str, target: &str, ttl: u32) -> Record {
    ResourceRecord::new(name, ttl, RData::Ptr(target.into())).into()
}

fn srv(name: &str, host: &str, port: u16) -> Record {
    ResourceRecord::new(
        name,
        120,
        RData::Srv(Srv {
            priority: 0,
            weight: 0,
            port,
            target: host.into(),
        }),
    )
    .into()
}

fn txt_record(name: &str, entries: &[&str]) -> Record {
    let strings = entries.iter().map(|e| e.as_bytes().to_vec()).collect();
    ResourceRecord::new(name, 4500, RData::Txt(strings)).into()
}

fn a(name: &str, last: u8) -> Record {
    ResourceRecord::new(name, 120, RData::A(Ipv4Addr::new(192, 168, 1, last))).into()
}

fn announcement(model: &str) -> Message {
    let mut message = Message::response(vec![ptr(TYPE, KITCHEN, 28800)]);
    message.additionals = vec![
        srv(KITCHEN, "speaker.local", 8080),
        txt_record(KITCHEN, &[&format!("model={model}")]),
        a("speaker.local", 10),
        ptr("_audio._sub._http._tcp.local", KITCHEN, 28800),
    ];
    message
}

fn channel(emitter: &Emitter<RemoteService>) -> UnboundedReceiver<RemoteService> {
    let (tx, rx) = mpsc::unbounded_channel();
    emitter.subscribe(move |service: &RemoteService| {
        let _ = tx.send(service.clone());
    });
    rx
}

#[tokio::test]
async fn test_start_sends_ptr_query() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("http"));
    assert_eq!(browser.query_name(), TYPE);

    browser.start().await.unwrap();
    browser.start().await.unwrap();
    let queries = transport.sent_of(PacketKind::Query);
    assert_eq!(queries.len(), 1, "second start is a no-op");
    assert_eq!(queries[0].questions[0].name, TYPE);
    assert_eq!(queries[0].questions[0].qtype, RecordType::PTR);

    browser.update().await.unwrap();
    assert_eq!(transport.sent_of(PacketKind::Query).len(), 2);
}

#[test]
fn test_query_names() {
    let transport = MockTransport::new();
    let options = BrowserOptions {
        service_type: Some("ipp".into()),
        protocol: Protocol::Udp,
        name: Some("Printer".into()),
        txt: None,
    };
    let browser = Browser::new(transport.clone(), options);
    assert_eq!(browser.query_name(), "Printer._ipp._udp.local");

    let browser = Browser::new(transport, BrowserOptions::default());
    assert_eq!(browser.query_name(), WILDCARD);
}

#[tokio::test]
async fn test_service_lifecycle() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("http"));
    let mut up = channel(&browser.events().up);
    let mut updates = channel(&browser.events().txt_update);
    let mut down = channel(&browser.events().down);
    browser.start().await.unwrap();

    transport.inject(announcement("LSX"));
    let service = up.try_recv().unwrap();
    assert_eq!(service.name, "Kitchen");
    assert_eq!(service.fqdn, KITCHEN);
    assert_eq!(service.host, "speaker.local");
    assert_eq!(service.port, 8080);
    assert_eq!(service.service_type, "http");
    assert_eq!(service.protocol, Some(Protocol::Tcp));
    assert_eq!(service.subtypes, vec!["audio".to_string()]);
    assert_eq!(service.txt.get("model").map(String::as_str), Some("LSX"));
    assert_eq!(service.raw_txt, vec![b"model=LSX".to_vec()]);
    assert_eq!(service.addresses, vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))]);
    assert_eq!(service.referer, peer());
    assert_eq!(browser.services().len(), 1);

    // Same TXT again: nothing.
    transport.inject(announcement("LSX"));
    assert!(up.try_recv().is_err());
    assert!(updates.try_recv().is_err());

    // A response carrying only the changed TXT record.
    transport.inject(Message::response(vec![txt_record(KITCHEN, &["model=LS50"])]));
    let updated = updates.try_recv().unwrap();
    assert_eq!(updated.txt.get("model").map(String::as_str), Some("LS50"));
    assert_eq!(updated.port, 8080);
    assert!(up.try_recv().is_err());
    assert_eq!(browser.services()[0].txt, updated.txt);

    transport.inject(Message::response(vec![ptr(TYPE, KITCHEN, 0)]));
    let gone = down.try_recv().unwrap();
    assert_eq!(gone.fqdn, KITCHEN);
    assert!(browser.services().is_empty());
}

#[tokio::test]
async fn test_response_without_txt_keeps_known_metadata() {
    let transport = MockTransport::new();
    let mut options = BrowserOptions::for_type("http");
    options.txt = Some(TxtMap::from([("model".to_string(), "LSX".to_string())]));
    let browser = Browser::new(transport.clone(), options);
    let mut updates = channel(&browser.events().txt_update);
    let mut down = channel(&browser.events().down);
    browser.start().await.unwrap();
    transport.inject(announcement("LSX"));

    let mut message = Message::response(vec![ptr(TYPE, KITCHEN, 28800)]);
    message.additionals = vec![srv(KITCHEN, "speaker.local", 8080), a("speaker.local", 10)];
    transport.inject(message);

    assert!(updates.try_recv().is_err());
    assert!(down.try_recv().is_err());
    let known = browser.services();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].txt.get("model").map(String::as_str), Some("LSX"));
    assert_eq!(known[0].raw_txt, vec![b"model=LSX".to_vec()]);
}

#[tokio::test]
async fn test_failed_start_leaves_browser_stopped() {
    let transport = MockTransport::new();
    transport.fail_sends(true);
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("http"));
    let mut up = channel(&browser.events().up);

    assert!(browser.start().await.is_err());
    assert!(!browser.is_running());
    assert_eq!(transport.events().response.listener_count(), 0);
    transport.inject(announcement("LSX"));
    assert!(up.try_recv().is_err());

    transport.fail_sends(false);
    browser.start().await.unwrap();
    assert!(browser.is_running());
    transport.inject(announcement("LSX"));
    assert_eq!(up.try_recv().unwrap().fqdn, KITCHEN);
}

#[tokio::test]
async fn test_ptr_without_srv_is_ignored() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("http"));
    let mut up = channel(&browser.events().up);
    browser.start().await.unwrap();

    transport.inject(Message::response(vec![
        ptr(TYPE, KITCHEN, 28800),
        txt_record(KITCHEN, &["model=LSX"]),
    ]));
    assert!(up.try_recv().is_err());
    assert!(browser.services().is_empty());
}

#[tokio::test]
async fn test_other_types_and_queries_are_ignored() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("ipp"));
    let mut up = channel(&browser.events().up);
    browser.start().await.unwrap();

    transport.inject(announcement("LSX"));
    let mut query = announcement("LSX");
    query.kind = PacketKind::Query;
    transport.inject(query);
    assert!(up.try_recv().is_err());
}

#[tokio::test]
async fn test_goodbye_for_unknown_service_is_ignored() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("http"));
    let mut down = channel(&browser.events().down);
    browser.start().await.unwrap();
    transport.inject(Message::response(vec![ptr(TYPE, KITCHEN, 0)]));
    assert!(down.try_recv().is_err());
}

#[tokio::test]
async fn test_txt_filter() {
    let transport = MockTransport::new();
    let mut options = BrowserOptions::for_type("http");
    options.txt = Some(TxtMap::from([("model".to_string(), "LSX".to_string())]));
    let browser = Browser::new(transport.clone(), options);
    let mut up = channel(&browser.events().up);
    let mut down = channel(&browser.events().down);
    browser.start().await.unwrap();

    transport.inject(announcement("LS50"));
    assert!(up.try_recv().is_err());

    transport.inject(announcement("LSX"));
    assert_eq!(up.try_recv().unwrap().fqdn, KITCHEN);

    // No longer matching: reported as gone.
    transport.inject(announcement("LS50"));
    assert_eq!(down.try_recv().unwrap().fqdn, KITCHEN);
    assert!(browser.services().is_empty());
}

#[tokio::test]
async fn test_stop_ignores_further_responses() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::for_type("http"));
    let mut up = channel(&browser.events().up);
    browser.start().await.unwrap();
    assert!(browser.is_running());

    browser.stop();
    assert!(!browser.is_running());
    transport.inject(announcement("LSX"));
    assert!(up.try_recv().is_err());
}

#[tokio::test]
async fn test_wildcard_follows_discovered_types() {
    let transport = MockTransport::new();
    let browser = Browser::new(transport.clone(), BrowserOptions::default());
    let mut up = channel(&browser.events().up);
    browser.start().await.unwrap();
    assert_eq!(transport.sent_of(PacketKind::Query)[0].questions[0].name, WILDCARD);
    transport.clear();

    transport.inject(Message::response(vec![ptr(WILDCARD, TYPE, 4500)]));
    // The same type twice is queried once.
    transport.inject(Message::response(vec![ptr(WILDCARD, TYPE, 4500)]));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let queries = transport.sent_of(PacketKind::Query);
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].questions[0].name, TYPE);
    assert_eq!(queries[0].questions[0].qtype, RecordType::PTR);

    transport.inject(announcement("LSX"));
    assert_eq!(up.try_recv().unwrap().fqdn, KITCHEN);
}
