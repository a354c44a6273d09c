use super::*;
use crate::wire::{RData, Record, RecordType, ResourceRecord};
use serial_test::serial;
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

#[test]
fn test_default_options() {
    let options = TransportOptions::default();
    assert_eq!(options.port, 5353);
    assert_eq!(options.multicast_ttl, 255);
    assert!(options.multicast_loopback);
    assert!(options.reuse_addr);
    assert_eq!(options.membership_refresh, Duration::from_secs(5));
}

#[test]
fn test_ipv6_requires_group_and_interface() {
    let missing = TransportOptions {
        family: AddressFamily::V6,
        ..Default::default()
    };
    assert!(matches!(
        MulticastTransport::new(missing),
        Err(TransportError::InvalidOptions(_))
    ));

    let complete = TransportOptions {
        family: AddressFamily::V6,
        group: Some("ff02::fb".parse().unwrap()),
        interface_v6: Some(1),
        ..Default::default()
    };
    assert!(MulticastTransport::new(complete).is_ok());
}

#[test]
fn test_ipv4_rejects_ipv6_group() {
    let options = TransportOptions {
        group: Some("ff02::fb".parse().unwrap()),
        ..Default::default()
    };
    assert!(MulticastTransport::new(options).is_err());
}

#[test]
fn test_dispatch_routes_by_kind() {
    let events = TransportEvents::default();
    let counts = Arc::new(Mutex::new((0, 0, 0)));
    let c = counts.clone();
    events.packet.subscribe(move |_| c.lock().unwrap().0 += 1);
    let c = counts.clone();
    events.query.subscribe(move |_| c.lock().unwrap().1 += 1);
    let c = counts.clone();
    events.response.subscribe(move |_| c.lock().unwrap().2 += 1);

    let from = SocketAddr::from((Ipv4Addr::LOCALHOST, 5353));
    events.dispatch(Packet {
        message: Message::query(vec![Question::new("a.local", RecordType::A)]),
        from,
    });
    events.dispatch(Packet {
        message: Message::response(Vec::new()),
        from,
    });
    assert_eq!(*counts.lock().unwrap(), (2, 1, 1));
}

#[tokio::test]
#[serial]
async fn test_unicast_loopback_round_trip() {
    let transport = MulticastTransport::new(unicast_options()).unwrap();
    transport.start().await.unwrap();
    let addr = transport.local_addr().await.expect("bound");

    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.events().response.subscribe(move |packet: &Packet| {
        let _ = tx.send(packet.message.clone());
    });

    let answer: Record =
        ResourceRecord::new("host.local", 120, RData::A(Ipv4Addr::new(10, 0, 0, 7))).into();
    transport
        .respond(Message::query(Vec::new()), Some(addr))
        .await
        .unwrap();
    transport
        .respond(Message::response(vec![answer.clone()]), Some(addr))
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(first.aa());
    assert!(first.answers.is_empty());
    let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.answers, vec![answer]);

    transport.destroy().await;
}

#[tokio::test]
#[serial]
async fn test_undecodable_datagram_is_a_warning() {
    let transport = MulticastTransport::new(unicast_options()).unwrap();
    transport.start().await.unwrap();
    let addr = transport.local_addr().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.events().warning.subscribe(move |e: &Error| {
        let _ = tx.send(e.to_string());
    });
    let (ptx, mut prx) = mpsc::unbounded_channel();
    transport.events().packet.subscribe(move |_| {
        let _ = ptx.send(());
    });

    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"garbage", addr).unwrap();

    let warning = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(warning.contains("12 bytes"), "{warning}");

    // Still alive after the bad datagram.
    transport
        .query(vec![Question::new("a.local", RecordType::A)], Some(addr))
        .await
        .unwrap();
    timeout(Duration::from_secs(2), prx.recv()).await.unwrap().unwrap();

    transport.destroy().await;
}

#[tokio::test]
#[serial]
async fn test_send_after_destroy_is_a_no_op() {
    let transport = MulticastTransport::new(unicast_options()).unwrap();
    transport.start().await.unwrap();
    transport.destroy().await;
    assert!(transport.is_destroyed());
    assert!(transport.local_addr().await.is_none());
    transport
        .query(
            vec![Question::new("a.local", RecordType::A)],
            Some(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))),
        )
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_concurrent_starts_share_one_socket() {
    let transport = Arc::new(MulticastTransport::new(unicast_options()).unwrap());
    let (a, b) = tokio::join!(transport.start(), transport.start());
    a.unwrap();
    b.unwrap();
    let first = transport.local_addr().await.unwrap();
    transport.start().await.unwrap();
    assert_eq!(transport.local_addr().await.unwrap(), first);
    transport.destroy().await;
}

#[tokio::test]
#[serial]
async fn test_bind_failure_is_reported() {
    let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    let transport = MulticastTransport::new(TransportOptions {
        port,
        reuse_addr: false,
        ..unicast_options()
    })
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.events().error.subscribe(move |e: &Error| {
        let _ = tx.send(e.to_string());
    });

    assert!(matches!(
        transport.start().await,
        Err(TransportError::Bind(_))
    ));
    assert!(rx.try_recv().is_ok());
}
