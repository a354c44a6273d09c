//! UDP multicast transport.
//!
//! [`MulticastTransport`] owns one socket bound to the mDNS port, keeps
//! group memberships in sync with the host's interfaces and fans decoded
//! packets out through [`TransportEvents`]. Registry and browser only see the
//! [`PacketTransport`] trait.

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, TransportError};
use crate::events::Emitter;
use crate::wire::{AUTHORITATIVE_ANSWER, Message, PacketKind, Question};

pub const MDNS_PORT: u16 = 5353;
pub const MDNS_IPV4_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

const MAX_DATAGRAM: usize = 9000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressFamily {
    #[default]
    V4,
    V6,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub family: AddressFamily,
    /// Multicast group. Required for IPv6.
    pub group: Option<IpAddr>,
    /// Port to bind and to send to. `0` binds an ephemeral port.
    pub port: u16,
    /// Restricts IPv4 membership and outbound multicast to one interface.
    pub interface_v4: Option<Ipv4Addr>,
    /// Interface index for IPv6. Required for IPv6.
    pub interface_v6: Option<u32>,
    /// Local address to bind. Defaults to the unspecified address.
    pub bind_address: Option<IpAddr>,
    pub reuse_addr: bool,
    pub multicast_ttl: u32,
    pub multicast_loopback: bool,
    pub membership_refresh: Duration,
    /// When false no group is joined and the socket is used for unicast only.
    pub multicast: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            family: AddressFamily::V4,
            group: None,
            port: MDNS_PORT,
            interface_v4: None,
            interface_v6: None,
            bind_address: None,
            reuse_addr: true,
            multicast_ttl: 255,
            multicast_loopback: true,
            membership_refresh: Duration::from_secs(5),
            multicast: true,
        }
    }
}

/// A decoded datagram and its sender.
#[derive(Debug, Clone)]
pub struct Packet {
    pub message: Message,
    pub from: SocketAddr,
}

#[derive(Debug, Default)]
pub struct TransportEvents {
    /// Every decoded packet.
    pub packet: Emitter<Packet>,
    pub query: Emitter<Packet>,
    pub response: Emitter<Packet>,
    /// Non-fatal problems: undecodable datagrams, membership failures.
    pub warning: Emitter<Error>,
    /// Fatal bind failures.
    pub error: Emitter<Error>,
    /// Fired after new group memberships were added.
    pub network_interface: Emitter<()>,
}

impl TransportEvents {
    pub fn dispatch(&self, packet: Packet) {
        self.packet.emit(&packet);
        match packet.message.kind {
            PacketKind::Query => self.query.emit(&packet),
            PacketKind::Response => self.response.emit(&packet),
        }
    }
}

/// Anything that can send mDNS messages and report received ones.
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Sends `message` to `destination`, or to the multicast group.
    async fn send(
        &self,
        message: Message,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError>;

    fn events(&self) -> &TransportEvents;

    async fn query(
        &self,
        questions: Vec<Question>,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        self.send(Message::query(questions), destination).await
    }

    /// Marks `message` as an authoritative response and sends it.
    async fn respond(
        &self,
        mut message: Message,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        message.kind = PacketKind::Response;
        message.flags |= AUTHORITATIVE_ANSWER;
        self.send(message, destination).await
    }
}

enum SocketState {
    Unbound,
    Bound(Arc<UdpSocket>),
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Membership {
    V4(Ipv4Addr),
    V6(u32),
}

pub struct MulticastTransport {
    options: TransportOptions,
    group: IpAddr,
    events: Arc<TransportEvents>,
    state: tokio::sync::Mutex<SocketState>,
    memberships: Arc<Mutex<HashSet<Membership>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl MulticastTransport {
    /// Validates `options`. No socket is created until the first send or
    /// [`start`](Self::start).
    pub fn new(options: TransportOptions) -> Result<Self, TransportError> {
        let group = match options.family {
            AddressFamily::V4 => match options.group {
                None => IpAddr::V4(MDNS_IPV4_GROUP),
                Some(group @ IpAddr::V4(_)) => group,
                Some(IpAddr::V6(_)) => {
                    return Err(TransportError::InvalidOptions(
                        "IPv4 transport given an IPv6 group".into(),
                    ));
                }
            },
            AddressFamily::V6 => match (options.group, options.interface_v6) {
                (Some(group @ IpAddr::V6(_)), Some(_)) => group,
                _ => {
                    return Err(TransportError::InvalidOptions(
                        "IPv6 multicast requires an IPv6 group and an interface index".into(),
                    ));
                }
            },
        };

        Ok(Self {
            options,
            group,
            events: Arc::new(TransportEvents::default()),
            state: tokio::sync::Mutex::new(SocketState::Unbound),
            memberships: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Binds the socket if that has not happened yet.
    pub async fn start(&self) -> Result<(), TransportError> {
        self.socket().await.map(|_| ())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            SocketState::Bound(socket) => socket.local_addr().ok(),
            _ => None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Joins the group on interfaces that appeared since the last call.
    pub async fn update_memberships(&self) {
        if let SocketState::Bound(socket) = &*self.state.lock().await {
            update_memberships(
                socket,
                self.group,
                &self.options,
                &self.memberships,
                &self.events,
            );
        }
    }

    /// Stops background tasks, leaves every group and closes the socket.
    /// Later sends succeed without doing anything.
    pub async fn destroy(&self) {
        let mut state = self.state.lock().await;
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let SocketState::Bound(socket) = &*state {
            let group = self.group;
            for membership in lock(&self.memberships).drain() {
                let left = match (membership, group) {
                    (Membership::V4(iface), IpAddr::V4(group)) => {
                        socket.leave_multicast_v4(group, iface)
                    }
                    (Membership::V6(index), IpAddr::V6(group)) => {
                        socket.leave_multicast_v6(&group, index)
                    }
                    _ => Ok(()),
                };
                if let Err(e) = left {
                    debug!("Failed to leave multicast group: {}", e);
                }
            }
        }
        *state = SocketState::Destroyed;
        info!("mDNS transport destroyed");
    }

    /// Returns the bound socket, binding on first use. `None` once destroyed.
    async fn socket(&self) -> Result<Option<Arc<UdpSocket>>, TransportError> {
        let mut state = self.state.lock().await;
        match &*state {
            SocketState::Bound(socket) => return Ok(Some(socket.clone())),
            SocketState::Destroyed => return Ok(None),
            SocketState::Unbound => {}
        }

        let socket = match bind(&self.options) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!("Failed to bind mDNS socket on port {}: {}", self.options.port, e);
                let reported = io::Error::new(e.kind(), e.to_string());
                self.events
                    .error
                    .emit(&Error::Transport(TransportError::Bind(reported)));
                return Err(TransportError::Bind(e));
            }
        };
        info!(
            "mDNS socket bound to {}",
            socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into())
        );

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(receive_loop(
            socket.clone(),
            self.events.clone(),
        )));

        if self.options.multicast {
            update_memberships(
                &socket,
                self.group,
                &self.options,
                &self.memberships,
                &self.events,
            );
            tasks.push(tokio::spawn(refresh_loop(
                socket.clone(),
                self.group,
                self.options.clone(),
                self.memberships.clone(),
                self.events.clone(),
            )));
        }
        drop(tasks);

        *state = SocketState::Bound(socket.clone());
        Ok(Some(socket))
    }
}

#[async_trait]
impl PacketTransport for MulticastTransport {
    async fn send(
        &self,
        message: Message,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        let Some(socket) = self.socket().await? else {
            return Ok(());
        };
        let bytes = message.encode()?;
        let target = destination.unwrap_or(SocketAddr::new(self.group, self.options.port));
        debug!(
            "Sending {:?} to {} ({} questions, {} answers, {} additionals)",
            message.kind,
            target,
            message.questions.len(),
            message.answers.len(),
            message.additionals.len()
        );
        socket.send_to(&bytes, target).await?;
        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

impl Drop for MulticastTransport {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn bind(options: &TransportOptions) -> io::Result<UdpSocket> {
    let (domain, unspecified) = match options.family {
        AddressFamily::V4 => (Domain::IPV4, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        AddressFamily::V6 => (Domain::IPV6, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if options.family == AddressFamily::V6 {
        socket.set_only_v6(true)?;
    }
    if options.reuse_addr {
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    let address = SocketAddr::new(options.bind_address.unwrap_or(unspecified), options.port);
    socket.bind(&address.into())?;

    if options.multicast {
        match options.family {
            AddressFamily::V4 => {
                socket.set_multicast_ttl_v4(options.multicast_ttl)?;
                socket.set_multicast_loop_v4(options.multicast_loopback)?;
            }
            AddressFamily::V6 => {
                socket.set_multicast_hops_v6(options.multicast_ttl)?;
                socket.set_multicast_loop_v6(options.multicast_loopback)?;
            }
        }
    }

    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

fn update_memberships(
    socket: &UdpSocket,
    group: IpAddr,
    options: &TransportOptions,
    memberships: &Mutex<HashSet<Membership>>,
    events: &TransportEvents,
) {
    let wanted: Vec<Membership> = match (group, options.family) {
        (IpAddr::V6(_), _) | (_, AddressFamily::V6) => {
            options.interface_v6.map(Membership::V6).into_iter().collect()
        }
        (IpAddr::V4(_), AddressFamily::V4) => match options.interface_v4 {
            Some(iface) => vec![Membership::V4(iface)],
            None => ipv4_interfaces().into_iter().map(Membership::V4).collect(),
        },
    };

    let mut joined = lock(memberships);
    let mut updated = false;
    for membership in wanted {
        if joined.contains(&membership) {
            continue;
        }
        let result = match (membership, group) {
            (Membership::V4(iface), IpAddr::V4(group)) => socket.join_multicast_v4(group, iface),
            (Membership::V6(index), IpAddr::V6(group)) => socket.join_multicast_v6(&group, index),
            _ => continue,
        };
        match result {
            Ok(()) => {
                debug!("Joined {} on {:?}", group, membership);
                joined.insert(membership);
                updated = true;
            }
            Err(e) => {
                warn!("Failed to join {} on {:?}: {}", group, membership, e);
                events.warning.emit(&Error::Transport(TransportError::Io(e)));
            }
        }
    }
    drop(joined);

    if updated {
        let sock = SockRef::from(socket);
        let result = match options.family {
            AddressFamily::V4 => sock.set_multicast_if_v4(
                &options.interface_v4.unwrap_or(Ipv4Addr::UNSPECIFIED),
            ),
            AddressFamily::V6 => sock.set_multicast_if_v6(options.interface_v6.unwrap_or(0)),
        };
        if let Err(e) = result {
            warn!("Failed to set outbound multicast interface: {}", e);
            events.warning.emit(&Error::Transport(TransportError::Io(e)));
        }
        events.network_interface.emit(&());
    }
}

/// The first IPv4 address of every interface.
fn ipv4_interfaces() -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter_map(|iface| match iface.ip() {
                IpAddr::V4(ip) if seen.insert(iface.name.clone()) => Some(ip),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            Vec::new()
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, events: Arc<TransportEvents>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => match Message::decode(&buf[..len]) {
                Ok(message) => {
                    debug!("Received {:?} from {}", message.kind, from);
                    events.dispatch(Packet { message, from });
                }
                Err(e) => {
                    warn!("Dropping undecodable packet from {}: {}", from, e);
                    events.warning.emit(&Error::Decode(e));
                }
            },
            Err(e) => {
                warn!("mDNS receive error: {}", e);
                events.warning.emit(&Error::Transport(TransportError::Io(e)));
            }
        }
    }
}

async fn refresh_loop(
    socket: Arc<UdpSocket>,
    group: IpAddr,
    options: TransportOptions,
    memberships: Arc<Mutex<HashSet<Membership>>>,
    events: Arc<TransportEvents>,
) {
    let mut interval = tokio::time::interval(options.membership_refresh);
    // The first tick completes immediately; bind already joined.
    interval.tick().await;
    loop {
        interval.tick().await;
        update_memberships(&socket, group, &options, &memberships, &events);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
