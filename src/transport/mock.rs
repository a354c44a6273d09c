//! In-memory transport for registry, responder and browser tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Packet, PacketTransport, TransportEvents};
use crate::error::TransportError;
use crate::wire::{Message, PacketKind};

pub(crate) fn peer() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::new(192, 168, 1, 50), 5353))
}

type AutoReply = Box<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

#[derive(Default)]
pub(crate) struct MockTransport {
    events: Arc<TransportEvents>,
    sent: Mutex<Vec<(Message, Option<SocketAddr>)>>,
    auto_reply: Mutex<Option<AutoReply>>,
    fail_sends: Mutex<bool>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub(crate) fn sent_of(&self, kind: PacketKind) -> Vec<Message> {
        self.sent().into_iter().filter(|m| m.kind == kind).collect()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Answers every outgoing query with whatever `reply` returns, delivered
    /// from a spawned task as if it came from the network.
    pub(crate) fn reply_to_queries<F>(&self, reply: F)
    where
        F: Fn(&Message) -> Option<Message> + Send + Sync + 'static,
    {
        *self.auto_reply.lock().unwrap() = Some(Box::new(reply));
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    /// Delivers `message` to listeners as if received from `peer()`.
    pub(crate) fn inject(&self, message: Message) {
        self.events.dispatch(Packet {
            message,
            from: peer(),
        });
    }
}

#[async_trait]
impl PacketTransport for MockTransport {
    async fn send(
        &self,
        message: Message,
        destination: Option<SocketAddr>,
    ) -> Result<(), TransportError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(TransportError::Io(std::io::Error::other("send failed")));
        }
        let reply = match (&message.kind, &*self.auto_reply.lock().unwrap()) {
            (PacketKind::Query, Some(reply)) => reply(&message),
            _ => None,
        };
        self.sent.lock().unwrap().push((message, destination));
        if let Some(reply) = reply {
            let events = self.events.clone();
            tokio::spawn(async move {
                events.dispatch(Packet {
                    message: reply,
                    from: peer(),
                });
            });
        }
        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}
