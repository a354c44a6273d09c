//! Record table and query answering.


use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::events::ListenerId;
use crate::transport::{Packet, PacketTransport};
use crate::wire::{Message, RData, Record, RecordType, ResourceRecord, name};

/// Records registered by local services, keyed by type in registration order.
pub struct Responder {
    transport: Arc<dyn PacketTransport>,
    table: Mutex<BTreeMap<RecordType, Vec<ResourceRecord>>>,
    listener: Mutex<Option<ListenerId>>,
}

impl Responder {
    /// Creates the responder and subscribes it to incoming queries.
    pub fn new(transport: Arc<dyn PacketTransport>) -> Arc<Self> {
        let responder = Arc::new(Self {
            transport: transport.clone(),
            table: Mutex::new(BTreeMap::new()),
            listener: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&responder);
        let id = transport.events().query.subscribe(move |packet: &Packet| {
            if let Some(responder) = weak.upgrade() {
                responder.handle_query(packet);
            }
        });
        *responder.lock_listener() = Some(id);
        responder
    }

    /// Adds records, skipping any with the same type, name and data as one
    /// already present.
    pub fn register(&self, records: &[ResourceRecord]) {
        let mut table = self.lock_table();
        for record in records {
            let entries = table.entry(record.record_type()).or_default();
            if entries
                .iter()
                .any(|e| e.name == record.name && e.data == record.data)
            {
                continue;
            }
            entries.push(record.clone());
        }
    }

    /// Removes every record sharing a type and name with one of `records`.
    pub fn unregister(&self, records: &[ResourceRecord]) {
        let mut table = self.lock_table();
        for record in records {
            if let Some(entries) = table.get_mut(&record.record_type()) {
                entries.retain(|e| e.name != record.name);
            }
        }
    }

    /// Registered records of `rtype` owned by `name`.
    ///
    /// A `name` without a dot is compared against the first label only.
    pub fn records_for(&self, name: &str, rtype: RecordType) -> Vec<ResourceRecord> {
        let table = self.lock_table();
        table
            .get(&rtype)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| owner_matches(&e.name, name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn registered(&self) -> Vec<ResourceRecord> {
        self.lock_table().values().flatten().cloned().collect()
    }

    /// One response per question that has answers.
    ///
    /// PTR answers pull in the SRV and TXT records of their targets as
    /// additionals, then the addresses of each distinct SRV target.
    pub fn answer(&self, query: &Message) -> Vec<Message> {
        query
            .questions
            .iter()
            .filter_map(|question| {
                let answers = if question.qtype == RecordType::ANY {
                    let types: Vec<RecordType> = self.lock_table().keys().copied().collect();
                    types
                        .into_iter()
                        .flat_map(|ty| self.records_for(&question.name, ty))
                        .collect()
                } else {
                    self.records_for(&question.name, question.qtype)
                };
                if answers.is_empty() {
                    return None;
                }

                let additionals = self.additionals_for(&answers);
                let mut response = Message::response(answers.into_iter().map(Record::from).collect());
                response.additionals = additionals.into_iter().map(Record::from).collect();
                Some(response)
            })
            .collect()
    }

    fn additionals_for(&self, answers: &[ResourceRecord]) -> Vec<ResourceRecord> {
        let mut additionals: Vec<ResourceRecord> = Vec::new();
        for answer in answers {
            if let RData::Ptr(target) = &answer.data {
                additionals.extend(self.records_for(target, RecordType::SRV));
                additionals.extend(self.records_for(target, RecordType::TXT));
            }
        }

        let mut hosts: Vec<String> = Vec::new();
        for record in &additionals {
            if let RData::Srv(srv) = &record.data {
                if !hosts.iter().any(|h| name::names_equal(h, &srv.target)) {
                    hosts.push(srv.target.clone());
                }
            }
        }
        for host in hosts {
            additionals.extend(self.records_for(&host, RecordType::A));
            additionals.extend(self.records_for(&host, RecordType::AAAA));
        }

        // ANY answers may already carry what bundling would add.
        additionals.retain(|record| !answers.contains(record));
        let mut unique: Vec<ResourceRecord> = Vec::with_capacity(additionals.len());
        for record in additionals {
            if !unique.contains(&record) {
                unique.push(record);
            }
        }
        unique
    }

    fn handle_query(&self, packet: &Packet) {
        let responses = self.answer(&packet.message);
        if responses.is_empty() {
            return;
        }
        debug!(
            "Answering {} question(s) from {}",
            responses.len(),
            packet.from
        );
        let transport = self.transport.clone();
        tokio::spawn(async move {
            for response in responses {
                if let Err(e) = transport.respond(response, None).await {
                    warn!("Failed to send mDNS response: {}", e);
                }
            }
        });
    }

    /// Stops answering queries.
    pub fn detach(&self) {
        if let Some(id) = self.lock_listener().take() {
            self.transport.events().query.unsubscribe(id);
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, BTreeMap<RecordType, Vec<ResourceRecord>>> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<ListenerId>> {
        self.listener.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.detach();
    }
}

fn owner_matches(owner: &str, name: &str) -> bool {
    if name.contains('.') {
        name::names_equal(owner, name)
    } else {
        let first = owner.split('.').next().unwrap_or(owner);
        name::names_equal(first, name)
    }
}
