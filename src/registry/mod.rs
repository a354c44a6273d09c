//! Publishing of local services.
//!
//! A published service runs on its own task: optional probe, then announce
//! and re-announce with a tripling delay. Teardown deactivates first and
//! then broadcasts the record set once with TTL 0.


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, ServiceError, TransportError};
use crate::events::{Emitter, ListenerId};
use crate::responder::Responder;
use crate::service::{LocalService, ServiceConfig};
use crate::transport::{Packet, PacketTransport};
use crate::wire::{Message, Question, Record, RecordType, ResourceRecord, name};

pub const PROBE_ATTEMPTS: u32 = 3;
pub const PROBE_INTERVAL: Duration = Duration::from_millis(250);
pub const PROBE_MAX_JITTER_MS: u64 = 250;

const REANNOUNCE_FIRST_MS: u64 = 1000;
const REANNOUNCE_FACTOR: u64 = 3;
const REANNOUNCE_MAX_MS: u64 = 60 * 60 * 1000;

/// Delays between re-announcements: 1 s, 3 s, 9 s, ... ending before the
/// delay would reach one hour.
#[derive(Debug, Clone)]
pub struct ReannounceSchedule {
    next_ms: u64,
}

impl Default for ReannounceSchedule {
    fn default() -> Self {
        Self {
            next_ms: REANNOUNCE_FIRST_MS,
        }
    }
}

impl Iterator for ReannounceSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next_ms >= REANNOUNCE_MAX_MS {
            return None;
        }
        let delay = self.next_ms;
        self.next_ms = delay.saturating_mul(REANNOUNCE_FACTOR);
        Some(Duration::from_millis(delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Inactive,
    Probing,
    Announced,
    TornDown,
}

#[derive(Debug)]
struct Status {
    activated: bool,
    published: bool,
    destroyed: bool,
    state: ServiceState,
    /// Bumped on every start so tasks of an earlier start stop on their own.
    generation: u64,
}

/// A service owned by the registry.
pub struct Service {
    local: LocalService,
    status: Mutex<Status>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Fired once the first announcement went out.
    pub up: Emitter<()>,
    /// Fired when probing finds the name already taken.
    pub error: Emitter<Error>,
}

impl Service {
    fn new(local: LocalService) -> Self {
        Self {
            local,
            status: Mutex::new(Status {
                activated: false,
                published: false,
                destroyed: false,
                state: ServiceState::Inactive,
                generation: 0,
            }),
            task: Mutex::new(None),
            up: Emitter::new(),
            error: Emitter::new(),
        }
    }

    pub fn local(&self) -> &LocalService {
        &self.local
    }

    pub fn fqdn(&self) -> &str {
        &self.local.fqdn
    }

    pub fn state(&self) -> ServiceState {
        self.status().state
    }

    pub fn is_activated(&self) -> bool {
        self.status().activated
    }

    pub fn is_published(&self) -> bool {
        self.status().published
    }

    pub fn is_destroyed(&self) -> bool {
        self.status().destroyed
    }

    fn is_current(&self, generation: u64) -> bool {
        let status = self.status();
        status.activated && !status.destroyed && status.generation == generation
    }

    /// Clears the activated flag. Returns whether it was set.
    fn deactivate(&self) -> bool {
        let mut status = self.status();
        std::mem::replace(&mut status.activated, false)
    }

    fn abort_task(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }
}

/// Unsubscribes a response listener when dropped, so an aborted probe
/// task leaves nothing behind.
struct ResponseListener {
    transport: Arc<dyn PacketTransport>,
    id: ListenerId,
}

impl Drop for ResponseListener {
    fn drop(&mut self) {
        self.transport.events().response.unsubscribe(self.id);
    }
}

enum ProbeOutcome {
    Clear,
    Conflict,
    Aborted,
}

pub struct Registry {
    transport: Arc<dyn PacketTransport>,
    responder: Arc<Responder>,
    services: Mutex<Vec<Arc<Service>>>,
}

impl Registry {
    pub fn new(transport: Arc<dyn PacketTransport>, responder: Arc<Responder>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            responder,
            services: Mutex::new(Vec::new()),
        })
    }

    /// Validates `config` and starts publishing it, probing first unless
    /// `config.probe` is false. Must be called inside a tokio runtime.
    pub fn publish(self: &Arc<Self>, config: ServiceConfig) -> Result<ServiceHandle, ServiceError> {
        let probe = config.probe;
        let service = Arc::new(Service::new(LocalService::new(config)?));
        let handle = ServiceHandle {
            service,
            registry: self.clone(),
        };
        handle.start(probe);
        Ok(handle)
    }

    /// Services currently activated.
    pub fn services(&self) -> Vec<Arc<Service>> {
        lock(&self.services).clone()
    }

    /// Tears down every activated service.
    pub async fn unpublish_all(&self) -> Result<(), TransportError> {
        let services = std::mem::take(&mut *lock(&self.services));
        self.teardown(&services).await
    }

    /// Marks every service destroyed. Pending steps end silently.
    pub fn destroy(&self) {
        for service in lock(&self.services).iter() {
            service.status().destroyed = true;
            service.abort_task();
        }
    }

    fn start(self: &Arc<Self>, service: &Arc<Service>, probe: bool) {
        let generation = {
            let mut status = service.status();
            if status.activated {
                return;
            }
            status.activated = true;
            status.generation += 1;
            status.state = if probe {
                ServiceState::Probing
            } else {
                ServiceState::Inactive
            };
            status.generation
        };
        lock(&self.services).push(service.clone());

        let registry = self.clone();
        let task_service = service.clone();
        let task = tokio::spawn(async move {
            let service = task_service;
            if probe {
                match registry.probe(&service, generation).await {
                    ProbeOutcome::Clear => {}
                    ProbeOutcome::Aborted => return,
                    ProbeOutcome::Conflict => {
                        registry.on_conflict(&service);
                        return;
                    }
                }
            }
            registry.announce(&service, generation).await;
        });
        if let Some(previous) = lock(&service.task).replace(task) {
            previous.abort();
        }
    }

    async fn probe(&self, service: &Arc<Service>, generation: u64) -> ProbeOutcome {
        let (tx, mut conflicts) = mpsc::unbounded_channel();
        let sent = Arc::new(AtomicBool::new(false));
        let _listener = {
            let sent = sent.clone();
            let fqdn = service.fqdn().to_string();
            let id = self
                .transport
                .events()
                .response
                .subscribe(move |packet: &Packet| {
                    if !sent.load(Ordering::SeqCst) {
                        return;
                    }
                    if packet
                        .message
                        .resources()
                        .any(|rr| name::names_equal(&rr.name, &fqdn))
                    {
                        let _ = tx.send(());
                    }
                });
            ResponseListener {
                transport: self.transport.clone(),
                id,
            }
        };

        self.probe_rounds(service, generation, &sent, &mut conflicts)
            .await
    }

    async fn probe_rounds(
        &self,
        service: &Service,
        generation: u64,
        sent: &AtomicBool,
        conflicts: &mut mpsc::UnboundedReceiver<()>,
    ) -> ProbeOutcome {
        let jitter = fastrand::u64(0..PROBE_MAX_JITTER_MS);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        for attempt in 1..=PROBE_ATTEMPTS {
            if !service.is_current(generation) {
                return ProbeOutcome::Aborted;
            }
            debug!("Probing for {} ({}/{})", service.fqdn(), attempt, PROBE_ATTEMPTS);
            let question = Question::new(service.fqdn(), RecordType::ANY);
            if let Err(e) = self.transport.query(vec![question], None).await {
                warn!("Failed to send probe for {}: {}", service.fqdn(), e);
            }
            sent.store(true, Ordering::SeqCst);

            tokio::select! {
                Some(()) = conflicts.recv() => return ProbeOutcome::Conflict,
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
            }
        }
        ProbeOutcome::Clear
    }

    fn on_conflict(&self, service: &Arc<Service>) {
        {
            let mut status = service.status();
            status.activated = false;
            status.state = ServiceState::Inactive;
        }
        self.remove(service);
        warn!(
            "Service name {} is already in use on the network",
            service.fqdn()
        );
        service
            .error
            .emit(&Error::Conflict(service.fqdn().to_string()));
    }

    async fn announce(&self, service: &Service, generation: u64) {
        let records = service.local.records();
        self.responder.register(&records);
        let message = Message::response(records.into_iter().map(Record::from).collect());
        let mut schedule = ReannounceSchedule::default();

        loop {
            if !service.is_current(generation) {
                return;
            }
            match self.transport.respond(message.clone(), None).await {
                Ok(()) => {
                    let first = {
                        let mut status = service.status();
                        if status.activated && status.generation == generation {
                            status.state = ServiceState::Announced;
                            !std::mem::replace(&mut status.published, true)
                        } else {
                            false
                        }
                    };
                    if first {
                        info!("Published {}", service.fqdn());
                        service.up.emit(&());
                    }
                }
                Err(e) => warn!("Failed to announce {}: {}", service.fqdn(), e),
            }

            let Some(delay) = schedule.next() else {
                debug!("Stopped re-announcing {}", service.fqdn());
                return;
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Broadcasts goodbyes for the activated services among `services`.
    async fn teardown(&self, services: &[Arc<Service>]) -> Result<(), TransportError> {
        let active: Vec<&Arc<Service>> = services.iter().filter(|s| s.deactivate()).collect();
        let mut records: Vec<ResourceRecord> = Vec::new();
        for service in &active {
            service.abort_task();
            records.extend(service.local.records().into_iter().map(|mut record| {
                record.ttl = 0;
                record
            }));
        }
        if records.is_empty() {
            return Ok(());
        }

        self.responder.unregister(&records);
        let message = Message::response(records.into_iter().map(Record::from).collect());
        let result = self.transport.respond(message, None).await;
        for service in active {
            let mut status = service.status();
            status.published = false;
            status.state = ServiceState::TornDown;
            info!("Unpublished {}", service.fqdn());
        }
        result
    }

    fn remove(&self, service: &Arc<Service>) {
        lock(&self.services).retain(|s| !Arc::ptr_eq(s, service));
    }
}

/// Caller-side handle to a published service.
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<Service>,
    registry: Arc<Registry>,
}

impl ServiceHandle {
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn fqdn(&self) -> &str {
        self.service.fqdn()
    }

    /// Starts publishing again after [`stop`](Self::stop). No-op while active.
    pub fn start(&self, probe: bool) {
        self.registry.start(&self.service, probe);
    }

    /// Sends goodbyes and removes the service from the registry.
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.registry.remove(&self.service);
        self.registry
            .teardown(std::slice::from_ref(&self.service))
            .await
    }

    pub fn on_up<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.service.up.subscribe(listener)
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.service.error.subscribe(listener)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
