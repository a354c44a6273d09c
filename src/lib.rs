pub mod browser;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod registry;
pub mod responder;
pub mod service;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use browser::{Browser, BrowserOptions, RemoteService};
pub use config::{Args, Config};
pub use discovery::{Discovered, Discovery, ServiceWatcher, WatcherOptions};
pub use error::{Error, Result};
pub use registry::{Registry, ServiceHandle};
pub use responder::Responder;
pub use service::{Protocol, ServiceConfig};
pub use transport::{MulticastTransport, PacketTransport, TransportOptions};
pub use wire::Message;
