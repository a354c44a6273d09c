use std::io;
use thiserror::Error;

/// Errors raised while parsing an inbound packet.
///
/// All of these are fatal for the datagram being decoded and are never
/// retried; the transport reports them as warnings and drops the packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("cannot decode name (buffer overflow)")]
    NameOverflow,

    #[error("cannot decode name (bad pointer)")]
    BadPointer,

    #[error("cannot decode name (bad label)")]
    BadLabel,

    #[error("cannot decode name (name too long)")]
    NameTooLong,

    #[error("header must be 12 bytes, got {0}")]
    HeaderTooShort(usize),

    #[error("unexpected end of buffer at offset {0}")]
    BufferOverflow(usize),

    #[error("OPT record must be owned by the root name, got {0:?}")]
    OptNotRoot(String),

    #[error("DNSKEY protocol must be 3, got {0}")]
    DnskeyProtocol(u8),
}

/// Errors raised while serializing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("label longer than 63 bytes in {0:?}")]
    LabelTooLong(String),

    #[error("empty label in {0:?}")]
    EmptyLabel(String),

    #[error("name too long: {0:?}")]
    NameTooLong(String),

    #[error("character string of {0} bytes exceeds 255")]
    StringTooLong(usize),

    #[error("record data of {0} bytes exceeds 65535")]
    DataTooLong(usize),

    #[error("section holds {0} entries, more than a header can count")]
    SectionTooLarge(usize),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid fingerprint length for hash type {hash}: expected {expected} bytes, got {actual}")]
    FingerprintLength {
        hash: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unknown SSHFP hash type {0}")]
    UnknownHashType(u8),
}

/// Errors from the multicast socket.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding failed (address in use, permission denied, ...). Fatal for the transport.
    #[error("failed to bind mDNS socket: {0}")]
    Bind(#[source] io::Error),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("invalid transport options: {0}")]
    InvalidOptions(String),
}

/// Validation errors for a local service description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("service config requires `name` to be set")]
    MissingName,

    #[error("service config requires `type` to be set")]
    MissingType,

    #[error("service config requires `port` to be set")]
    MissingPort,
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Probing found another responder already using the name.
    #[error("service name {0:?} is already in use on the network")]
    Conflict(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
