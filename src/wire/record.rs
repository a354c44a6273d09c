use bytes::{BufMut, BytesMut};

use super::option::EdnsOption;
use super::rdata::RData;
use super::reader::{Reader, with_length_prefix};
use super::types::{RecordClass, RecordType};
use super::{DNSSEC_OK, name};
use crate::error::{DecodeError, EncodeError};

/// Class high bit: cache-flush on records, unicast-response on questions.
pub(crate) const CLASS_HIGH_BIT: u16 = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub class: RecordClass,
    pub ttl: u32,
    /// mDNS cache-flush bit.
    pub flush: bool,
    pub data: RData,
}

impl ResourceRecord {
    /// An `IN` record without the flush bit.
    pub fn new(name: impl Into<String>, ttl: u32, data: RData) -> Self {
        Self {
            name: name.into(),
            class: RecordClass::IN,
            ttl,
            flush: false,
            data,
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    pub fn encoding_length(&self) -> usize {
        name::encoding_length(&self.name, false) + 8 + self.data.encoding_length()
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        name::encode(&self.name, buf, false)?;
        buf.put_u16(self.record_type().0);
        let flush = if self.flush { CLASS_HIGH_BIT } else { 0 };
        buf.put_u16((self.class.0 & !CLASS_HIGH_BIT) | flush);
        buf.put_u32(self.ttl);
        self.data.encode(buf)
    }
}

/// The EDNS(0) OPT pseudo-record. Always owned by the root name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptRecord {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<EdnsOption>,
}

impl Default for OptRecord {
    fn default() -> Self {
        Self {
            udp_payload_size: 4096,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }
}

impl OptRecord {
    pub fn dnssec_ok(&self) -> bool {
        self.flags & DNSSEC_OK != 0
    }

    pub fn encoding_length(&self) -> usize {
        1 + 8 + 2
            + self
                .options
                .iter()
                .map(EdnsOption::encoding_length)
                .sum::<usize>()
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(0);
        buf.put_u16(RecordType::OPT.0);
        buf.put_u16(self.udp_payload_size);
        buf.put_u8(self.extended_rcode);
        buf.put_u8(self.version);
        buf.put_u16(self.flags);
        with_length_prefix(buf, |buf| {
            self.options.iter().try_for_each(|option| option.encode(buf))
        })
    }
}

/// Any entry of an answer, authority or additional section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Resource(ResourceRecord),
    Opt(OptRecord),
}

impl Record {
    pub fn name(&self) -> &str {
        match self {
            Record::Resource(rr) => &rr.name,
            Record::Opt(_) => ".",
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Resource(rr) => rr.record_type(),
            Record::Opt(_) => RecordType::OPT,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceRecord> {
        match self {
            Record::Resource(rr) => Some(rr),
            Record::Opt(_) => None,
        }
    }

    pub fn encoding_length(&self) -> usize {
        match self {
            Record::Resource(rr) => rr.encoding_length(),
            Record::Opt(opt) => opt.encoding_length(),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            Record::Resource(rr) => rr.encode(buf),
            Record::Opt(opt) => opt.encode(buf),
        }
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let owner = reader.name(false)?;
        let rtype = RecordType(reader.u16()?);
        let class = reader.u16()?;

        if rtype == RecordType::OPT {
            if owner != "." {
                return Err(DecodeError::OptNotRoot(owner));
            }
            let extended_rcode = reader.u8()?;
            let version = reader.u8()?;
            let flags = reader.u16()?;
            let len = reader.u16()? as usize;
            let end = reader.position() + len;
            let mut options = Vec::new();
            while reader.position() < end {
                options.push(EdnsOption::decode(reader)?);
            }
            if reader.position() != end {
                return Err(DecodeError::BufferOverflow(end));
            }
            return Ok(Record::Opt(OptRecord {
                udp_payload_size: class,
                extended_rcode,
                version,
                flags,
                options,
            }));
        }

        let ttl = reader.u32()?;
        let len = reader.u16()? as usize;
        let data = RData::decode(reader, rtype, len)?;
        Ok(Record::Resource(ResourceRecord {
            name: owner,
            class: RecordClass(class & !CLASS_HIGH_BIT),
            ttl,
            flush: class & CLASS_HIGH_BIT != 0,
            data,
        }))
    }
}

impl From<ResourceRecord> for Record {
    fn from(rr: ResourceRecord) -> Self {
        Record::Resource(rr)
    }
}

impl From<OptRecord> for Record {
    fn from(opt: OptRecord) -> Self {
        Record::Opt(opt)
    }
}
