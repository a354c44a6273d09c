//! DNS message wire format as used by multicast DNS.
//!
//! [`Message::encode`] / [`Message::decode`] handle the datagram form;
//! [`Message::stream_encode`] / [`Message::stream_decode`] add the two-byte
//! length prefix used on stream transports.

pub mod name;
mod option;
mod rdata;
mod reader;
mod record;
mod typebitmap;
mod types;


use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};
use reader::Reader;
use record::CLASS_HIGH_BIT;

pub use option::EdnsOption;
pub use rdata::{
    Caa, Dnskey, Ds, Hinfo, Mx, Naptr, Nsec, Nsec3, RData, Rp, Rrsig, Soa, Srv, Sshfp, Tlsa,
};
pub use record::{OptRecord, Record, ResourceRecord};
pub use types::{OptionCode, Opcode, Rcode, RecordClass, RecordType, UnknownMnemonic};

pub const HEADER_LENGTH: usize = 12;

const RESPONSE_BIT: u16 = 0x8000;
const FLAG_MASK: u16 = 0x7fff;

pub const AUTHORITATIVE_ANSWER: u16 = 1 << 10;
pub const TRUNCATED_RESPONSE: u16 = 1 << 9;
pub const RECURSION_DESIRED: u16 = 1 << 8;
pub const RECURSION_AVAILABLE: u16 = 1 << 7;
pub const AUTHENTIC_DATA: u16 = 1 << 5;
pub const CHECKING_DISABLED: u16 = 1 << 4;
/// DO bit of the OPT record flags.
pub const DNSSEC_OK: u16 = 1 << 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketKind {
    #[default]
    Query,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub class: RecordClass,
    /// mDNS QU bit.
    pub unicast_response: bool,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            class: RecordClass::IN,
            unicast_response: false,
        }
    }

    pub fn encoding_length(&self) -> usize {
        name::encoding_length(&self.name, false) + 4
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        name::encode(&self.name, buf, false)?;
        buf.put_u16(self.qtype.0);
        let qu = if self.unicast_response { CLASS_HIGH_BIT } else { 0 };
        buf.put_u16((self.class.0 & !CLASS_HIGH_BIT) | qu);
        Ok(())
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let name = reader.name(false)?;
        let qtype = RecordType(reader.u16()?);
        let class = reader.u16()?;
        Ok(Self {
            name,
            qtype,
            class: RecordClass(class & !CLASS_HIGH_BIT),
            unicast_response: class & CLASS_HIGH_BIT != 0,
        })
    }
}

/// A complete DNS message.
///
/// `flags` holds the 15 header bits below QR; QR itself is `kind`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub id: u16,
    pub kind: PacketKind,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    pub fn query(questions: Vec<Question>) -> Self {
        Self {
            questions,
            ..Default::default()
        }
    }

    /// A response with the authoritative-answer flag set.
    pub fn response(answers: Vec<Record>) -> Self {
        Self {
            kind: PacketKind::Response,
            flags: AUTHORITATIVE_ANSWER,
            answers,
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.kind == PacketKind::Response
    }

    /// Resource records of the answer and additional sections, in order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers
            .iter()
            .chain(&self.additionals)
            .filter_map(Record::as_resource)
    }

    pub fn opcode(&self) -> Opcode {
        Opcode(((self.flags >> 11) & 0xf) as u8)
    }

    pub fn rcode(&self) -> Rcode {
        Rcode((self.flags & 0xf) as u8)
    }

    pub fn aa(&self) -> bool {
        self.flags & AUTHORITATIVE_ANSWER != 0
    }

    pub fn tc(&self) -> bool {
        self.flags & TRUNCATED_RESPONSE != 0
    }

    pub fn rd(&self) -> bool {
        self.flags & RECURSION_DESIRED != 0
    }

    pub fn ra(&self) -> bool {
        self.flags & RECURSION_AVAILABLE != 0
    }

    pub fn z(&self) -> bool {
        self.flags & (1 << 6) != 0
    }

    pub fn ad(&self) -> bool {
        self.flags & AUTHENTIC_DATA != 0
    }

    pub fn cd(&self) -> bool {
        self.flags & CHECKING_DISABLED != 0
    }

    pub fn encoding_length(&self) -> usize {
        HEADER_LENGTH
            + self
                .questions
                .iter()
                .map(Question::encoding_length)
                .sum::<usize>()
            + [&self.answers, &self.authorities, &self.additionals]
                .into_iter()
                .flatten()
                .map(Record::encoding_length)
                .sum::<usize>()
    }

    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(self.encoding_length());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    fn encode_into(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let count = |n: usize| u16::try_from(n).map_err(|_| EncodeError::SectionTooLarge(n));

        buf.put_u16(self.id);
        let qr = match self.kind {
            PacketKind::Query => 0,
            PacketKind::Response => RESPONSE_BIT,
        };
        buf.put_u16(qr | (self.flags & FLAG_MASK));
        buf.put_u16(count(self.questions.len())?);
        buf.put_u16(count(self.answers.len())?);
        buf.put_u16(count(self.authorities.len())?);
        buf.put_u16(count(self.additionals.len())?);

        for question in &self.questions {
            question.encode(buf)?;
        }
        for record in [&self.answers, &self.authorities, &self.additionals]
            .into_iter()
            .flatten()
        {
            record.encode(buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LENGTH {
            return Err(DecodeError::HeaderTooShort(buf.len()));
        }
        let mut reader = Reader::new(buf);
        let id = reader.u16()?;
        let flags = reader.u16()?;
        let qdcount = reader.u16()?;
        let ancount = reader.u16()?;
        let nscount = reader.u16()?;
        let arcount = reader.u16()?;

        let questions = (0..qdcount)
            .map(|_| Question::decode(&mut reader))
            .collect::<Result<_, _>>()?;
        let mut section = |n: u16| {
            (0..n)
                .map(|_| Record::decode(&mut reader))
                .collect::<Result<Vec<_>, _>>()
        };
        let answers = section(ancount)?;
        let authorities = section(nscount)?;
        let additionals = section(arcount)?;

        Ok(Self {
            id,
            kind: if flags & RESPONSE_BIT != 0 {
                PacketKind::Response
            } else {
                PacketKind::Query
            },
            flags: flags & FLAG_MASK,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Encodes with a two-byte big-endian length prefix.
    pub fn stream_encode(&self) -> Result<Bytes, EncodeError> {
        let len = self.encoding_length();
        let prefix = u16::try_from(len).map_err(|_| EncodeError::DataTooLong(len))?;
        let mut buf = BytesMut::with_capacity(2 + len);
        buf.put_u16(prefix);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes one length-prefixed message. Returns `Ok(None)` until the
    /// buffer holds the whole frame.
    pub fn stream_decode(buf: &[u8]) -> Result<Option<Self>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < 2 + len {
            return Ok(None);
        }
        Self::decode(&buf[2..2 + len]).map(Some)
    }
}
