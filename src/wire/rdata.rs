//! Type-specific record payloads.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use super::reader::{Reader, put_char_string, with_length_prefix};
use super::types::RecordType;
use super::{name, typebitmap};
use crate::error::{DecodeError, EncodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srv {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hinfo {
    pub cpu: String,
    pub os: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    pub mname: String,
    /// Responsible mailbox in mail form (`first\.last.example.com`).
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mx {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caa {
    pub flags: u8,
    pub tag: String,
    pub value: String,
}

impl Caa {
    pub const ISSUER_CRITICAL: u8 = 0x80;

    pub fn issuer_critical(&self) -> bool {
        self.flags & Self::ISSUER_CRITICAL != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnskey {
    pub flags: u16,
    pub algorithm: u8,
    pub key: Vec<u8>,
}

impl Dnskey {
    pub const PROTOCOL: u8 = 3;
    pub const ZONE_KEY: u16 = 0x0100;
    pub const SECURE_ENTRYPOINT: u16 = 0x0001;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signers_name: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec {
    pub next_domain: String,
    pub rrtypes: Vec<RecordType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3 {
    pub algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    /// Hashed owner name of the next record, unencoded.
    pub next_domain: Vec<u8>,
    pub rrtypes: Vec<RecordType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rp {
    /// Mailbox in mail form.
    pub mbox: String,
    pub txt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ds {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sshfp {
    pub algorithm: u8,
    pub hash: u8,
    /// Uppercase hex.
    pub fingerprint: String,
}

impl Sshfp {
    pub const HASH_SHA1: u8 = 1;
    pub const HASH_SHA256: u8 = 2;

    fn fingerprint_length(hash: u8) -> Option<usize> {
        match hash {
            Self::HASH_SHA1 => Some(20),
            Self::HASH_SHA256 => Some(32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naptr {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub services: String,
    pub regexp: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlsa {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub certificate: Vec<u8>,
}

/// Record payload, one variant per supported record shape.
///
/// Types without a dedicated codec (NULL included) decode to
/// [`RData::Unknown`] and round-trip their bytes untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Cname(String),
    Dname(String),
    Ns(String),
    Txt(Vec<Vec<u8>>),
    Srv(Srv),
    Hinfo(Hinfo),
    Soa(Soa),
    Mx(Mx),
    Caa(Caa),
    Dnskey(Dnskey),
    Rrsig(Rrsig),
    Nsec(Nsec),
    Nsec3(Nsec3),
    Rp(Rp),
    Ds(Ds),
    Sshfp(Sshfp),
    Naptr(Naptr),
    Tlsa(Tlsa),
    Unknown { rtype: RecordType, data: Vec<u8> },
}

impl RData {
    pub fn record_type(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Aaaa(_) => RecordType::AAAA,
            RData::Ptr(_) => RecordType::PTR,
            RData::Cname(_) => RecordType::CNAME,
            RData::Dname(_) => RecordType::DNAME,
            RData::Ns(_) => RecordType::NS,
            RData::Txt(_) => RecordType::TXT,
            RData::Srv(_) => RecordType::SRV,
            RData::Hinfo(_) => RecordType::HINFO,
            RData::Soa(_) => RecordType::SOA,
            RData::Mx(_) => RecordType::MX,
            RData::Caa(_) => RecordType::CAA,
            RData::Dnskey(_) => RecordType::DNSKEY,
            RData::Rrsig(_) => RecordType::RRSIG,
            RData::Nsec(_) => RecordType::NSEC,
            RData::Nsec3(_) => RecordType::NSEC3,
            RData::Rp(_) => RecordType::RP,
            RData::Ds(_) => RecordType::DS,
            RData::Sshfp(_) => RecordType::SSHFP,
            RData::Naptr(_) => RecordType::NAPTR,
            RData::Tlsa(_) => RecordType::TLSA,
            RData::Unknown { rtype, .. } => *rtype,
        }
    }

    /// Encoded size including the 16-bit rdlength.
    pub fn encoding_length(&self) -> usize {
        2 + self.body_length()
    }

    fn body_length(&self) -> usize {
        let name_len = |n: &str| name::encoding_length(n, false);
        match self {
            RData::A(_) => 4,
            RData::Aaaa(_) => 16,
            RData::Ptr(n) | RData::Cname(n) | RData::Dname(n) | RData::Ns(n) => name_len(n),
            RData::Txt(strings) => strings.iter().map(|s| 1 + s.len()).sum(),
            RData::Srv(srv) => 6 + name_len(&srv.target),
            RData::Hinfo(h) => 2 + h.cpu.len() + h.os.len(),
            RData::Soa(soa) => {
                name_len(&soa.mname) + name::encoding_length(&soa.rname, true) + 20
            }
            RData::Mx(mx) => 2 + name_len(&mx.exchange),
            RData::Caa(caa) => 2 + caa.tag.len() + caa.value.len(),
            RData::Dnskey(key) => 4 + key.key.len(),
            RData::Rrsig(sig) => 18 + name_len(&sig.signers_name) + sig.signature.len(),
            RData::Nsec(nsec) => {
                name_len(&nsec.next_domain) + typebitmap::encoding_length(&nsec.rrtypes)
            }
            RData::Nsec3(nsec3) => {
                6 + nsec3.salt.len()
                    + nsec3.next_domain.len()
                    + typebitmap::encoding_length(&nsec3.rrtypes)
            }
            RData::Rp(rp) => name::encoding_length(&rp.mbox, true) + name_len(&rp.txt),
            RData::Ds(ds) => 4 + ds.digest.len(),
            RData::Sshfp(fp) => 2 + fp.fingerprint.len() / 2,
            RData::Naptr(n) => {
                4 + 3
                    + n.flags.len()
                    + n.services.len()
                    + n.regexp.len()
                    + name_len(&n.replacement)
            }
            RData::Tlsa(t) => 3 + t.certificate.len(),
            RData::Unknown { data, .. } => data.len(),
        }
    }

    /// Writes rdlength followed by the payload.
    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        with_length_prefix(buf, |buf| self.encode_body(buf))
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            RData::A(addr) => buf.put_slice(&addr.octets()),
            RData::Aaaa(addr) => buf.put_slice(&addr.octets()),
            RData::Ptr(n) | RData::Cname(n) | RData::Dname(n) | RData::Ns(n) => {
                name::encode(n, buf, false)?
            }
            RData::Txt(strings) => {
                for s in strings {
                    put_bytes_u8(buf, s)?;
                }
            }
            RData::Srv(srv) => {
                buf.put_u16(srv.priority);
                buf.put_u16(srv.weight);
                buf.put_u16(srv.port);
                name::encode(&srv.target, buf, false)?;
            }
            RData::Hinfo(h) => {
                put_char_string(buf, &h.cpu)?;
                put_char_string(buf, &h.os)?;
            }
            RData::Soa(soa) => {
                name::encode(&soa.mname, buf, false)?;
                name::encode(&soa.rname, buf, true)?;
                buf.put_u32(soa.serial);
                buf.put_u32(soa.refresh);
                buf.put_u32(soa.retry);
                buf.put_u32(soa.expire);
                buf.put_u32(soa.minimum);
            }
            RData::Mx(mx) => {
                buf.put_u16(mx.preference);
                name::encode(&mx.exchange, buf, false)?;
            }
            RData::Caa(caa) => {
                buf.put_u8(caa.flags);
                put_char_string(buf, &caa.tag)?;
                buf.put_slice(caa.value.as_bytes());
            }
            RData::Dnskey(key) => {
                buf.put_u16(key.flags);
                buf.put_u8(Dnskey::PROTOCOL);
                buf.put_u8(key.algorithm);
                buf.put_slice(&key.key);
            }
            RData::Rrsig(sig) => {
                buf.put_u16(sig.type_covered.0);
                buf.put_u8(sig.algorithm);
                buf.put_u8(sig.labels);
                buf.put_u32(sig.original_ttl);
                buf.put_u32(sig.expiration);
                buf.put_u32(sig.inception);
                buf.put_u16(sig.key_tag);
                name::encode(&sig.signers_name, buf, false)?;
                buf.put_slice(&sig.signature);
            }
            RData::Nsec(nsec) => {
                name::encode(&nsec.next_domain, buf, false)?;
                typebitmap::encode(&nsec.rrtypes, buf);
            }
            RData::Nsec3(nsec3) => {
                buf.put_u8(nsec3.algorithm);
                buf.put_u8(nsec3.flags);
                buf.put_u16(nsec3.iterations);
                put_bytes_u8(buf, &nsec3.salt)?;
                put_bytes_u8(buf, &nsec3.next_domain)?;
                typebitmap::encode(&nsec3.rrtypes, buf);
            }
            RData::Rp(rp) => {
                name::encode(&rp.mbox, buf, true)?;
                name::encode(&rp.txt, buf, false)?;
            }
            RData::Ds(ds) => {
                buf.put_u16(ds.key_tag);
                buf.put_u8(ds.algorithm);
                buf.put_u8(ds.digest_type);
                buf.put_slice(&ds.digest);
            }
            RData::Sshfp(fp) => {
                let expected = Sshfp::fingerprint_length(fp.hash)
                    .ok_or(EncodeError::UnknownHashType(fp.hash))?;
                let bytes = hex::decode(&fp.fingerprint)
                    .map_err(|e| EncodeError::InvalidFingerprint(e.to_string()))?;
                if bytes.len() != expected {
                    return Err(EncodeError::FingerprintLength {
                        hash: fp.hash,
                        expected,
                        actual: bytes.len(),
                    });
                }
                buf.put_u8(fp.algorithm);
                buf.put_u8(fp.hash);
                buf.put_slice(&bytes);
            }
            RData::Naptr(n) => {
                buf.put_u16(n.order);
                buf.put_u16(n.preference);
                put_char_string(buf, &n.flags)?;
                put_char_string(buf, &n.services)?;
                put_char_string(buf, &n.regexp)?;
                name::encode(&n.replacement, buf, false)?;
            }
            RData::Tlsa(t) => {
                buf.put_u8(t.usage);
                buf.put_u8(t.selector);
                buf.put_u8(t.matching_type);
                buf.put_slice(&t.certificate);
            }
            RData::Unknown { data, .. } => buf.put_slice(data),
        }
        Ok(())
    }

    /// Decodes `len` payload bytes at the reader's position. The reader is
    /// left exactly `len` bytes further on regardless of what the codec read.
    pub(crate) fn decode(
        reader: &mut Reader<'_>,
        rtype: RecordType,
        len: usize,
    ) -> Result<Self, DecodeError> {
        let start = reader.position();
        reader.bytes(len)?;
        reader.seek(start);
        let end = start + len;

        let data = match rtype {
            RecordType::A if len == 4 => {
                let b = reader.bytes(4)?;
                RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            RecordType::AAAA if len == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(reader.bytes(16)?);
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            RecordType::PTR => RData::Ptr(reader.name(false)?),
            RecordType::CNAME => RData::Cname(reader.name(false)?),
            RecordType::DNAME => RData::Dname(reader.name(false)?),
            RecordType::NS => RData::Ns(reader.name(false)?),
            RecordType::TXT => {
                let mut strings = Vec::new();
                while reader.position() < end {
                    let n = reader.u8()? as usize;
                    strings.push(reader.bytes(n)?.to_vec());
                }
                RData::Txt(strings)
            }
            RecordType::SRV => RData::Srv(Srv {
                priority: reader.u16()?,
                weight: reader.u16()?,
                port: reader.u16()?,
                target: reader.name(false)?,
            }),
            RecordType::HINFO => RData::Hinfo(Hinfo {
                cpu: reader.char_string()?,
                os: reader.char_string()?,
            }),
            RecordType::SOA => RData::Soa(Soa {
                mname: reader.name(false)?,
                rname: reader.name(true)?,
                serial: reader.u32()?,
                refresh: reader.u32()?,
                retry: reader.u32()?,
                expire: reader.u32()?,
                minimum: reader.u32()?,
            }),
            RecordType::MX => RData::Mx(Mx {
                preference: reader.u16()?,
                exchange: reader.name(false)?,
            }),
            RecordType::CAA => RData::Caa(Caa {
                flags: reader.u8()?,
                tag: reader.char_string()?,
                value: String::from_utf8_lossy(reader.bytes_until(end)?).into_owned(),
            }),
            RecordType::DNSKEY => {
                let flags = reader.u16()?;
                let protocol = reader.u8()?;
                if protocol != Dnskey::PROTOCOL {
                    return Err(DecodeError::DnskeyProtocol(protocol));
                }
                RData::Dnskey(Dnskey {
                    flags,
                    algorithm: reader.u8()?,
                    key: reader.bytes_until(end)?.to_vec(),
                })
            }
            RecordType::RRSIG => RData::Rrsig(Rrsig {
                type_covered: RecordType(reader.u16()?),
                algorithm: reader.u8()?,
                labels: reader.u8()?,
                original_ttl: reader.u32()?,
                expiration: reader.u32()?,
                inception: reader.u32()?,
                key_tag: reader.u16()?,
                signers_name: reader.name(false)?,
                signature: reader.bytes_until(end)?.to_vec(),
            }),
            RecordType::NSEC => RData::Nsec(Nsec {
                next_domain: reader.name(false)?,
                rrtypes: typebitmap::decode(reader, end)?,
            }),
            RecordType::NSEC3 => {
                let algorithm = reader.u8()?;
                let flags = reader.u8()?;
                let iterations = reader.u16()?;
                let salt_len = reader.u8()? as usize;
                let salt = reader.bytes(salt_len)?.to_vec();
                let hash_len = reader.u8()? as usize;
                let next_domain = reader.bytes(hash_len)?.to_vec();
                RData::Nsec3(Nsec3 {
                    algorithm,
                    flags,
                    iterations,
                    salt,
                    next_domain,
                    rrtypes: typebitmap::decode(reader, end)?,
                })
            }
            RecordType::RP => RData::Rp(Rp {
                mbox: reader.name(true)?,
                txt: reader.name(false)?,
            }),
            RecordType::DS => RData::Ds(Ds {
                key_tag: reader.u16()?,
                algorithm: reader.u8()?,
                digest_type: reader.u8()?,
                digest: reader.bytes_until(end)?.to_vec(),
            }),
            RecordType::SSHFP => {
                let algorithm = reader.u8()?;
                let hash = reader.u8()?;
                let fingerprint = match Sshfp::fingerprint_length(hash) {
                    Some(n) => reader.bytes(n)?,
                    None => reader.bytes_until(end)?,
                };
                RData::Sshfp(Sshfp {
                    algorithm,
                    hash,
                    fingerprint: hex::encode_upper(fingerprint),
                })
            }
            RecordType::NAPTR => RData::Naptr(Naptr {
                order: reader.u16()?,
                preference: reader.u16()?,
                flags: reader.char_string()?,
                services: reader.char_string()?,
                regexp: reader.char_string()?,
                replacement: reader.name(false)?,
            }),
            RecordType::TLSA => RData::Tlsa(Tlsa {
                usage: reader.u8()?,
                selector: reader.u8()?,
                matching_type: reader.u8()?,
                certificate: reader.bytes_until(end)?.to_vec(),
            }),
            _ => RData::Unknown {
                rtype,
                data: reader.bytes_until(end)?.to_vec(),
            },
        };

        if reader.position() > end {
            return Err(DecodeError::BufferOverflow(end));
        }
        reader.seek(end);
        Ok(data)
    }
}

fn put_bytes_u8(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), EncodeError> {
    let len = u8::try_from(bytes.len()).map_err(|_| EncodeError::StringTooLong(bytes.len()))?;
    buf.put_u8(len);
    buf.put_slice(bytes);
    Ok(())
}
