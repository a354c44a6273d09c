//! EDNS(0) options carried by the OPT pseudo-record.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use super::reader::{Reader, with_length_prefix};
use super::types::OptionCode;
use crate::error::{DecodeError, EncodeError};

const FAMILY_IPV4: u16 = 1;
const FAMILY_IPV6: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdnsOption {
    /// RFC 7871. Only the first `ceil(source_prefix_length / 8)` address
    /// bytes are transmitted and bits past the prefix are sent as zero, so
    /// an address with host bits set decodes as its network address.
    ClientSubnet {
        source_prefix_length: u8,
        scope_prefix_length: u8,
        address: IpAddr,
    },
    /// RFC 7828. Queries carry no timeout.
    TcpKeepalive { timeout: Option<u16> },
    /// RFC 7830. Zero-filled.
    Padding { length: u16 },
    /// RFC 8145.
    KeyTag { tags: Vec<u16> },
    Other { code: OptionCode, data: Vec<u8> },
}

impl EdnsOption {
    pub fn code(&self) -> OptionCode {
        match self {
            EdnsOption::ClientSubnet { .. } => OptionCode::CLIENT_SUBNET,
            EdnsOption::TcpKeepalive { .. } => OptionCode::TCP_KEEPALIVE,
            EdnsOption::Padding { .. } => OptionCode::PADDING,
            EdnsOption::KeyTag { .. } => OptionCode::KEY_TAG,
            EdnsOption::Other { code, .. } => *code,
        }
    }

    /// Length of the option including its code and length fields.
    pub fn encoding_length(&self) -> usize {
        4 + match self {
            EdnsOption::ClientSubnet {
                source_prefix_length,
                address,
                ..
            } => 4 + subnet_address_length(*source_prefix_length, address),
            EdnsOption::TcpKeepalive { timeout } => timeout.map_or(0, |_| 2),
            EdnsOption::Padding { length } => *length as usize,
            EdnsOption::KeyTag { tags } => tags.len() * 2,
            EdnsOption::Other { data, .. } => data.len(),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u16(self.code().0);
        with_length_prefix(buf, |buf| {
            match self {
                EdnsOption::ClientSubnet {
                    source_prefix_length,
                    scope_prefix_length,
                    address,
                } => {
                    let len = subnet_address_length(*source_prefix_length, address);
                    let (family, octets) = match address {
                        IpAddr::V4(v4) => (FAMILY_IPV4, v4.octets().to_vec()),
                        IpAddr::V6(v6) => (FAMILY_IPV6, v6.octets().to_vec()),
                    };
                    buf.put_u16(family);
                    buf.put_u8(*source_prefix_length);
                    buf.put_u8(*scope_prefix_length);
                    let mut prefix = octets[..len].to_vec();
                    let partial = source_prefix_length % 8;
                    if partial != 0 && len * 8 > *source_prefix_length as usize {
                        if let Some(last) = prefix.last_mut() {
                            *last &= 0xFFu8 << (8 - partial);
                        }
                    }
                    buf.put_slice(&prefix);
                }
                EdnsOption::TcpKeepalive { timeout } => {
                    if let Some(timeout) = timeout {
                        buf.put_u16(*timeout);
                    }
                }
                EdnsOption::Padding { length } => buf.put_bytes(0, *length as usize),
                EdnsOption::KeyTag { tags } => tags.iter().for_each(|tag| buf.put_u16(*tag)),
                EdnsOption::Other { data, .. } => buf.put_slice(data),
            }
            Ok(())
        })
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let code = OptionCode(reader.u16()?);
        let len = reader.u16()? as usize;
        let data = reader.bytes(len)?;

        let option = match code {
            OptionCode::CLIENT_SUBNET if len >= 4 => {
                let family = u16::from_be_bytes([data[0], data[1]]);
                let address = &data[4..];
                match family {
                    FAMILY_IPV4 if address.len() <= 4 => {
                        let mut octets = [0u8; 4];
                        octets[..address.len()].copy_from_slice(address);
                        Some(IpAddr::V4(Ipv4Addr::from(octets)))
                    }
                    FAMILY_IPV6 if address.len() <= 16 => {
                        let mut octets = [0u8; 16];
                        octets[..address.len()].copy_from_slice(address);
                        Some(IpAddr::V6(Ipv6Addr::from(octets)))
                    }
                    _ => None,
                }
                .map(|address| EdnsOption::ClientSubnet {
                    source_prefix_length: data[2],
                    scope_prefix_length: data[3],
                    address,
                })
            }
            OptionCode::TCP_KEEPALIVE if len == 0 => Some(EdnsOption::TcpKeepalive { timeout: None }),
            OptionCode::TCP_KEEPALIVE if len == 2 => Some(EdnsOption::TcpKeepalive {
                timeout: Some(u16::from_be_bytes([data[0], data[1]])),
            }),
            OptionCode::PADDING => Some(EdnsOption::Padding { length: len as u16 }),
            OptionCode::KEY_TAG if len % 2 == 0 => Some(EdnsOption::KeyTag {
                tags: data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect(),
            }),
            _ => None,
        };

        Ok(option.unwrap_or_else(|| EdnsOption::Other {
            code,
            data: data.to_vec(),
        }))
    }
}

fn subnet_address_length(source_prefix_length: u8, address: &IpAddr) -> usize {
    let max = match address {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 16,
    };
    (source_prefix_length as usize).div_ceil(8).min(max)
}
