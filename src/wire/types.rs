//! Numeric DNS code points and their IANA mnemonics.
//!
//! Every table maps values both ways. Values without a mnemonic format as
//! `<PREFIX><n>` (for example `UNKNOWN_65280` or `RCODE_11`) and parse back
//! to the same number.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A mnemonic that is neither in the table nor of the `<PREFIX><n>` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown mnemonic {0:?}")]
pub struct UnknownMnemonic(pub String);

macro_rules! code_table {
    (
        $(#[$meta:meta])*
        pub struct $ty:ident($repr:ty), unknown = $prefix:literal {
            $( $konst:ident = $value:literal => $mnemonic:literal, )*
        }
        $( aliases { $( $alias:literal => $target:ident, )* } )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $ty(pub $repr);

        impl $ty {
            $( pub const $konst: $ty = $ty($value); )*

            /// The IANA mnemonic for this value, if it has one.
            pub fn mnemonic(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some($mnemonic), )*
                    _ => None,
                }
            }

            fn from_mnemonic(s: &str) -> Option<Self> {
                $( if s.eq_ignore_ascii_case($mnemonic) { return Some(Self::$konst); } )*
                $( $( if s == $alias { return Some(Self::$target); } )* )?
                None
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.mnemonic() {
                    Some(m) => f.write_str(m),
                    None => write!(f, "{}{}", $prefix, self.0),
                }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownMnemonic;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if let Some(value) = Self::from_mnemonic(s) {
                    return Ok(value);
                }
                s.get(..$prefix.len())
                    .filter(|head| head.eq_ignore_ascii_case($prefix))
                    .and_then(|_| s[$prefix.len()..].parse::<$repr>().ok())
                    .map($ty)
                    .ok_or_else(|| UnknownMnemonic(s.to_string()))
            }
        }

        impl From<$repr> for $ty {
            fn from(value: $repr) -> Self {
                $ty(value)
            }
        }

        impl From<$ty> for $repr {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

code_table! {
    /// Resource record type (RFC 1035 TYPE / QTYPE).
    pub struct RecordType(u16), unknown = "UNKNOWN_" {
        A = 1 => "A",
        NS = 2 => "NS",
        CNAME = 5 => "CNAME",
        SOA = 6 => "SOA",
        NULL = 10 => "NULL",
        PTR = 12 => "PTR",
        HINFO = 13 => "HINFO",
        MX = 15 => "MX",
        TXT = 16 => "TXT",
        RP = 17 => "RP",
        AFSDB = 18 => "AFSDB",
        SIG = 24 => "SIG",
        KEY = 25 => "KEY",
        AAAA = 28 => "AAAA",
        LOC = 29 => "LOC",
        SRV = 33 => "SRV",
        NAPTR = 35 => "NAPTR",
        KX = 36 => "KX",
        CERT = 37 => "CERT",
        DNAME = 39 => "DNAME",
        OPT = 41 => "OPT",
        APL = 42 => "APL",
        DS = 43 => "DS",
        SSHFP = 44 => "SSHFP",
        IPSECKEY = 45 => "IPSECKEY",
        RRSIG = 46 => "RRSIG",
        NSEC = 47 => "NSEC",
        DNSKEY = 48 => "DNSKEY",
        DHCID = 49 => "DHCID",
        NSEC3 = 50 => "NSEC3",
        NSEC3PARAM = 51 => "NSEC3PARAM",
        TLSA = 52 => "TLSA",
        HIP = 55 => "HIP",
        CDS = 59 => "CDS",
        CDNSKEY = 60 => "CDNSKEY",
        SPF = 99 => "SPF",
        TKEY = 249 => "TKEY",
        TSIG = 250 => "TSIG",
        IXFR = 251 => "IXFR",
        AXFR = 252 => "AXFR",
        ANY = 255 => "ANY",
        CAA = 257 => "CAA",
        TA = 32768 => "TA",
        DLV = 32769 => "DLV",
    }
    aliases {
        "*" => ANY,
    }
}

code_table! {
    /// Record class. The mDNS flush / QU bit is not part of this value.
    pub struct RecordClass(u16), unknown = "UNKNOWN_" {
        IN = 1 => "IN",
        CS = 2 => "CS",
        CH = 3 => "CH",
        HS = 4 => "HS",
        ANY = 255 => "ANY",
    }
}

code_table! {
    /// Header opcode (4 bits).
    pub struct Opcode(u8), unknown = "OPCODE_" {
        QUERY = 0 => "QUERY",
        IQUERY = 1 => "IQUERY",
        STATUS = 2 => "STATUS",
        NOTIFY = 4 => "NOTIFY",
        UPDATE = 5 => "UPDATE",
    }
}

code_table! {
    /// Header response code (4 bits).
    pub struct Rcode(u8), unknown = "RCODE_" {
        NOERROR = 0 => "NOERROR",
        FORMERR = 1 => "FORMERR",
        SERVFAIL = 2 => "SERVFAIL",
        NXDOMAIN = 3 => "NXDOMAIN",
        NOTIMP = 4 => "NOTIMP",
        REFUSED = 5 => "REFUSED",
        YXDOMAIN = 6 => "YXDOMAIN",
        YXRRSET = 7 => "YXRRSET",
        NXRRSET = 8 => "NXRRSET",
        NOTAUTH = 9 => "NOTAUTH",
        NOTZONE = 10 => "NOTZONE",
    }
}

code_table! {
    /// EDNS(0) option code.
    pub struct OptionCode(u16), unknown = "OPTION_" {
        LLQ = 1 => "LLQ",
        UL = 2 => "UL",
        NSID = 3 => "NSID",
        DAU = 5 => "DAU",
        DHU = 6 => "DHU",
        N3U = 7 => "N3U",
        CLIENT_SUBNET = 8 => "CLIENT_SUBNET",
        EXPIRE = 9 => "EXPIRE",
        COOKIE = 10 => "COOKIE",
        TCP_KEEPALIVE = 11 => "TCP_KEEPALIVE",
        PADDING = 12 => "PADDING",
        CHAIN = 13 => "CHAIN",
        KEY_TAG = 14 => "KEY_TAG",
        DEVICEID = 26946 => "DEVICEID",
    }
}
