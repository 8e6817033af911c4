// Decoded address messages as seen by the address mirror.
//
// Decoding RTM_NEWADDR/RTM_DELADDR from the wire happens elsewhere; this
// module only fixes the narrow interface the mirror reads from: a family
// discriminator, named attribute lookup and named header field lookup.

use std::net::IpAddr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const AF_INET: u8 = libc::AF_INET as u8;
pub const AF_INET6: u8 = libc::AF_INET6 as u8;

// ifaddrmsg attributes
pub const IFA_ADDRESS: &str = "IFA_ADDRESS";
pub const IFA_LOCAL: &str = "IFA_LOCAL";
pub const IFA_BROADCAST: &str = "IFA_BROADCAST";
pub const IFA_FLAGS: &str = "IFA_FLAGS";

// ifaddrmsg header fields
pub const FIELD_PREFIXLEN: &str = "prefixlen";

// ---------------------------------------------------------------------------
// AttrValue
// ---------------------------------------------------------------------------

/// A decoded attribute or header field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Addr(IpAddr),
    U8(u8),
    U32(u32),
}

impl AttrValue {
    pub fn as_addr(&self) -> Option<IpAddr> {
        match self {
            Self::Addr(ip) => Some(*ip),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::U8(v) => Some(*v),
            Self::U32(v) => u8::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U8(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<IpAddr> for AttrValue {
    fn from(ip: IpAddr) -> Self {
        Self::Addr(ip)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

// ---------------------------------------------------------------------------
// NlMessage
// ---------------------------------------------------------------------------

/// A decoded netlink message carrying an address family and named values.
pub trait NlMessage {
    /// Address family discriminator (`AF_INET`, `AF_INET6`, ...).
    fn family(&self) -> u8;

    /// Look up a netlink attribute by name, e.g. `IFA_LOCAL`.
    fn get_attr(&self, name: &str) -> Option<&AttrValue>;

    /// Look up a fixed header field by name, e.g. `prefixlen`.
    fn get_field(&self, name: &str) -> Option<&AttrValue>;
}

/// Owned `ifaddrmsg` with its attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfAddrMsg {
    pub family: u8,
    fields: Vec<(&'static str, AttrValue)>,
    attrs: Vec<(String, AttrValue)>,
}

impl IfAddrMsg {
    pub fn new(family: u8, prefixlen: u8) -> Self {
        Self {
            family,
            fields: vec![(FIELD_PREFIXLEN, AttrValue::U8(prefixlen))],
            attrs: Vec::new(),
        }
    }

    /// Set a header field, replacing any earlier value.
    pub fn with_field(mut self, name: &'static str, value: AttrValue) -> Self {
        self.fields.retain(|(n, _)| *n != name);
        self.fields.push((name, value));
        self
    }

    /// Append an attribute. Lookups return the first attribute of a name,
    /// as the kernel never repeats these.
    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.push((name.to_string(), value.into()));
        self
    }
}

impl NlMessage for IfAddrMsg {
    fn family(&self) -> u8 {
        self.family
    }

    fn get_attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn get_field(&self, name: &str) -> Option<&AttrValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}
