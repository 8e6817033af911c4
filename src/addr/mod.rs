pub mod message;

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

use crate::error::MirrorError;
use crate::linked_set::LinkedSet;
use crate::linked_set::filter::TargetFilter;

use self::message::{
    AF_INET, AF_INET6, AttrValue, FIELD_PREFIXLEN, IFA_ADDRESS, IFA_BROADCAST, IFA_FLAGS,
    IFA_LOCAL, NlMessage,
};

/// Canonical key of an interface address: `(address, prefix length)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AddrKey {
    pub address: IpAddr,
    pub prefixlen: u8,
}

impl AddrKey {
    pub fn new(address: IpAddr, prefixlen: u8) -> Self {
        Self { address, prefixlen }
    }

    /// An IPv6 link-local (`fe80::/10`) address with a /64 prefix, the
    /// form the kernel assigns automatically to every IPv6 interface.
    pub fn is_auto_link_local(&self) -> bool {
        match self.address {
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80 && self.prefixlen == 64,
            IpAddr::V4(_) => false,
        }
    }
}

impl fmt::Display for AddrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefixlen)
    }
}

/// Attributes of an address as last reported by the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AddrRecord {
    pub local: Option<IpAddr>,
    pub broadcast: Option<IpAddr>,
    pub address: Option<IpAddr>,
    pub flags: Option<u32>,
    pub prefixlen: Option<u8>,
}

impl AddrRecord {
    pub fn from_msg(msg: &impl NlMessage) -> Self {
        Self {
            local: msg.get_attr(IFA_LOCAL).and_then(AttrValue::as_addr),
            broadcast: msg.get_attr(IFA_BROADCAST).and_then(AttrValue::as_addr),
            address: msg.get_attr(IFA_ADDRESS).and_then(AttrValue::as_addr),
            flags: msg.get_attr(IFA_FLAGS).and_then(AttrValue::as_u32),
            prefixlen: msg.get_field(FIELD_PREFIXLEN).and_then(AttrValue::as_u8),
        }
    }
}

/// Leaves automatic IPv6 link-local addresses out of target checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkLocalFilter;

impl TargetFilter<AddrKey> for LinkLocalFilter {
    fn counts(&self, key: &AddrKey) -> bool {
        !key.is_auto_link_local()
    }
}

/// Address set of one interface (or of all of them).
pub type IpAddrSet = LinkedSet<AddrKey, AddrRecord>;

/// Create an empty address set that ignores link-local /64 addresses when
/// checking targets.
pub fn new_ipaddr_set() -> IpAddrSet {
    LinkedSet::with_filter(LinkLocalFilter)
}

/// Derive the set key from a decoded address message.
///
/// IPv4 addresses are keyed by `IFA_LOCAL`, IPv6 by `IFA_ADDRESS`. Returns
/// `None` for other families or when the keying attribute or prefix length
/// is missing.
pub fn addr_key(msg: &impl NlMessage) -> Option<AddrKey> {
    let attr = match msg.family() {
        AF_INET => IFA_LOCAL,
        AF_INET6 => IFA_ADDRESS,
        other => {
            log::debug!("ignoring address message with family {other}");
            return None;
        }
    };
    let Some(address) = msg.get_attr(attr).and_then(AttrValue::as_addr) else {
        log::debug!("ignoring address message without {attr}");
        return None;
    };
    let Some(prefixlen) = msg.get_field(FIELD_PREFIXLEN).and_then(AttrValue::as_u8) else {
        log::debug!("ignoring address message without {FIELD_PREFIXLEN}");
        return None;
    };
    Some(AddrKey::new(address, prefixlen))
}

impl LinkedSet<AddrKey, AddrRecord> {
    /// Add the address carried by `msg`, storing its attributes as payload.
    /// Messages of untracked families are ignored.
    pub fn add_msg(&self, msg: &impl NlMessage) {
        if let Some(key) = addr_key(msg) {
            self.add(key, Some(AddrRecord::from_msg(msg)));
        }
    }

    /// Remove the address carried by `msg`. Messages of untracked families
    /// are ignored.
    pub fn remove_msg(&self, msg: &impl NlMessage) -> Result<(), MirrorError> {
        match addr_key(msg) {
            Some(key) => self.remove(&key),
            None => Ok(()),
        }
    }
}
