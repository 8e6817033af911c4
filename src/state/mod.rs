use std::sync::Arc;
use std::time::Duration;

use crate::addr::message::NlMessage;
use crate::addr::{AddrKey, IpAddrSet, new_ipaddr_set};
use crate::error::MirrorError;
use crate::linked_set::LinkedSet;

/// Shared address set, typically the all-interfaces view.
pub type SharedIpAddr = Arc<IpAddrSet>;

/// Bridge/bond ports by interface index.
pub type PortSet = LinkedSet<u32>;

/// Create a new shared address set with no members.
pub fn new_shared_ipaddr() -> SharedIpAddr {
    Arc::new(new_ipaddr_set())
}

/// Mirror of one interface: its addresses and, for masters, its ports.
///
/// Address changes made here cascade into the global set passed to
/// [`InterfaceState::new`], so the global view always contains the union of
/// every attached interface.
pub struct InterfaceState {
    pub ifname: String,
    ipaddr: SharedIpAddr,
    ports: Arc<PortSet>,
    global: Option<SharedIpAddr>,
}

impl InterfaceState {
    pub fn new(ifname: impl Into<String>, global: Option<&SharedIpAddr>) -> Self {
        let ipaddr = new_shared_ipaddr();
        if let Some(global) = global {
            ipaddr.connect(global);
        }
        let ifname = ifname.into();
        log::debug!("tracking interface {ifname}");
        Self {
            ifname,
            ipaddr,
            ports: Arc::new(PortSet::new()),
            global: global.cloned(),
        }
    }

    pub fn ipaddr(&self) -> &SharedIpAddr {
        &self.ipaddr
    }

    pub fn ports(&self) -> &Arc<PortSet> {
        &self.ports
    }

    /// Apply an RTM_NEWADDR for this interface.
    pub fn on_newaddr(&self, msg: &impl NlMessage) {
        self.ipaddr.add_msg(msg);
    }

    /// Apply an RTM_DELADDR for this interface.
    pub fn on_deladdr(&self, msg: &impl NlMessage) -> Result<(), MirrorError> {
        self.ipaddr.remove_msg(msg)
    }

    /// Declare the desired address list and wait for the kernel to report it.
    ///
    /// Automatic IPv6 link-local addresses need not be listed.
    pub fn wait_addresses(
        &self,
        target: impl IntoIterator<Item = AddrKey>,
        timeout: Option<Duration>,
    ) -> bool {
        self.ipaddr.set_target(target);
        let reached = self.ipaddr.wait_for_target(timeout);
        if !reached {
            log::warn!("{}: address target not reached", self.ifname);
        }
        reached
    }

    /// Stop cascading this interface's addresses into the global view.
    /// Addresses already cascaded stay there.
    pub fn detach(&mut self) -> Result<(), MirrorError> {
        match self.global.take() {
            Some(global) => self.ipaddr.disconnect(&global),
            None => Err(MirrorError::LinkNotFound),
        }
    }
}
