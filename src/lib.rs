//! In-memory mirror of kernel-reported interface state.
//!
//! The building block is [`LinkedSet`]: a thread-safe set whose mutations
//! cascade into linked sets and which can signal when its contents reach a
//! declared target. [`IpAddrSet`] specializes it for interface addresses fed
//! from decoded RTM_NEWADDR/RTM_DELADDR messages, and [`InterfaceState`]
//! ties one interface's sets to a global view.

pub mod addr;
pub mod error;
pub mod linked_set;
pub mod state;

pub use addr::{AddrKey, AddrRecord, IpAddrSet, LinkLocalFilter, new_ipaddr_set};
pub use error::MirrorError;
pub use linked_set::LinkedSet;
pub use linked_set::filter::{AllMembers, TargetFilter};
pub use state::{InterfaceState, new_shared_ipaddr};
