//! Cross-thread convergence tests.
//!
//! These exercise the public API the way a reconciliation layer does: one
//! thread declares a target and waits while others feed kernel events.
//! Run with: `cargo test --test convergence_integration`

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ipmirror::addr::message::{AF_INET, AF_INET6, IFA_ADDRESS, IFA_LOCAL, IfAddrMsg};
use ipmirror::{AddrKey, InterfaceState, LinkedSet, MirrorError, new_shared_ipaddr};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn v4(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
}

fn newaddr_v4(last: u8) -> IfAddrMsg {
    IfAddrMsg::new(AF_INET, 24).with_attr(IFA_LOCAL, v4(last))
}

// =========================================================================
// Section 1: waiting on targets fed from other threads (TC-1.x)
// =========================================================================

/// TC-1.1: a waiter wakes once a producer thread delivers every address.
#[test]
fn tc_1_1_wait_for_addresses_from_producer() {
    init_logger();
    let eth0 = Arc::new(InterfaceState::new("eth0", None));
    let target: Vec<AddrKey> = (1..=5).map(|i| AddrKey::new(v4(i), 24)).collect();
    eth0.ipaddr().set_target(target);

    let producer = {
        let eth0 = Arc::clone(&eth0);
        thread::spawn(move || {
            for i in 1..=5 {
                eth0.on_newaddr(&newaddr_v4(i));
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    assert!(eth0.ipaddr().wait_for_target(Some(Duration::from_secs(5))));
    producer.join().unwrap();
    assert_eq!(eth0.ipaddr().len(), 5);
}

/// TC-1.2: the automatic link-local address arriving alone does not satisfy
/// a target, nor does it block one.
#[test]
fn tc_1_2_link_local_neither_satisfies_nor_blocks() {
    init_logger();
    let eth0 = InterfaceState::new("eth0", None);
    let ll = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0x1c2, 0x3ff, 0xfe04, 0x0506));
    eth0.on_newaddr(&IfAddrMsg::new(AF_INET6, 64).with_attr(IFA_ADDRESS, ll));

    eth0.ipaddr().set_target([AddrKey::new(v4(9), 24)]);
    assert!(!eth0.ipaddr().wait_for_target(Some(Duration::ZERO)));

    eth0.on_newaddr(&newaddr_v4(9));
    assert!(eth0.ipaddr().wait_for_target(Some(Duration::ZERO)));
    assert_eq!(eth0.ipaddr().len(), 2);
}

/// TC-1.3: waiting for an empty address list after removals.
#[test]
fn tc_1_3_flush_converges_to_empty() {
    init_logger();
    let eth0 = Arc::new(InterfaceState::new("eth0", None));
    for i in 1..=3 {
        eth0.on_newaddr(&newaddr_v4(i));
    }
    eth0.ipaddr().set_target(Vec::<AddrKey>::new());

    let flusher = {
        let eth0 = Arc::clone(&eth0);
        thread::spawn(move || {
            for i in 1..=3 {
                eth0.on_deladdr(&newaddr_v4(i)).unwrap();
            }
        })
    };

    assert!(eth0.ipaddr().wait_for_target(Some(Duration::from_secs(5))));
    flusher.join().unwrap();
    assert!(eth0.ipaddr().is_empty());
}

// =========================================================================
// Section 2: cascade topology under concurrency (TC-2.x)
// =========================================================================

/// TC-2.1: two interfaces feeding one global view from separate threads.
#[test]
fn tc_2_1_global_view_is_union() {
    init_logger();
    let global = new_shared_ipaddr();
    let eth0 = InterfaceState::new("eth0", Some(&global));
    let eth1 = InterfaceState::new("eth1", Some(&global));

    let target: Vec<AddrKey> = (1..=40).map(|i| AddrKey::new(v4(i), 24)).collect();
    global.set_target(target);

    thread::scope(|s| {
        s.spawn(|| {
            for i in (1..=40).filter(|i| i % 2 == 0) {
                eth0.on_newaddr(&newaddr_v4(i));
            }
        });
        s.spawn(|| {
            for i in (1..=40).filter(|i| i % 2 == 1) {
                eth1.on_newaddr(&newaddr_v4(i));
            }
        });
    });

    assert!(global.wait_for_target(Some(Duration::from_secs(5))));
    assert_eq!(eth0.ipaddr().len(), 20);
    assert_eq!(eth1.ipaddr().len(), 20);
}

/// TC-2.2: a diamond (A -> B, A -> C, B -> D, C -> D) delivers once to D
/// and removes cleanly.
#[test]
fn tc_2_2_diamond_topology() {
    init_logger();
    let a = Arc::new(LinkedSet::<u32, &'static str>::new());
    let b = Arc::new(LinkedSet::new());
    let c = Arc::new(LinkedSet::new());
    let d = Arc::new(LinkedSet::new());
    a.connect(&b);
    a.connect(&c);
    b.connect(&d);
    c.connect(&d);

    a.add(1, Some("one"));
    assert_eq!(d.len(), 1);
    assert_eq!(d.get(&1), Some("one"));

    a.remove(&1).unwrap();
    assert!(b.is_empty() && c.is_empty() && d.is_empty());
}

/// TC-2.3: concurrent mutations on two roots sharing a descendant do not
/// deadlock, and the shared descendant ends with the union.
#[test]
fn tc_2_3_shared_descendant_no_deadlock() {
    init_logger();
    let left = Arc::new(LinkedSet::<u32>::new());
    let right = Arc::new(LinkedSet::<u32>::new());
    let shared = Arc::new(LinkedSet::<u32>::new());
    left.connect(&shared);
    right.connect(&shared);
    // back-links form cycles through the shared set
    shared.connect(&left);
    shared.connect(&right);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..200 {
                left.add(i, None);
            }
        });
        s.spawn(|| {
            for i in 200..400 {
                right.add(i, None);
            }
        });
    });

    assert_eq!(shared.len(), 400);
    assert_eq!(left.len(), 400);
    assert_eq!(right.len(), 400);
}

// =========================================================================
// Section 3: error surface (TC-3.x)
// =========================================================================

/// TC-3.1: deleting an address the mirror never saw is a caller error.
#[test]
fn tc_3_1_deladdr_unknown() {
    init_logger();
    let eth0 = InterfaceState::new("eth0", None);
    let err = eth0.on_deladdr(&newaddr_v4(1)).unwrap_err();
    assert!(matches!(err, MirrorError::KeyNotFound(_)));
    assert!(err.to_string().contains("192.168.1.1"));
}

/// TC-3.2: the global view already lost the address; the interface removal
/// still succeeds.
#[test]
fn tc_3_2_cascaded_absence_absorbed() {
    init_logger();
    let global = new_shared_ipaddr();
    let eth0 = InterfaceState::new("eth0", Some(&global));
    eth0.on_newaddr(&newaddr_v4(1));
    global.remove(&AddrKey::new(v4(1), 24)).unwrap();

    eth0.on_deladdr(&newaddr_v4(1)).unwrap();
    assert!(eth0.ipaddr().is_empty());
}

// =========================================================================
// Section 4: snapshot output (TC-4.x)
// =========================================================================

/// TC-4.1: a snapshot serializes to JSON with key and payload per entry.
#[test]
fn tc_4_1_snapshot_json() {
    init_logger();
    let eth0 = InterfaceState::new("eth0", None);
    eth0.on_newaddr(&newaddr_v4(10));

    let json = serde_json::to_value(eth0.ipaddr().snapshot()).unwrap();
    let entry = &json["entries"][0];
    assert_eq!(entry["key"]["address"], "192.168.1.10");
    assert_eq!(entry["key"]["prefixlen"], 24);
    assert_eq!(entry["payload"]["local"], "192.168.1.10");
    assert_eq!(json["reached"], false);
    assert!(json["target"].is_null());
}
