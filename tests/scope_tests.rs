//! Lifetime scope properties, observed through the simulated engine's tables.

mod common;

use common::{contract_error, fixture_bridge};
use extbridge::prelude::*;

#[test]
fn end_releases_every_registered_handle_once() {
    let bridge = fixture_bridge();

    for n in [0usize, 1, 3, 17, 64] {
        let before = extbridge_sim::stats();
        let mut scope = bridge.open_scope();
        for i in 0..n {
            match i % 3 {
                0 => {
                    scope.new_string(&format!("s{i}"));
                }
                1 => {
                    scope.new_string_name(&format!("n{i}"));
                }
                _ => {
                    scope.new_packed_int64(&[i as i64]);
                }
            }
        }
        assert_eq!(scope.len(), n);
        scope.end();

        let after = extbridge_sim::stats();
        assert_eq!(after.destroyed - before.destroyed, n, "n = {n}");
        assert_eq!(after.live_strings, 0);
        assert_eq!(after.live_string_names, 0);
        assert_eq!(after.live_arrays, 0);
        assert_eq!(after.double_frees, 0);
    }
}

#[test]
fn second_end_is_rejected() {
    let bridge = fixture_bridge();
    let mut scope = bridge.open_scope();
    scope.new_string("once");
    scope.end();
    let id = scope.id();

    let err = contract_error(|| scope.end());
    assert_eq!(err, ContractError::ScopeAlreadyEnded { scope: id });
    assert_eq!(extbridge_sim::stats().double_frees, 0);
}

#[test]
fn dropping_an_open_scope_releases_it() {
    let bridge = fixture_bridge();
    {
        let scope = bridge.open_scope();
        scope.new_string("dropped");
        scope.new_packed_int64(&[1, 2, 3]);
    }
    let stats = extbridge_sim::stats();
    assert_eq!((stats.live_strings, stats.live_arrays), (0, 0));
}

#[test]
fn transferred_handles_survive_the_scope() {
    let bridge = fixture_bridge();

    let kept = bridge.with_scope(|scope| {
        let temp = scope.new_string("temp");
        let kept = scope.new_string("kept");
        let kept = scope.transfer(kept);
        assert!(scope.contains(temp));
        assert!(!scope.contains(kept));
        assert_eq!(kept.ownership(), Ownership::Transferred);
        // Transferring again only re-marks the handle.
        scope.transfer(kept)
    });

    assert!(extbridge_sim::is_alive(HandleKind::String, kept.payload()));
    assert_eq!(extbridge_sim::stats().live_strings, 1);

    bridge.with_scope(|scope| {
        let adopted = scope.adopt(kept);
        assert_eq!(adopted.ownership(), Ownership::OwnedByCaller);
        assert_eq!(scope.read_string(adopted).unwrap(), "kept");
    });
    assert!(!extbridge_sim::is_alive(HandleKind::String, kept.payload()));
    assert_eq!(extbridge_sim::stats().double_frees, 0);
}

#[test]
fn a_handle_has_one_owner() {
    let bridge = fixture_bridge();
    let first = bridge.open_scope();
    let second = bridge.open_scope();
    let handle = first.new_string("shared");

    let err = contract_error(|| {
        second.register(handle);
    });
    assert!(matches!(err, ContractError::DoubleRegistration { .. }));
    assert!(first.contains(handle));
    assert!(!second.contains(handle));
}

#[test]
fn using_an_ended_scope_is_fatal() {
    let bridge = fixture_bridge();
    let mut scope = bridge.open_scope();
    scope.end();
    let id = scope.id();

    let err = contract_error(|| {
        scope.new_string("late");
    });
    assert_eq!(err, ContractError::ScopeUsedAfterEnd { scope: id });
}

#[test]
fn stale_instances_are_not_present() {
    let bridge = fixture_bridge();
    let api = bridge.api();

    let node = extbridge_sim::new_object("Node");
    let id = node.instance_id(api).unwrap();
    assert_eq!(id.upgrade(api), Some(node));

    extbridge_sim::free_object(node);
    assert_eq!(id.upgrade(api), None);
    assert!(matches!(
        id.try_upgrade(api),
        Err(BridgeError::StaleInstance { id: raw }) if raw == id.to_raw()
    ));
    assert_eq!(ObjectRef::null().instance_id(api), None);
}
