//! End-to-end scenarios: values crossing the boundary in both directions.

mod common;

use std::ffi::c_void;
use std::ptr;
use std::sync::{Arc, Mutex};

use common::{fixture_bridge, fixture_bridge_with};
use extbridge::prelude::*;
use extbridge::{ClassKind, FromSlot, IntoSlot, StringHandle};
use extbridge_sim::fixtures;

/// A string created in a scope and handed out through a return slot outlives
/// the scope that created it.
#[test]
fn transferred_string_outlives_its_scope() {
    let bridge = fixture_bridge();
    let mut slot = [0u8; 8];

    let mut scope = bridge.open_scope();
    let hello = scope.new_string("hello");
    scope.transfer(hello).write_slot(&mut slot);
    scope.end();

    assert!(extbridge_sim::is_alive(HandleKind::String, hello.payload()));
    let received = StringHandle::read_slot(&slot, Ownership::Transferred);
    assert_eq!(received, hello);

    bridge.with_scope(|scope| {
        let owned = scope.adopt(received);
        assert_eq!(scope.read_string(owned).unwrap(), "hello");
    });
    assert_eq!(extbridge_sim::stats().live_strings, 0);
}

/// A three-argument call lays out statically sized slots and decodes the
/// engine's answer.
#[test]
fn mixed_argument_call() {
    let bridge = fixture_bridge();
    let mix = bridge.bind(&fixtures::FIXTURE_MIX);

    let layout = mix.layout();
    assert_eq!(layout.arg_count(), 3);
    assert_eq!((layout.width(0), layout.width(1), layout.width(2)), (4, 4, 8));
    assert_eq!(layout.offset(0) % 4, 0);
    assert_eq!(layout.offset(2) % 8, 0);
    assert_eq!(layout.ret_slot().map(|(_, width)| width), Some(8));

    bridge.with_scope(|scope| {
        let fixture = bridge.construct(scope, "Fixture");
        let target = bridge.construct(scope, "Label");

        let mut frame = mix.frame();
        frame.push(&7i32).push(&1.25f32).push(&target);
        assert_eq!(frame.pushed(), 3);
        assert_eq!(frame.arg_slot(0), 7i32.to_ne_bytes());
        assert_eq!(frame.arg_slot(1), 1.25f32.to_ne_bytes());
        assert_eq!(frame.arg_slot(2), target.payload().to_ne_bytes());

        mix.invoke_frame(scope, fixture, &mut frame);
        let value: i64 = frame.extract(scope);
        assert_eq!(value, 7126);

        // Same call through the typed path, with the null object.
        let value: i64 = mix.call(scope, fixture, (7i32, 1.25f32, None::<ObjectRef>));
        assert_eq!(value, 7125);
    });

    let stats = extbridge_sim::stats();
    assert_eq!(stats.double_frees, 0);
    assert_eq!(stats.live_objects, 1); // the Engine singleton
}

struct Runner {
    deltas: Arc<Mutex<Vec<f64>>>,
}

/// A registered override is routed to host code for every call, while the
/// class's other virtuals answer with their defaults.
#[test]
fn subclass_override_routes_to_host() {
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&deltas);
    let bridge = fixture_bridge_with(BridgeConfig::new(), move |builder| {
        builder
            .register_class("Runner", "MainLoop", move |_| Runner {
                deltas: Arc::clone(&seen),
            })
            .override_virtual("_process", |runner: &mut Runner, delta: f64| -> bool {
                runner.deltas.lock().unwrap().push(delta);
                delta >= 1.0
            })
            .build()
    });
    assert_eq!(bridge.classes().get("Runner").map(|c| c.kind()), Some(ClassKind::Extension));

    let runner = extbridge_sim::new_object("Runner");
    assert!(extbridge_sim::has_host_instance(runner.payload()));

    let process = |method: &str, delta: f64| -> Option<u8> {
        let args = [(&raw const delta).cast::<c_void>()];
        let mut ret = 0xffu8;
        let called = unsafe {
            extbridge_sim::call_virtual(runner.payload(), method, &args, (&raw mut ret).cast())
        };
        called.then_some(ret)
    };

    assert_eq!(process("_process", 0.25), Some(0));
    assert_eq!(process("_process", 2.0), Some(1));
    assert_eq!(*deltas.lock().unwrap(), [0.25, 2.0]);

    // Not overridden: default `false`, host code untouched.
    assert_eq!(process("_physics_process", 5.0), Some(0));
    assert_eq!(deltas.lock().unwrap().len(), 2);

    extbridge_sim::free_object(runner);
    assert!(!extbridge_sim::has_host_instance(runner.payload()));
}

struct Panel {
    title: String,
}

#[test]
fn heap_and_inline_virtual_returns() {
    let bridge = fixture_bridge_with(BridgeConfig::new(), |builder| {
        builder
            .register_class("Panel", "Node", |_| Panel {
                title: "Inventory".to_string(),
            })
            .override_virtual("_get_title", |panel: &mut Panel| panel.title.clone())
            .build()?;
        builder.register_class("Blank", "Node", |_| Panel { title: String::new() }).build()
    });
    assert_eq!(bridge.virtuals().entries_for("Blank").count(), 4);

    let panel = extbridge_sim::new_object("Panel");
    let blank = extbridge_sim::new_object("Blank");

    let title = |object: ObjectRef| -> Option<String> {
        let mut ret = 0u64;
        let called = unsafe {
            extbridge_sim::call_virtual(object.payload(), "_get_title", &[], (&raw mut ret).cast())
        };
        assert!(called);
        extbridge_sim::string_value(ret)
    };
    assert_eq!(title(panel).as_deref(), Some("Inventory"));
    assert_eq!(title(blank).as_deref(), Some("untitled"));

    let mut tint = [0u8; 16];
    let called = unsafe {
        extbridge_sim::call_virtual(blank.payload(), "_get_tint", &[], tint.as_mut_ptr().cast())
    };
    assert!(called);
    assert_eq!(Color::read_slot(&tint, Ownership::Borrowed), Color::WHITE);

    // Void virtual with a borrowed object argument.
    let child = extbridge_sim::new_object("Label");
    let arg = child.payload();
    let called = unsafe {
        extbridge_sim::call_virtual(
            panel.payload(),
            "_child_added",
            &[(&raw const arg).cast()],
            ptr::null_mut(),
        )
    };
    assert!(called);
    assert!(extbridge_sim::is_alive(HandleKind::Object, child.payload()));
}
