//! Outbound calls: argument conversion, defaults, return decoding and the
//! contract checks on each.

mod common;

use common::{contract_error, fixture_bridge};
use extbridge::prelude::*;
use extbridge::{
    NativeType, PackedInt64Handle, Rid, StringHandle, StringNameHandle, Variant, VariantHandle,
    VariantType,
};
use extbridge_sim::fixtures;

fn echo<T: ToNative + ReturnValue>(bridge: &Bridge, spec: &MethodSpec, value: T) -> T {
    let fixture = extbridge_sim::new_object("Fixture");
    bridge.with_scope(|scope| bridge.bind(spec).call(scope, fixture, (value,)))
}

#[test]
fn primitives_round_trip_bit_for_bit() {
    let bridge = fixture_bridge();

    assert!(echo(bridge, &fixtures::ECHO_BOOL, true));
    assert!(!echo(bridge, &fixtures::ECHO_BOOL, false));
    assert_eq!(echo(bridge, &fixtures::ECHO_I8, i8::MIN), i8::MIN);
    assert_eq!(echo(bridge, &fixtures::ECHO_I16, -12_345i16), -12_345);
    assert_eq!(echo(bridge, &fixtures::ECHO_I32, i32::MAX), i32::MAX);
    assert_eq!(echo(bridge, &fixtures::ECHO_I64, i64::MIN + 7), i64::MIN + 7);
    assert_eq!(echo(bridge, &fixtures::ECHO_U8, 0xa5u8), 0xa5);
    assert_eq!(echo(bridge, &fixtures::ECHO_U16, u16::MAX), u16::MAX);
    assert_eq!(echo(bridge, &fixtures::ECHO_U32, 0xdead_beefu32), 0xdead_beef);
    assert_eq!(echo(bridge, &fixtures::ECHO_U64, u64::MAX - 1), u64::MAX - 1);

    for bits in [0x8000_0000u32, 0x7fc0_1234, 0x3fa0_0000, 0x0000_0001] {
        let v = f32::from_bits(bits);
        assert_eq!(echo(bridge, &fixtures::ECHO_F32, v).to_bits(), bits);
    }
    for bits in [0x8000_0000_0000_0000u64, 0x7ff8_0000_dead_beef, 0x4009_21fb_5444_2d18] {
        let v = f64::from_bits(bits);
        assert_eq!(echo(bridge, &fixtures::ECHO_F64, v).to_bits(), bits);
    }
}

#[test]
fn math_types_round_trip() {
    let bridge = fixture_bridge();

    let v2 = Vector2::new(1.5, -0.0);
    let out = echo(bridge, &fixtures::ECHO_VECTOR2, v2);
    assert_eq!((out.x.to_bits(), out.y.to_bits()), (v2.x.to_bits(), v2.y.to_bits()));

    let v3 = Vector3::new(-3.25, 1e-30, f32::MAX);
    assert_eq!(echo(bridge, &fixtures::ECHO_VECTOR3, v3), v3);

    let color = Color::rgba(0.1, 0.2, 0.3, 0.4);
    assert_eq!(echo(bridge, &fixtures::ECHO_COLOR, color), color);

    let t = Transform2D {
        x: Vector2::new(0.0, 1.0),
        y: Vector2::new(-1.0, 0.0),
        origin: Vector2::new(10.0, 20.0),
    };
    assert_eq!(echo(bridge, &fixtures::ECHO_TRANSFORM2D, t), t);
}

#[test]
fn borrowed_handles_round_trip() {
    let bridge = fixture_bridge();

    let rid = Rid::encode(0x00ab_cdef_0123, Ownership::Borrowed);
    let out = echo(bridge, &fixtures::ECHO_RID, rid);
    assert_eq!(out.payload(), rid.payload());
    assert_eq!(out.ownership(), Ownership::Borrowed);

    let label = extbridge_sim::new_object("Label");
    let out = echo(bridge, &fixtures::ECHO_OBJECT, label);
    assert_eq!(out, label);
    assert_eq!(out.ownership(), Ownership::Borrowed);
    assert!(extbridge_sim::is_alive(HandleKind::Object, label.payload()));

    let none: Option<ObjectRef> = echo(bridge, &fixtures::ECHO_OBJECT, None);
    assert_eq!(none, None);
}

#[test]
fn heap_values_round_trip_and_are_released() {
    let bridge = fixture_bridge();
    let fixture = extbridge_sim::new_object("Fixture");

    bridge.with_scope(|scope| {
        let text = "héllo, wörld";
        let out: StringHandle = bridge.bind(&fixtures::ECHO_STRING).call(scope, fixture, (text,));
        assert_eq!(out.ownership(), Ownership::OwnedByCaller);
        assert!(scope.contains(out));
        assert_eq!(scope.read_string(out).unwrap(), text);

        let name = scope.new_string_name("_process");
        let out: StringNameHandle =
            bridge.bind(&fixtures::ECHO_STRING_NAME).call(scope, fixture, (name,));
        assert_ne!(out, name);
        assert_eq!(scope.read_string_name(out).unwrap(), "_process");

        let values = vec![i64::MIN, -1, 0, 1, i64::MAX];
        let out: PackedInt64Handle =
            bridge.bind(&fixtures::ECHO_ARRAY).call(scope, fixture, (values.as_slice(),));
        assert_eq!(scope.read_packed_int64(out), values);

        let empty: PackedInt64Handle =
            bridge.bind(&fixtures::ECHO_ARRAY).call(scope, fixture, (Vec::<i64>::new(),));
        assert!(scope.read_packed_int64(empty).is_empty());
    });

    let stats = extbridge_sim::stats();
    assert_eq!(stats.live_strings, 0);
    assert_eq!(stats.live_string_names, 0);
    assert_eq!(stats.live_arrays, 0);
    assert_eq!(stats.double_frees, 0);
}

#[test]
fn variants_round_trip_and_are_released() {
    let bridge = fixture_bridge();
    let fixture = extbridge_sim::new_object("Fixture");
    let label = extbridge_sim::new_object("Label");
    let echo_variant = bridge.bind(&fixtures::ECHO_VARIANT);

    bridge.with_scope(|scope| {
        let values = [
            Variant::Nil,
            Variant::Bool(true),
            Variant::Int(-42),
            Variant::Float(0.125),
            Variant::from("grüße"),
            Variant::StringName("_ready".into()),
            Variant::Vector3(Vector3::new(1.0, -2.0, 3.5)),
            Variant::Color(Color::rgba(0.1, 0.2, 0.3, 1.0)),
            Variant::Object(label),
            Variant::PackedInt64Array(vec![3, 1, 4]),
        ];
        for value in values {
            let out: VariantHandle = echo_variant.call(scope, fixture, (&value,));
            assert!(scope.contains(out));
            assert_eq!(
                extbridge_sim::variant_type(out.payload()),
                Some(value.variant_type())
            );
            assert_eq!(scope.read_variant(out).unwrap(), value);
        }
    });

    let stats = extbridge_sim::stats();
    assert_eq!(stats.live_variants, 0);
    assert_eq!(stats.live_strings, 0);
    assert_eq!(stats.live_string_names, 0);
    assert_eq!(stats.live_arrays, 0);
    assert_eq!(stats.double_frees, 0);
    assert!(extbridge_sim::is_alive(HandleKind::Object, label.payload()));
    assert_eq!(VariantType::Object.native(), Some(NativeType::Object));
}

#[test]
fn trailing_parameters_use_defaults() {
    let bridge = fixture_bridge();
    let fixture = extbridge_sim::new_object("Fixture");

    bridge.with_scope(|scope| {
        let greet = bridge.bind(&fixtures::FIXTURE_GREET);
        let out: StringHandle = greet.call(scope, fixture, ("World",));
        assert_eq!(scope.read_string(out).unwrap(), "Hello, World!");
        let out: StringHandle = greet.call(scope, fixture, ("World", "?"));
        assert_eq!(scope.read_string(out).unwrap(), "Hello, World?");

        let weigh = bridge.bind(&fixtures::FIXTURE_WEIGH);
        let full: f64 = weigh.call(scope, fixture, (10i64,));
        assert_eq!(full, 15.0);
        let halved: f64 = weigh.call(scope, fixture, (10i64, 0.5f64));
        assert_eq!(halved, 5.0);
        let off: f64 = weigh.call(scope, fixture, (10i64, 2.0f64, false));
        assert_eq!(off, 0.0);

        let scaled: Vector2 = bridge
            .bind(&fixtures::FIXTURE_SCALE)
            .call(scope, fixture, (Vector2::new(1.0, -2.0),));
        assert_eq!(scaled, Vector2::new(2.0, -4.0));
    });
    assert_eq!(extbridge_sim::stats().live_strings, 0);
}

#[test]
fn static_and_null_returns() {
    let bridge = fixture_bridge();
    let fixture = extbridge_sim::new_object("Fixture");

    bridge.with_scope(|scope| {
        let version: i64 = bridge.bind(&fixtures::FIXTURE_VERSION).call_static(scope, ());
        assert_eq!(version, 43);

        let parent: Option<ObjectRef> =
            bridge.bind(&fixtures::FIXTURE_GET_PARENT).call(scope, fixture, ());
        assert_eq!(parent, None);

        let origin: Vector2 = bridge.bind(&fixtures::FIXTURE_ORIGIN).call(
            scope,
            fixture,
            (Transform2D::from_translation(Vector2::new(3.0, 4.0)),),
        );
        assert_eq!(origin, Vector2::new(3.0, 4.0));

        let counts: PackedInt64Handle =
            bridge.bind(&fixtures::FIXTURE_MAKE_ARRAY).call(scope, fixture, (4i32,));
        let total: i64 = bridge
            .bind(&fixtures::FIXTURE_SUM_ARRAY)
            .call(scope, fixture, (counts,));
        assert_eq!(total, 6);
    });
}

#[test]
fn singleton_methods() {
    let bridge = fixture_bridge();
    bridge.with_scope(|scope| {
        let engine = bridge.singleton(scope, "Engine");
        let frames: i64 = bridge
            .method("Engine", "get_frames_drawn")
            .call(scope, engine, ());
        assert!(frames >= 1);
    });
}

#[test]
fn argument_contracts_are_enforced() {
    let bridge = fixture_bridge();
    let fixture = extbridge_sim::new_object("Fixture");
    let echo_i32 = bridge.bind(&fixtures::ECHO_I32);

    let err = contract_error(|| {
        bridge.with_scope(|scope| {
            let _: i32 = echo_i32.call(scope, fixture, (1i64,));
        })
    });
    assert_eq!(
        err,
        ContractError::ArgumentTypeMismatch {
            method: "Fixture::echo_i32".into(),
            index: 0,
            expected: NativeType::Int32,
            actual: NativeType::Int64,
        }
    );

    let err = contract_error(|| {
        bridge.with_scope(|scope| {
            let _: i64 = echo_i32.call(scope, fixture, (1i32,));
        })
    });
    assert_eq!(
        err,
        ContractError::ReturnTypeMismatch {
            method: "Fixture::echo_i32".into(),
            expected: Some(NativeType::Int32),
            actual: Some(NativeType::Int64),
        }
    );

    let err = contract_error(|| {
        bridge.with_scope(|scope| {
            let _: i64 = bridge.bind(&fixtures::FIXTURE_VERSION).call_static(scope, (1i32,));
        })
    });
    assert_eq!(
        err,
        ContractError::TooManyArguments {
            method: "Fixture::version".into(),
            declared: 0,
        }
    );

    let err = contract_error(|| {
        bridge.with_scope(|scope| {
            let _: i64 = bridge.bind(&fixtures::FIXTURE_MIX).call(scope, fixture, (1i32,));
        })
    });
    assert_eq!(
        err,
        ContractError::MissingArgument {
            method: "Fixture::mix".into(),
            index: 1,
        }
    );

    let err = contract_error(|| {
        bridge.method("Fixture", "explode");
    });
    assert_eq!(
        err,
        ContractError::UnknownMethod {
            class: "Fixture".into(),
            method: "explode".into(),
        }
    );

    // Nothing leaked on the way out of the failed calls.
    assert_eq!(extbridge_sim::stats().live_strings, 0);
}
