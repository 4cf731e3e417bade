//! Classes, virtuals and methods the simulated engine ships with.
//!
//! The method specs are what generated call sites would contain; the
//! [`METHODS`] table is the engine side of the same methods.

use std::ffi::c_void;

use extbridge_core::{
    Color, DefaultValue, MethodFlags, MethodSignature, MethodSpec, NativeType, ParamInfo,
    VirtualMethodInfo,
};

use crate::engine::{HeapValue, VariantValue, with};

/// An engine class and the virtuals it lets subclasses override.
#[derive(Debug, Clone, Copy)]
pub struct ClassDecl {
    pub name: &'static str,
    pub parent: Option<&'static str>,
    pub virtuals: &'static [VirtualMethodInfo],
}

/// A native method implementation. Its address is the method bind.
pub struct SimMethod {
    pub spec: &'static MethodSpec,
    pub f: unsafe fn(instance: u64, args: &[*const c_void], ret: *mut c_void),
}

// ============================================================================
// Classes
// ============================================================================

const DELTA: &[ParamInfo] = &[ParamInfo::new("delta", NativeType::Float64)];
const CHILD: &[ParamInfo] = &[ParamInfo::new("child", NativeType::Object)];

static NODE_VIRTUALS: [VirtualMethodInfo; 4] = [
    VirtualMethodInfo::new("_ready", MethodSignature::new(&[], None)),
    VirtualMethodInfo::new("_child_added", MethodSignature::new(CHILD, None)),
    VirtualMethodInfo::new("_get_title", MethodSignature::new(&[], Some(NativeType::String)))
        .with_default(DefaultValue::String("untitled")),
    VirtualMethodInfo::new(
        "_get_tint",
        MethodSignature::new(&[], Some(NativeType::Color)),
    )
    .with_default(DefaultValue::Color(Color::WHITE)),
];

static MAIN_LOOP_VIRTUALS: [VirtualMethodInfo; 4] = [
    VirtualMethodInfo::new("_initialize", MethodSignature::new(&[], None)),
    VirtualMethodInfo::new(
        "_physics_process",
        MethodSignature::new(DELTA, Some(NativeType::Bool)),
    ),
    VirtualMethodInfo::new(
        "_process",
        MethodSignature::new(DELTA, Some(NativeType::Bool)),
    ),
    VirtualMethodInfo::new("_finalize", MethodSignature::new(&[], None)),
];

pub static CLASSES: [ClassDecl; 6] = [
    ClassDecl {
        name: "Object",
        parent: None,
        virtuals: &[],
    },
    ClassDecl {
        name: "Node",
        parent: Some("Object"),
        virtuals: &NODE_VIRTUALS,
    },
    ClassDecl {
        name: "Label",
        parent: Some("Node"),
        virtuals: &[],
    },
    ClassDecl {
        name: "MainLoop",
        parent: Some("Object"),
        virtuals: &MAIN_LOOP_VIRTUALS,
    },
    ClassDecl {
        name: "Fixture",
        parent: Some("Object"),
        virtuals: &[],
    },
    ClassDecl {
        name: "Engine",
        parent: Some("Object"),
        virtuals: &[],
    },
];

/// Singleton name and class.
pub static SINGLETONS: [(&str, &str); 1] = [("Engine", "Engine")];

// ============================================================================
// Method specs
// ============================================================================

const TEXT: &[ParamInfo] = &[ParamInfo::new("text", NativeType::String)];

pub static LABEL_SET_TEXT: MethodSpec = MethodSpec::new(
    "Label",
    "set_text",
    0x1001,
    MethodSignature::new(TEXT, None),
);

pub static LABEL_GET_TEXT: MethodSpec = MethodSpec::new(
    "Label",
    "get_text",
    0x1002,
    MethodSignature::new(&[], Some(NativeType::String)),
)
.with_flags(MethodFlags::CONST);

const MIX: &[ParamInfo] = &[
    ParamInfo::new("a", NativeType::Int32),
    ParamInfo::new("b", NativeType::Float32),
    ParamInfo::new("target", NativeType::Object),
];

/// `a * 1000 + round(b * 100) + (target is set)`.
pub static FIXTURE_MIX: MethodSpec = MethodSpec::new(
    "Fixture",
    "mix",
    0x2001,
    MethodSignature::new(MIX, Some(NativeType::Int64)),
);

const GREET: &[ParamInfo] = &[
    ParamInfo::new("name", NativeType::String),
    ParamInfo::new("punctuation", NativeType::String).with_default(DefaultValue::String("!")),
];

/// `"Hello, " + name + punctuation`.
pub static FIXTURE_GREET: MethodSpec = MethodSpec::new(
    "Fixture",
    "greet",
    0x2002,
    MethodSignature::new(GREET, Some(NativeType::String)),
);

const VALUES: &[ParamInfo] = &[ParamInfo::new("values", NativeType::PackedInt64Array)];

pub static FIXTURE_SUM_ARRAY: MethodSpec = MethodSpec::new(
    "Fixture",
    "sum_array",
    0x2003,
    MethodSignature::new(VALUES, Some(NativeType::Int64)),
);

const COUNT: &[ParamInfo] = &[ParamInfo::new("count", NativeType::Int32)];

/// `[0, 1, .., count - 1]`.
pub static FIXTURE_MAKE_ARRAY: MethodSpec = MethodSpec::new(
    "Fixture",
    "make_array",
    0x2004,
    MethodSignature::new(COUNT, Some(NativeType::PackedInt64Array)),
);

const NAME: &[ParamInfo] = &[ParamInfo::new("name", NativeType::StringName)];

pub static FIXTURE_ECHO_NAME: MethodSpec = MethodSpec::new(
    "Fixture",
    "echo_name",
    0x2005,
    MethodSignature::new(NAME, Some(NativeType::StringName)),
);

const SCALE: &[ParamInfo] = &[
    ParamInfo::new("v", NativeType::Vector2),
    ParamInfo::new("factor", NativeType::Float32).with_default(DefaultValue::Float(2.0)),
];

pub static FIXTURE_SCALE: MethodSpec = MethodSpec::new(
    "Fixture",
    "scale",
    0x2006,
    MethodSignature::new(SCALE, Some(NativeType::Vector2)),
);

/// Always the null object.
pub static FIXTURE_GET_PARENT: MethodSpec = MethodSpec::new(
    "Fixture",
    "get_parent",
    0x2007,
    MethodSignature::new(&[], Some(NativeType::Object)),
);

const TRANSFORM: &[ParamInfo] = &[ParamInfo::new("t", NativeType::Transform2D)];

pub static FIXTURE_ORIGIN: MethodSpec = MethodSpec::new(
    "Fixture",
    "origin",
    0x2008,
    MethodSignature::new(TRANSFORM, Some(NativeType::Vector2)),
);

const WEIGH: &[ParamInfo] = &[
    ParamInfo::new("base", NativeType::Int64),
    ParamInfo::new("factor", NativeType::Float64).with_default(DefaultValue::Float(1.5)),
    ParamInfo::new("enabled", NativeType::Bool).with_default(DefaultValue::Bool(true)),
];

/// `base * factor` when enabled, else `0.0`.
pub static FIXTURE_WEIGH: MethodSpec = MethodSpec::new(
    "Fixture",
    "weigh",
    0x2009,
    MethodSignature::new(WEIGH, Some(NativeType::Float64)),
);

pub static FIXTURE_VERSION: MethodSpec = MethodSpec::new(
    "Fixture",
    "version",
    0x200a,
    MethodSignature::new(&[], Some(NativeType::Int64)),
)
.with_flags(MethodFlags::STATIC);

pub static ENGINE_GET_FRAMES_DRAWN: MethodSpec = MethodSpec::new(
    "Engine",
    "get_frames_drawn",
    0x3001,
    MethodSignature::new(&[], Some(NativeType::Int64)),
)
.with_flags(MethodFlags::CONST);

/// `echo_<type>(value) -> value`. Heap values come back as fresh copies.
macro_rules! echo_specs {
    ($($spec:ident $name:literal $hash:literal $ty:ident),* $(,)?) => {
        $(
            pub static $spec: MethodSpec = MethodSpec::new(
                "Fixture",
                $name,
                $hash,
                MethodSignature::new(
                    const { &[ParamInfo::new("value", NativeType::$ty)] },
                    Some(NativeType::$ty),
                ),
            );
        )*
    };
}

echo_specs! {
    ECHO_BOOL "echo_bool" 0x2100 Bool,
    ECHO_I8 "echo_i8" 0x2101 Int8,
    ECHO_I16 "echo_i16" 0x2102 Int16,
    ECHO_I32 "echo_i32" 0x2103 Int32,
    ECHO_I64 "echo_i64" 0x2104 Int64,
    ECHO_U8 "echo_u8" 0x2105 UInt8,
    ECHO_U16 "echo_u16" 0x2106 UInt16,
    ECHO_U32 "echo_u32" 0x2107 UInt32,
    ECHO_U64 "echo_u64" 0x2108 UInt64,
    ECHO_F32 "echo_f32" 0x2109 Float32,
    ECHO_F64 "echo_f64" 0x210a Float64,
    ECHO_VECTOR2 "echo_vector2" 0x210b Vector2,
    ECHO_VECTOR3 "echo_vector3" 0x210c Vector3,
    ECHO_COLOR "echo_color" 0x210d Color,
    ECHO_TRANSFORM2D "echo_transform2d" 0x210e Transform2D,
    ECHO_RID "echo_rid" 0x210f Rid,
    ECHO_OBJECT "echo_object" 0x2110 Object,
    ECHO_STRING "echo_string" 0x2111 String,
    ECHO_STRING_NAME "echo_string_name" 0x2112 StringName,
    ECHO_ARRAY "echo_array" 0x2113 PackedInt64Array,
    ECHO_VARIANT "echo_variant" 0x2114 Variant,
}

/// Every method above, for resolving them all at once.
pub static ALL_METHODS: [&MethodSpec; 34] = [
    &LABEL_SET_TEXT,
    &LABEL_GET_TEXT,
    &FIXTURE_MIX,
    &FIXTURE_GREET,
    &FIXTURE_SUM_ARRAY,
    &FIXTURE_MAKE_ARRAY,
    &FIXTURE_ECHO_NAME,
    &FIXTURE_SCALE,
    &FIXTURE_GET_PARENT,
    &FIXTURE_ORIGIN,
    &FIXTURE_WEIGH,
    &FIXTURE_VERSION,
    &ENGINE_GET_FRAMES_DRAWN,
    &ECHO_BOOL,
    &ECHO_I8,
    &ECHO_I16,
    &ECHO_I32,
    &ECHO_I64,
    &ECHO_U8,
    &ECHO_U16,
    &ECHO_U32,
    &ECHO_U64,
    &ECHO_F32,
    &ECHO_F64,
    &ECHO_VECTOR2,
    &ECHO_VECTOR3,
    &ECHO_COLOR,
    &ECHO_TRANSFORM2D,
    &ECHO_RID,
    &ECHO_OBJECT,
    &ECHO_STRING,
    &ECHO_STRING_NAME,
    &ECHO_ARRAY,
    &ECHO_VARIANT,
];

// ============================================================================
// Native implementations
// ============================================================================

pub static METHODS: [SimMethod; 34] = [
    SimMethod { spec: &LABEL_SET_TEXT, f: label_set_text },
    SimMethod { spec: &LABEL_GET_TEXT, f: label_get_text },
    SimMethod { spec: &FIXTURE_MIX, f: fixture_mix },
    SimMethod { spec: &FIXTURE_GREET, f: fixture_greet },
    SimMethod { spec: &FIXTURE_SUM_ARRAY, f: fixture_sum_array },
    SimMethod { spec: &FIXTURE_MAKE_ARRAY, f: fixture_make_array },
    SimMethod { spec: &FIXTURE_ECHO_NAME, f: echo_string_name },
    SimMethod { spec: &FIXTURE_SCALE, f: fixture_scale },
    SimMethod { spec: &FIXTURE_GET_PARENT, f: fixture_get_parent },
    SimMethod { spec: &FIXTURE_ORIGIN, f: fixture_origin },
    SimMethod { spec: &FIXTURE_WEIGH, f: fixture_weigh },
    SimMethod { spec: &FIXTURE_VERSION, f: fixture_version },
    SimMethod { spec: &ENGINE_GET_FRAMES_DRAWN, f: engine_get_frames_drawn },
    SimMethod { spec: &ECHO_BOOL, f: echo_inline::<1> },
    SimMethod { spec: &ECHO_I8, f: echo_inline::<1> },
    SimMethod { spec: &ECHO_I16, f: echo_inline::<2> },
    SimMethod { spec: &ECHO_I32, f: echo_inline::<4> },
    SimMethod { spec: &ECHO_I64, f: echo_inline::<8> },
    SimMethod { spec: &ECHO_U8, f: echo_inline::<1> },
    SimMethod { spec: &ECHO_U16, f: echo_inline::<2> },
    SimMethod { spec: &ECHO_U32, f: echo_inline::<4> },
    SimMethod { spec: &ECHO_U64, f: echo_inline::<8> },
    SimMethod { spec: &ECHO_F32, f: echo_inline::<4> },
    SimMethod { spec: &ECHO_F64, f: echo_inline::<8> },
    SimMethod { spec: &ECHO_VECTOR2, f: echo_inline::<8> },
    SimMethod { spec: &ECHO_VECTOR3, f: echo_inline::<12> },
    SimMethod { spec: &ECHO_COLOR, f: echo_inline::<16> },
    SimMethod { spec: &ECHO_TRANSFORM2D, f: echo_inline::<24> },
    SimMethod { spec: &ECHO_RID, f: echo_inline::<8> },
    SimMethod { spec: &ECHO_OBJECT, f: echo_inline::<8> },
    SimMethod { spec: &ECHO_STRING, f: echo_string },
    SimMethod { spec: &ECHO_STRING_NAME, f: echo_string_name },
    SimMethod { spec: &ECHO_ARRAY, f: echo_array },
    SimMethod { spec: &ECHO_VARIANT, f: echo_variant },
];

unsafe fn arg<T: Copy>(args: &[*const c_void], index: usize) -> T {
    unsafe { args[index].cast::<T>().read_unaligned() }
}

unsafe fn put<T>(ret: *mut c_void, value: T) {
    unsafe { ret.cast::<T>().write_unaligned(value) }
}

fn new_heap(value: HeapValue) -> u64 {
    with(|engine| engine.alloc_heap(value))
}

fn bytes_of(payload: u64) -> Vec<u8> {
    with(|engine| engine.bytes(payload).map(<[u8]>::to_vec).unwrap_or_default())
}

unsafe fn label_set_text(instance: u64, args: &[*const c_void], _ret: *mut c_void) {
    let text = bytes_of(unsafe { arg::<u64>(args, 0) });
    with(|engine| {
        if let Some(record) = engine.objects.get_mut(&instance) {
            record.text = text;
        }
    });
}

unsafe fn label_get_text(instance: u64, _args: &[*const c_void], ret: *mut c_void) {
    let payload = with(|engine| {
        let text = engine
            .objects
            .get(&instance)
            .map(|record| record.text.clone())
            .unwrap_or_default();
        engine.alloc_heap(HeapValue::String(text))
    });
    unsafe { put(ret, payload) };
}

unsafe fn fixture_mix(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let (a, b, target) = unsafe { (arg::<i32>(args, 0), arg::<f32>(args, 1), arg::<u64>(args, 2)) };
    let value = i64::from(a) * 1000 + (b * 100.0).round() as i64 + i64::from(target != 0);
    unsafe { put(ret, value) };
}

unsafe fn fixture_greet(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let mut text = b"Hello, ".to_vec();
    text.extend(bytes_of(unsafe { arg::<u64>(args, 0) }));
    text.extend(bytes_of(unsafe { arg::<u64>(args, 1) }));
    unsafe { put(ret, new_heap(HeapValue::String(text))) };
}

unsafe fn fixture_sum_array(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let payload = unsafe { arg::<u64>(args, 0) };
    let sum: i64 = with(|engine| engine.ints(payload).map_or(0, |values| values.iter().sum()));
    unsafe { put(ret, sum) };
}

unsafe fn fixture_make_array(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let count = unsafe { arg::<i32>(args, 0) }.max(0);
    let values = (0..i64::from(count)).collect();
    unsafe { put(ret, new_heap(HeapValue::Ints(values))) };
}

unsafe fn fixture_scale(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let (v, factor) = unsafe { (arg::<[f32; 2]>(args, 0), arg::<f32>(args, 1)) };
    unsafe { put(ret, [v[0] * factor, v[1] * factor]) };
}

unsafe fn fixture_get_parent(_instance: u64, _args: &[*const c_void], ret: *mut c_void) {
    unsafe { put(ret, 0u64) };
}

unsafe fn fixture_origin(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let t = unsafe { arg::<[f32; 6]>(args, 0) };
    unsafe { put(ret, [t[4], t[5]]) };
}

unsafe fn fixture_weigh(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let (base, factor, enabled) =
        unsafe { (arg::<i64>(args, 0), arg::<f64>(args, 1), arg::<u8>(args, 2)) };
    let value = if enabled != 0 { base as f64 * factor } else { 0.0 };
    unsafe { put(ret, value) };
}

unsafe fn fixture_version(_instance: u64, _args: &[*const c_void], ret: *mut c_void) {
    unsafe { put(ret, 43i64) };
}

unsafe fn engine_get_frames_drawn(_instance: u64, _args: &[*const c_void], ret: *mut c_void) {
    let frames = crate::stats().ptrcalls as i64;
    unsafe { put(ret, frames) };
}

unsafe fn echo_inline<const N: usize>(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    unsafe { put(ret, arg::<[u8; N]>(args, 0)) };
}

unsafe fn echo_string(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let bytes = bytes_of(unsafe { arg::<u64>(args, 0) });
    unsafe { put(ret, new_heap(HeapValue::String(bytes))) };
}

unsafe fn echo_string_name(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let bytes = bytes_of(unsafe { arg::<u64>(args, 0) });
    unsafe { put(ret, new_heap(HeapValue::StringName(bytes))) };
}

unsafe fn echo_array(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let payload = unsafe { arg::<u64>(args, 0) };
    let values = with(|engine| engine.ints(payload).map(<[i64]>::to_vec).unwrap_or_default());
    unsafe { put(ret, new_heap(HeapValue::Ints(values))) };
}

unsafe fn echo_variant(_instance: u64, args: &[*const c_void], ret: *mut c_void) {
    let payload = unsafe { arg::<u64>(args, 0) };
    let copy = with(|engine| match engine.heap.get(&payload) {
        Some(value @ HeapValue::Variant(_)) => value.clone(),
        _ => HeapValue::Variant(VariantValue::nil()),
    });
    unsafe { put(ret, new_heap(copy)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_has_an_implementation() {
        assert_eq!(ALL_METHODS.len(), METHODS.len());
        for spec in ALL_METHODS {
            assert!(
                METHODS.iter().any(|m| std::ptr::eq(m.spec, spec)),
                "{} has no implementation",
                spec.name
            );
        }
    }

    #[test]
    fn hashes_are_unique() {
        let mut hashes: Vec<i64> = ALL_METHODS.iter().map(|spec| spec.hash).collect();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), ALL_METHODS.len());
    }

    #[test]
    fn classes_have_declared_parents() {
        for class in &CLASSES {
            if let Some(parent) = class.parent {
                assert!(CLASSES.iter().any(|c| c.name == parent), "{parent} missing");
            }
        }
    }
}
