//! Engine state and the C ABI functions that expose it.
//!
//! State is per thread, so every test gets its own engine. None of the ABI
//! functions hold the state borrowed while calling back into the bridge: a
//! bridge callback is free to call back into the engine.

use std::cell::RefCell;
use std::ffi::c_void;

use rustc_hash::FxHashMap;

use extbridge_core::api::CallMethodFn;
use extbridge_core::{
    ApiVersion, ClassCreationInfo, ClassMethodInfo, HandleKind, NativeApi, NativeType, PassBy,
    PropertyInfo, SlotLayout, StrRef, VariantType,
};

use crate::fixtures::{self, SimMethod};

pub const API_VERSION: ApiVersion = ApiVersion::new(4, 3, 0);

const FIRST_OBJECT: u64 = 0x1_0000;
const OBJECT_STRIDE: u64 = 0x10;
const FIRST_HEAP: u64 = 0x100_0000;
const HEAP_STRIDE: u64 = 0x8;

#[derive(Clone)]
pub(crate) enum HeapValue {
    String(Vec<u8>),
    StringName(Vec<u8>),
    Ints(Vec<i64>),
    Variant(VariantValue),
}

impl HeapValue {
    fn kind(&self) -> HandleKind {
        match self {
            HeapValue::String(_) => HandleKind::String,
            HeapValue::StringName(_) => HandleKind::StringName,
            HeapValue::Ints(_) => HandleKind::PackedInt64Array,
            HeapValue::Variant(_) => HandleKind::Variant,
        }
    }
}

/// What a variant holds: inline bytes, or its own copy of a heap value.
#[derive(Clone)]
pub(crate) struct VariantValue {
    tag: u32,
    inline: [u8; 24],
    heap: Option<Box<HeapValue>>,
}

impl VariantValue {
    pub(crate) fn nil() -> Self {
        VariantValue {
            tag: u32::from(VariantType::Nil),
            inline: [0; 24],
            heap: None,
        }
    }
}

/// An extension method as the engine stores it.
#[derive(Clone)]
struct ExtMethod {
    userdata: *mut c_void,
    call: CallMethodFn,
    params: Vec<NativeType>,
    ret: Option<NativeType>,
}

struct ExtProperty {
    ty: NativeType,
    getter: String,
    setter: Option<String>,
}

#[derive(Clone)]
pub(crate) struct HostBinding {
    pub(crate) class: String,
    pub(crate) ptr: *mut c_void,
}

pub(crate) struct ObjectRecord {
    pub(crate) class: String,
    pub(crate) instance_id: u64,
    pub(crate) host: Option<HostBinding>,
    pub(crate) text: Vec<u8>,
}

#[derive(Default)]
struct ClassRecord {
    parent: Option<String>,
    extension: Option<ClassCreationInfo>,
    methods: FxHashMap<String, ExtMethod>,
    properties: FxHashMap<String, ExtProperty>,
}

/// Counters describing what the engine has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub live_objects: usize,
    pub live_strings: usize,
    pub live_string_names: usize,
    pub live_arrays: usize,
    pub live_variants: usize,
    /// Successful destructions of objects and heap values.
    pub destroyed: usize,
    /// Destructions of something that was already gone.
    pub double_frees: usize,
    pub ptrcalls: usize,
    pub virtual_calls: usize,
    pub method_calls: usize,
}

pub(crate) struct Engine {
    next_object: u64,
    next_instance_id: u64,
    next_heap: u64,
    pub(crate) objects: FxHashMap<u64, ObjectRecord>,
    ids: FxHashMap<u64, u64>,
    pub(crate) heap: FxHashMap<u64, HeapValue>,
    classes: FxHashMap<String, ClassRecord>,
    singletons: FxHashMap<String, u64>,
    virtual_cache: FxHashMap<(String, String), usize>,
    destroyed: usize,
    double_frees: usize,
    ptrcalls: usize,
    virtual_calls: usize,
    method_calls: usize,
}

impl Engine {
    fn new() -> Self {
        let mut engine = Engine {
            next_object: FIRST_OBJECT,
            next_instance_id: 1,
            next_heap: FIRST_HEAP,
            objects: FxHashMap::default(),
            ids: FxHashMap::default(),
            heap: FxHashMap::default(),
            classes: FxHashMap::default(),
            singletons: FxHashMap::default(),
            virtual_cache: FxHashMap::default(),
            destroyed: 0,
            double_frees: 0,
            ptrcalls: 0,
            virtual_calls: 0,
            method_calls: 0,
        };
        for class in &fixtures::CLASSES {
            engine.classes.insert(
                class.name.to_string(),
                ClassRecord {
                    parent: class.parent.map(str::to_string),
                    ..ClassRecord::default()
                },
            );
        }
        for &(name, class) in &fixtures::SINGLETONS {
            let object = engine.alloc_object(class);
            engine.singletons.insert(name.to_string(), object);
        }
        engine
    }

    /// `class` followed by its ancestors.
    fn ancestry(&self, class: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let Some(record) = self.classes.get(&name) else {
                break;
            };
            current = record.parent.clone();
            chain.push(name);
        }
        chain
    }

    pub(crate) fn alloc_object(&mut self, class: &str) -> u64 {
        let object = self.next_object;
        self.next_object += OBJECT_STRIDE;
        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;
        self.objects.insert(
            object,
            ObjectRecord {
                class: class.to_string(),
                instance_id,
                host: None,
                text: Vec::new(),
            },
        );
        self.ids.insert(instance_id, object);
        object
    }

    pub(crate) fn alloc_heap(&mut self, value: HeapValue) -> u64 {
        let payload = self.next_heap;
        self.next_heap += HEAP_STRIDE;
        self.heap.insert(payload, value);
        payload
    }

    /// Bytes of a string or string name.
    pub(crate) fn bytes(&self, payload: u64) -> Option<&[u8]> {
        match self.heap.get(&payload)? {
            HeapValue::String(bytes) | HeapValue::StringName(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub(crate) fn ints(&self, payload: u64) -> Option<&[i64]> {
        match self.heap.get(&payload)? {
            HeapValue::Ints(values) => Some(values),
            _ => None,
        }
    }

    fn remove_object(&mut self, object: u64) -> Option<ObjectRecord> {
        match self.objects.remove(&object) {
            Some(record) => {
                self.ids.remove(&record.instance_id);
                self.singletons.retain(|_, o| *o != object);
                self.destroyed += 1;
                Some(record)
            }
            None => {
                tracing::warn!(object = format_args!("{object:#x}"), "object destroyed twice");
                self.double_frees += 1;
                None
            }
        }
    }

    fn release_heap(&mut self, kind: Option<HandleKind>, payload: u64) {
        match self.heap.get(&payload) {
            Some(value) if Some(value.kind()) == kind => {
                self.heap.remove(&payload);
                self.destroyed += 1;
            }
            _ => {
                tracing::warn!(?kind, payload = format_args!("{payload:#x}"), "bad heap release");
                self.double_frees += 1;
            }
        }
    }

    fn extension_info(&self, class: &str) -> Option<ClassCreationInfo> {
        self.classes.get(class)?.extension
    }

    /// The nearest extension method `name` visible from `class`.
    fn find_method(&self, class: &str, name: &str) -> Option<ExtMethod> {
        self.ancestry(class)
            .iter()
            .find_map(|owner| self.classes.get(owner)?.methods.get(name).cloned())
    }

    /// Getter and setter names of the nearest property `name` visible from `class`.
    fn find_property(&self, class: &str, name: &str) -> Option<(String, Option<String>)> {
        self.ancestry(class).iter().find_map(|owner| {
            let property = self.classes.get(owner)?.properties.get(name)?;
            Some((property.getter.clone(), property.setter.clone()))
        })
    }

    fn stats(&self) -> Stats {
        let mut stats = Stats {
            live_objects: self.objects.len(),
            destroyed: self.destroyed,
            double_frees: self.double_frees,
            ptrcalls: self.ptrcalls,
            virtual_calls: self.virtual_calls,
            method_calls: self.method_calls,
            ..Stats::default()
        };
        for value in self.heap.values() {
            match value {
                HeapValue::String(_) => stats.live_strings += 1,
                HeapValue::StringName(_) => stats.live_string_names += 1,
                HeapValue::Ints(_) => stats.live_arrays += 1,
                HeapValue::Variant(_) => stats.live_variants += 1,
            }
        }
        stats
    }
}

thread_local! {
    static ENGINE: RefCell<Engine> = RefCell::new(Engine::new());
}

pub(crate) fn with<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    ENGINE.with(|engine| f(&mut engine.borrow_mut()))
}

// ============================================================================
// Test-facing helpers
// ============================================================================

/// Reset this thread's engine and return its function table.
pub fn install() -> NativeApi {
    with(|engine| *engine = Engine::new());
    api()
}

/// This thread's function table, without resetting state.
pub fn api() -> NativeApi {
    NativeApi {
        version: API_VERSION,
        classdb_construct_object,
        classdb_get_method_bind,
        classdb_register_extension_class,
        classdb_register_extension_class_method,
        classdb_register_extension_class_property,
        object_method_bind_ptrcall,
        object_destroy,
        object_get_instance_id,
        object_get_instance_from_id,
        object_set_instance,
        global_get_singleton,
        string_new_with_utf8_chars_and_len,
        string_to_utf8_chars,
        string_name_new_with_utf8_chars_and_len,
        string_name_to_utf8_chars,
        packed_int64_array_new,
        packed_int64_array_size,
        packed_int64_array_operator_index,
        variant_new_nil,
        variant_new_from_type,
        variant_to_type,
        variant_get_type,
        handle_destroy,
    }
}

pub fn stats() -> Stats {
    with(|engine| engine.stats())
}

/// Whether a native value still exists.
pub fn is_alive(kind: HandleKind, payload: u64) -> bool {
    with(|engine| match kind {
        HandleKind::Object => engine.objects.contains_key(&payload),
        HandleKind::Rid => true,
        kind => engine
            .heap
            .get(&payload)
            .is_some_and(|value| value.kind() == kind),
    })
}

/// Contents of a string or string name.
pub fn string_value(payload: u64) -> Option<String> {
    with(|engine| {
        engine
            .bytes(payload)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    })
}

pub fn array_value(payload: u64) -> Option<Vec<i64>> {
    with(|engine| engine.ints(payload).map(<[i64]>::to_vec))
}

/// Create a string holding arbitrary, possibly invalid, UTF-8.
pub fn raw_string(bytes: &[u8]) -> u64 {
    with(|engine| engine.alloc_heap(HeapValue::String(bytes.to_vec())))
}

/// The class an object reports, which is its extension class once bound.
pub fn object_class(object: u64) -> Option<String> {
    with(|engine| engine.objects.get(&object).map(|record| record.class.clone()))
}

/// Text last set on a label through `set_text`.
pub fn label_text(object: u64) -> Option<String> {
    with(|engine| {
        engine
            .objects
            .get(&object)
            .map(|record| String::from_utf8_lossy(&record.text).into_owned())
    })
}

/// Whether the object carries a host instance.
pub fn has_host_instance(object: u64) -> bool {
    with(|engine| {
        engine
            .objects
            .get(&object)
            .is_some_and(|record| record.host.is_some())
    })
}

/// Whether an extension class was registered under `class`.
pub fn is_extension_class(class: &str) -> bool {
    with(|engine| engine.extension_info(class).is_some())
}

/// Whether `class` or an ancestor exposes a host method `name`.
pub fn has_method(class: &str, name: &str) -> bool {
    with(|engine| engine.find_method(class, name).is_some())
}

/// The declared type of property `name` on `class` itself.
pub fn property_type(class: &str, name: &str) -> Option<NativeType> {
    with(|engine| Some(engine.classes.get(class)?.properties.get(name)?.ty))
}

/// Call exposed method `name` on `object` the way script code would.
///
/// Returns `false` when the object has no extension instance or no such
/// method.
///
/// # Safety
///
/// `args` must point to slots matching the method's parameters and `ret` to a
/// slot for its return type, or be null for void methods.
pub unsafe fn call_method(
    object: u64,
    name: &str,
    args: &[*const c_void],
    ret: *mut c_void,
) -> bool {
    let target = with(|engine| {
        let host = engine.objects.get(&object)?.host.clone()?;
        let method = engine.find_method(&host.class, name)?;
        Some((host, method))
    });
    let Some((host, method)) = target else {
        return false;
    };
    if args.len() != method.params.len() {
        tracing::warn!(name, expected = method.params.len(), got = args.len(), "method arity mismatch");
        return false;
    }
    if method.ret.is_some() && ret.is_null() {
        tracing::warn!(name, "method returns a value but no slot was given");
        return false;
    }
    with(|engine| engine.method_calls += 1);
    unsafe { (method.call)(method.userdata, host.ptr, args.as_ptr(), ret) };
    true
}

/// Read property `name` through its getter into `ret`.
///
/// # Safety
///
/// `ret` must point to a slot for the property's type.
pub unsafe fn get_property(object: u64, name: &str, ret: *mut c_void) -> bool {
    let Some((getter, _)) = accessors(object, name) else {
        return false;
    };
    unsafe { call_method(object, &getter, &[], ret) }
}

/// Write property `name` through its setter. `false` for read-only properties.
///
/// # Safety
///
/// `value` must point to a slot for the property's type.
pub unsafe fn set_property(object: u64, name: &str, value: *const c_void) -> bool {
    let Some((_, Some(setter))) = accessors(object, name) else {
        return false;
    };
    unsafe { call_method(object, &setter, &[value], std::ptr::null_mut()) }
}

fn accessors(object: u64, name: &str) -> Option<(String, Option<String>)> {
    with(|engine| {
        let class = engine.objects.get(&object)?.class.clone();
        engine.find_property(&class, name)
    })
}

/// The type tag of a variant.
pub fn variant_type(payload: u64) -> Option<VariantType> {
    with(|engine| match engine.heap.get(&payload)? {
        HeapValue::Variant(value) => VariantType::try_from(value.tag).ok(),
        _ => None,
    })
}

/// Invoke virtual `name` on `object` the way the engine does.
///
/// Returns `false` when the object has no extension instance or its class
/// has no host entry for `name`; the engine would then run its own behavior.
///
/// # Safety
///
/// `args` must point to slots matching the virtual's parameters and `ret` to a
/// slot for its return type, or be null for void virtuals.
pub unsafe fn call_virtual(
    object: u64,
    name: &str,
    args: &[*const c_void],
    ret: *mut c_void,
) -> bool {
    let target = with(|engine| {
        let host = engine.objects.get(&object)?.host.clone()?;
        let info = engine.extension_info(&host.class)?;
        Some((host, info))
    });
    let Some((host, info)) = target else {
        return false;
    };

    let key = (host.class.clone(), name.to_string());
    let data = match with(|engine| engine.virtual_cache.get(&key).copied()) {
        Some(data) => data as *mut c_void,
        None => {
            let Some(get_virtual) = info.get_virtual_call_data else {
                return false;
            };
            let data = unsafe { get_virtual(info.class_userdata, StrRef::new(name)) };
            with(|engine| engine.virtual_cache.insert(key, data as usize));
            data
        }
    };
    if data.is_null() {
        return false;
    }
    let Some(call) = info.call_virtual_with_data else {
        return false;
    };

    with(|engine| engine.virtual_calls += 1);
    unsafe { call(host.ptr, StrRef::new(name), data, args.as_ptr(), ret) };
    true
}

// ============================================================================
// ABI functions
// ============================================================================

unsafe fn read_name(name: StrRef) -> String {
    unsafe { name.as_str() }.unwrap_or_default().to_string()
}

unsafe fn copy_slice<T: Copy>(data: *const T, len: i64) -> Vec<T> {
    if len <= 0 || data.is_null() {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec()
}

unsafe extern "C" fn classdb_construct_object(class: StrRef) -> u64 {
    let class = unsafe { read_name(class) };
    match with(|engine| engine.classes.get(&class).map(|record| record.extension)) {
        None => {
            tracing::debug!(%class, "construct: unknown class");
            0
        }
        Some(None) => with(|engine| engine.alloc_object(&class)),
        Some(Some(info)) if info.is_abstract => 0,
        Some(Some(info)) => match info.create_instance {
            Some(create) => unsafe { create(info.class_userdata) },
            None => 0,
        },
    }
}

unsafe extern "C" fn classdb_get_method_bind(
    class: StrRef,
    method: StrRef,
    hash: i64,
) -> *const c_void {
    let (class, method) = unsafe { (read_name(class), read_name(method)) };
    for owner in with(|engine| engine.ancestry(&class)) {
        let found = fixtures::METHODS
            .iter()
            .find(|m| m.spec.class == owner && m.spec.name == method);
        if let Some(bind) = found {
            if bind.spec.hash != hash {
                tracing::debug!(%class, %method, hash, expected = bind.spec.hash, "hash mismatch");
                return std::ptr::null();
            }
            return (bind as *const SimMethod).cast();
        }
    }
    std::ptr::null()
}

unsafe extern "C" fn classdb_register_extension_class(
    _library: *mut c_void,
    class: StrRef,
    parent: StrRef,
    info: *const ClassCreationInfo,
) {
    let (class, parent) = unsafe { (read_name(class), read_name(parent)) };
    let info = unsafe { *info };
    with(|engine| {
        if !engine.classes.contains_key(&parent) {
            tracing::warn!(%class, %parent, "extension class has unknown parent");
            return;
        }
        if engine.classes.contains_key(&class) {
            tracing::warn!(%class, "extension class registered twice");
            return;
        }
        engine.classes.insert(
            class,
            ClassRecord {
                parent: Some(parent),
                extension: Some(info),
                ..ClassRecord::default()
            },
        );
    });
}

unsafe extern "C" fn classdb_register_extension_class_method(
    _library: *mut c_void,
    class: StrRef,
    info: *const ClassMethodInfo,
) {
    let class = unsafe { read_name(class) };
    let info = unsafe { *info };
    let name = unsafe { read_name(info.name) };
    let Some(call) = info.call else {
        tracing::warn!(%class, %name, "method registered without a call function");
        return;
    };
    let params = unsafe { copy_slice(info.argument_types, i64::from(info.argument_count)) };
    let method = ExtMethod {
        userdata: info.method_userdata,
        call,
        params,
        ret: info.has_return_value.then_some(info.return_type),
    };
    with(|engine| {
        let Some(record) = engine.classes.get_mut(&class) else {
            tracing::warn!(%class, %name, "method registered on unknown class");
            return;
        };
        if record.extension.is_none() {
            tracing::warn!(%class, %name, "method registered on an engine class");
            return;
        }
        if record.methods.contains_key(&name) {
            tracing::warn!(%class, %name, "method registered twice");
            return;
        }
        record.methods.insert(name, method);
    });
}

unsafe extern "C" fn classdb_register_extension_class_property(
    _library: *mut c_void,
    class: StrRef,
    info: *const PropertyInfo,
    getter: StrRef,
    setter: StrRef,
) {
    let class = unsafe { read_name(class) };
    let info = unsafe { *info };
    let name = unsafe { read_name(info.name) };
    let (getter, setter) = unsafe { (read_name(getter), read_name(setter)) };
    with(|engine| {
        // The engine only accepts accessors it can already call.
        let getter_ok = engine
            .find_method(&class, &getter)
            .is_some_and(|m| m.params.is_empty() && m.ret == Some(info.ty));
        let setter_ok = setter.is_empty()
            || engine
                .find_method(&class, &setter)
                .is_some_and(|m| m.params == [info.ty] && m.ret.is_none());
        if !getter_ok || !setter_ok {
            tracing::warn!(%class, %name, %getter, %setter, "property accessors do not match");
            return;
        }
        let Some(record) = engine.classes.get_mut(&class) else {
            return;
        };
        record.properties.insert(
            name,
            ExtProperty {
                ty: info.ty,
                getter,
                setter: (!setter.is_empty()).then_some(setter),
            },
        );
    });
}

unsafe extern "C" fn object_method_bind_ptrcall(
    bind: *const c_void,
    instance: u64,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    let method = unsafe { &*bind.cast::<SimMethod>() };
    let arity = method.spec.signature.params.len();
    let args = if arity == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(args, arity) }
    };
    with(|engine| engine.ptrcalls += 1);
    unsafe { (method.f)(instance, args, ret) };
}

unsafe extern "C" fn object_destroy(instance: u64) {
    let Some(record) = with(|engine| engine.remove_object(instance)) else {
        return;
    };
    if let Some(host) = record.host {
        let info = with(|engine| engine.extension_info(&host.class));
        if let Some(ClassCreationInfo {
            free_instance: Some(free),
            class_userdata,
            ..
        }) = info
        {
            unsafe { free(class_userdata, host.ptr) };
        }
    }
}

unsafe extern "C" fn object_get_instance_id(instance: u64) -> u64 {
    with(|engine| {
        engine
            .objects
            .get(&instance)
            .map_or(0, |record| record.instance_id)
    })
}

unsafe extern "C" fn object_get_instance_from_id(id: u64) -> u64 {
    with(|engine| engine.ids.get(&id).copied().unwrap_or(0))
}

unsafe extern "C" fn object_set_instance(instance: u64, class: StrRef, host: *mut c_void) {
    let class = unsafe { read_name(class) };
    with(|engine| match engine.objects.get_mut(&instance) {
        Some(record) => {
            record.class = class.clone();
            record.host = Some(HostBinding { class, ptr: host });
        }
        None => tracing::warn!(%class, "set_instance on unknown object"),
    });
}

unsafe extern "C" fn global_get_singleton(name: StrRef) -> u64 {
    let name = unsafe { read_name(name) };
    with(|engine| engine.singletons.get(&name).copied().unwrap_or(0))
}

unsafe extern "C" fn string_new_with_utf8_chars_and_len(dst: *mut u64, chars: *const u8, len: i64) {
    let bytes = unsafe { copy_slice(chars, len) };
    let payload = with(|engine| engine.alloc_heap(HeapValue::String(bytes)));
    unsafe { dst.write(payload) };
}

unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    dst: *mut u64,
    chars: *const u8,
    len: i64,
) {
    let bytes = unsafe { copy_slice(chars, len) };
    let payload = with(|engine| engine.alloc_heap(HeapValue::StringName(bytes)));
    unsafe { dst.write(payload) };
}

unsafe fn read_bytes(src: *const u64, buf: *mut u8, cap: i64, kind: HandleKind) -> i64 {
    let payload = unsafe { src.read() };
    with(|engine| {
        let bytes = match engine.heap.get(&payload) {
            Some(value) if value.kind() == kind => engine.bytes(payload).unwrap_or_default(),
            _ => return 0,
        };
        let n = bytes.len().min(cap.max(0) as usize);
        if n > 0 && !buf.is_null() {
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, n) };
        }
        bytes.len() as i64
    })
}

unsafe extern "C" fn string_to_utf8_chars(src: *const u64, buf: *mut u8, cap: i64) -> i64 {
    unsafe { read_bytes(src, buf, cap, HandleKind::String) }
}

unsafe extern "C" fn string_name_to_utf8_chars(src: *const u64, buf: *mut u8, cap: i64) -> i64 {
    unsafe { read_bytes(src, buf, cap, HandleKind::StringName) }
}

unsafe extern "C" fn packed_int64_array_new(dst: *mut u64, data: *const i64, len: i64) {
    let values = unsafe { copy_slice(data, len) };
    let payload = with(|engine| engine.alloc_heap(HeapValue::Ints(values)));
    unsafe { dst.write(payload) };
}

unsafe extern "C" fn packed_int64_array_size(src: *const u64) -> i64 {
    let payload = unsafe { src.read() };
    with(|engine| engine.ints(payload).map_or(0, |values| values.len() as i64))
}

unsafe extern "C" fn packed_int64_array_operator_index(src: *const u64, index: i64) -> *const i64 {
    let payload = unsafe { src.read() };
    with(|engine| {
        let Some(values) = engine.ints(payload) else {
            return std::ptr::null();
        };
        usize::try_from(index)
            .ok()
            .and_then(|index| values.get(index))
            .map_or(std::ptr::null(), |value| value as *const i64)
    })
}

unsafe extern "C" fn variant_new_nil(dst: *mut u64) {
    let payload = with(|engine| engine.alloc_heap(HeapValue::Variant(VariantValue::nil())));
    unsafe { dst.write(payload) };
}

unsafe extern "C" fn variant_new_from_type(ty: u32, dst: *mut u64, src: *const c_void) {
    let mut value = VariantValue {
        tag: ty,
        ..VariantValue::nil()
    };
    let native = VariantType::try_from(ty).ok().and_then(VariantType::native);
    let payload = with(|engine| {
        match native.map(NativeType::layout) {
            Some(SlotLayout {
                pass: PassBy::Handle(kind),
                ..
            }) if kind != HandleKind::Object => {
                // Heap values are copied, never shared.
                let inner = unsafe { src.cast::<u64>().read_unaligned() };
                match engine.heap.get(&inner) {
                    Some(heap) => value.heap = Some(Box::new(heap.clone())),
                    None => tracing::warn!(ty, "variant built from a dead heap value"),
                }
            }
            Some(layout) => unsafe {
                std::ptr::copy_nonoverlapping(
                    src.cast::<u8>(),
                    value.inline.as_mut_ptr(),
                    layout.size,
                )
            },
            None => tracing::debug!(ty, "variant of a type the simulator does not model"),
        }
        engine.alloc_heap(HeapValue::Variant(value))
    });
    unsafe { dst.write(payload) };
}

unsafe extern "C" fn variant_to_type(ty: u32, dst: *mut c_void, src: *const u64) -> bool {
    let payload = unsafe { src.read() };
    let Some(native) = VariantType::try_from(ty).ok().and_then(VariantType::native) else {
        return false;
    };
    with(|engine| {
        let value = match engine.heap.get(&payload) {
            Some(HeapValue::Variant(value)) if value.tag == ty => value.clone(),
            _ => return false,
        };
        match value.heap {
            Some(heap) => {
                let copy = engine.alloc_heap(*heap);
                unsafe { dst.cast::<u64>().write_unaligned(copy) };
            }
            None => unsafe {
                std::ptr::copy_nonoverlapping(
                    value.inline.as_ptr(),
                    dst.cast::<u8>(),
                    native.layout().size,
                )
            },
        }
        true
    })
}

unsafe extern "C" fn variant_get_type(src: *const u64) -> u32 {
    let payload = unsafe { src.read() };
    with(|engine| match engine.heap.get(&payload) {
        Some(HeapValue::Variant(value)) => value.tag,
        _ => 0,
    })
}

unsafe extern "C" fn handle_destroy(kind: u32, handle: *mut u64) {
    let payload = unsafe { handle.read() };
    let kind = u8::try_from(kind)
        .ok()
        .and_then(|tag| HandleKind::try_from(tag).ok());
    with(|engine| engine.release_heap(kind, payload));
}
