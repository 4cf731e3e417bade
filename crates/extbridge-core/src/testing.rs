//! A minimal per-thread fake engine for this crate's unit tests.

use std::cell::RefCell;
use std::ffi::c_void;

use rustc_hash::FxHashMap;

use crate::api::{ApiVersion, ClassCreationInfo, ClassMethodInfo, NativeApi, PropertyInfo, StrRef};
use crate::handle::{Ownership, StringHandle};

const INSTANCE_ID_OFFSET: u64 = 1000;

enum Value {
    Bytes(Vec<u8>),
    Ints(Vec<i64>),
    Object,
    /// Tag and the first word of the slot; one-word inline types only.
    Variant(u32, [u8; 24]),
}

#[derive(Default)]
struct Fake {
    next: u64,
    values: FxHashMap<u64, Value>,
    destroyed: usize,
    double_frees: usize,
}

impl Fake {
    fn alloc(&mut self, value: Value) -> u64 {
        self.next += 1;
        self.values.insert(self.next, value);
        self.next
    }

    fn destroy(&mut self, payload: u64) {
        if self.values.remove(&payload).is_some() {
            self.destroyed += 1;
        } else {
            self.double_frees += 1;
        }
    }
}

thread_local! {
    static FAKE: RefCell<Fake> = RefCell::new(Fake::default());
}

/// A method the fake `ptrcall` can run. Used as the method bind pointer.
pub struct TestMethod {
    pub arity: usize,
    pub f: fn(instance: u64, args: &[*const c_void], ret: *mut c_void),
}

pub fn api() -> NativeApi {
    NativeApi {
        version: ApiVersion::new(4, 3, 0),
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
        string_new_with_utf8_chars_and_len: new_bytes,
        string_to_utf8_chars: read_bytes,
        string_name_new_with_utf8_chars_and_len: new_bytes,
        string_name_to_utf8_chars: read_bytes,
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

pub fn destroyed_count() -> usize {
    FAKE.with(|f| f.borrow().destroyed)
}

pub fn double_frees() -> usize {
    FAKE.with(|f| f.borrow().double_frees)
}

pub fn is_alive(payload: u64) -> bool {
    FAKE.with(|f| f.borrow().values.contains_key(&payload))
}

pub fn new_object() -> u64 {
    FAKE.with(|f| f.borrow_mut().alloc(Value::Object))
}

/// A borrowed string holding arbitrary bytes.
pub fn raw_string(bytes: &[u8]) -> StringHandle {
    let payload = FAKE.with(|f| f.borrow_mut().alloc(Value::Bytes(bytes.to_vec())));
    StringHandle::encode(payload, Ownership::Borrowed)
}

unsafe extern "C" fn classdb_construct_object(class: StrRef) -> u64 {
    match unsafe { class.as_str() } {
        Some("Object") => new_object(),
        _ => 0,
    }
}

unsafe extern "C" fn classdb_get_method_bind(_: StrRef, _: StrRef, _: i64) -> *const c_void {
    std::ptr::null()
}

unsafe extern "C" fn classdb_register_extension_class(
    _: *mut c_void,
    _: StrRef,
    _: StrRef,
    _: *const ClassCreationInfo,
) {
}

unsafe extern "C" fn classdb_register_extension_class_method(
    _: *mut c_void,
    _: StrRef,
    _: *const ClassMethodInfo,
) {
}

unsafe extern "C" fn classdb_register_extension_class_property(
    _: *mut c_void,
    _: StrRef,
    _: *const PropertyInfo,
    _: StrRef,
    _: StrRef,
) {
}

unsafe extern "C" fn object_method_bind_ptrcall(
    bind: *const c_void,
    instance: u64,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    let method = unsafe { &*bind.cast::<TestMethod>() };
    let args = if method.arity == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(args, method.arity) }
    };
    (method.f)(instance, args, ret);
}

unsafe extern "C" fn object_destroy(instance: u64) {
    FAKE.with(|f| f.borrow_mut().destroy(instance));
}

unsafe extern "C" fn object_get_instance_id(instance: u64) -> u64 {
    instance + INSTANCE_ID_OFFSET
}

unsafe extern "C" fn object_get_instance_from_id(id: u64) -> u64 {
    let instance = id.saturating_sub(INSTANCE_ID_OFFSET);
    if is_alive(instance) { instance } else { 0 }
}

unsafe extern "C" fn object_set_instance(_: u64, _: StrRef, _: *mut c_void) {}

unsafe extern "C" fn global_get_singleton(_: StrRef) -> u64 {
    0
}

unsafe extern "C" fn new_bytes(dst: *mut u64, chars: *const u8, len: i64) {
    let bytes = if len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(chars, len as usize) }.to_vec()
    };
    let payload = FAKE.with(|f| f.borrow_mut().alloc(Value::Bytes(bytes)));
    unsafe { *dst = payload };
}

unsafe extern "C" fn read_bytes(src: *const u64, buf: *mut u8, cap: i64) -> i64 {
    let payload = unsafe { *src };
    FAKE.with(|f| match f.borrow().values.get(&payload) {
        Some(Value::Bytes(bytes)) => {
            let n = bytes.len().min(cap.max(0) as usize);
            if n > 0 {
                unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, n) };
            }
            bytes.len() as i64
        }
        _ => 0,
    })
}

unsafe extern "C" fn packed_int64_array_new(dst: *mut u64, data: *const i64, len: i64) {
    let values = if len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec()
    };
    let payload = FAKE.with(|f| f.borrow_mut().alloc(Value::Ints(values)));
    unsafe { *dst = payload };
}

unsafe extern "C" fn packed_int64_array_size(src: *const u64) -> i64 {
    let payload = unsafe { *src };
    FAKE.with(|f| match f.borrow().values.get(&payload) {
        Some(Value::Ints(values)) => values.len() as i64,
        _ => 0,
    })
}

unsafe extern "C" fn packed_int64_array_operator_index(src: *const u64, index: i64) -> *const i64 {
    let payload = unsafe { *src };
    FAKE.with(|f| match f.borrow().values.get(&payload) {
        Some(Value::Ints(values)) => values
            .get(index as usize)
            .map_or(std::ptr::null(), |v| v as *const i64),
        _ => std::ptr::null(),
    })
}

unsafe extern "C" fn variant_new_nil(dst: *mut u64) {
    let payload = FAKE.with(|f| f.borrow_mut().alloc(Value::Variant(0, [0; 24])));
    unsafe { *dst = payload };
}

unsafe extern "C" fn variant_new_from_type(ty: u32, dst: *mut u64, src: *const c_void) {
    let mut bytes = [0u8; 24];
    unsafe { std::ptr::copy_nonoverlapping(src.cast::<u8>(), bytes.as_mut_ptr(), 8) };
    let payload = FAKE.with(|f| f.borrow_mut().alloc(Value::Variant(ty, bytes)));
    unsafe { *dst = payload };
}

unsafe extern "C" fn variant_to_type(ty: u32, dst: *mut c_void, src: *const u64) -> bool {
    let payload = unsafe { *src };
    FAKE.with(|f| match f.borrow().values.get(&payload) {
        Some(Value::Variant(tag, bytes)) if *tag == ty => {
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), 8) };
            true
        }
        _ => false,
    })
}

unsafe extern "C" fn variant_get_type(src: *const u64) -> u32 {
    let payload = unsafe { *src };
    FAKE.with(|f| match f.borrow().values.get(&payload) {
        Some(Value::Variant(tag, _)) => *tag,
        _ => 0,
    })
}

unsafe extern "C" fn handle_destroy(_kind: u32, handle: *mut u64) {
    let payload = unsafe { *handle };
    FAKE.with(|f| f.borrow_mut().destroy(payload));
}
