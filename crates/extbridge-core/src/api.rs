//! The engine's C ABI surface.
//!
//! [`NativeApi`] is a plain table of `extern "C"` function pointers handed to
//! the bridge by the engine at load time. The bridge never defines these
//! functions; it only calls them. Each raw pointer has a thin safe wrapper
//! below so the rest of the crate never writes `unsafe` for a plain engine call.
//!
//! Opaque heap values (strings, string names, packed arrays, variants) are 8
//! bytes on the engine side. Functions that create or read them take a pointer to that
//! 8-byte word, which is exactly a handle payload.

use std::ffi::{c_char, c_void};
use std::fmt;

use crate::error::BridgeError;
use crate::handle::HandleKind;
use crate::signature::NativeType;
use crate::variant::VariantType;

/// A borrowed UTF-8 string view passed across the ABI.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct StrRef {
    pub ptr: *const u8,
    pub len: usize,
}

impl StrRef {
    #[inline]
    pub fn new(s: &str) -> Self {
        StrRef {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// View the bytes as a string.
    ///
    /// Returns `None` if the bytes are not UTF-8.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` initialized bytes that stay alive and
    /// unchanged for `'a`.
    pub unsafe fn as_str<'a>(self) -> Option<&'a str> {
        if self.len == 0 {
            return Some("");
        }
        // SAFETY: the caller guarantees `ptr..ptr+len` is a live allocation.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        std::str::from_utf8(bytes).ok()
    }
}

/// Engine API version reported at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Same major version and at least the given minor version.
    pub fn satisfies(&self, required: ApiVersion) -> bool {
        self.major == required.major && (self.minor, self.patch) >= (required.minor, required.patch)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ============================================================================
// Callback signatures the bridge hands to the engine
// ============================================================================

pub type CreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> u64;
pub type FreeInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void, instance: *mut c_void);
pub type GetVirtualCallDataFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: StrRef) -> *mut c_void;
pub type CallVirtualWithDataFn = unsafe extern "C" fn(
    instance: *mut c_void,
    name: StrRef,
    call_data: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
);

/// Describes an extension class to the engine.
///
/// `instance` in the callbacks is the host pointer previously passed to
/// `object_set_instance`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ClassCreationInfo {
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_exposed: bool,
    pub class_userdata: *mut c_void,
    pub create_instance: Option<CreateInstanceFn>,
    pub free_instance: Option<FreeInstanceFn>,
    pub get_virtual_call_data: Option<GetVirtualCallDataFn>,
    pub call_virtual_with_data: Option<CallVirtualWithDataFn>,
}

/// Called by the engine when script or editor code calls an exposed method.
///
/// `instance` is the host pointer bound to the object; `args` and `ret` are
/// laid out as for a ptrcall of the method's declared types.
pub type CallMethodFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
);

/// Describes one host method exposed on an extension class.
///
/// `return_type` is meaningful only when `has_return_value` is set.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ClassMethodInfo {
    pub name: StrRef,
    pub method_userdata: *mut c_void,
    pub call: Option<CallMethodFn>,
    pub flags: u32,
    pub argument_count: u32,
    pub argument_types: *const NativeType,
    pub has_return_value: bool,
    pub return_type: NativeType,
}

/// Describes a property backed by a getter and an optional setter.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PropertyInfo {
    pub name: StrRef,
    pub ty: NativeType,
}

/// Signature of the loader's symbol lookup.
pub type GetProcAddressFn =
    unsafe extern "C" fn(name: *const c_char) -> Option<unsafe extern "C" fn()>;

// ============================================================================
// Native API table
// ============================================================================

/// Function table exported by the engine.
///
/// A table is trusted once it exists: every safe wrapper assumes the function
/// pointers behave as the engine documents them.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct NativeApi {
    pub version: ApiVersion,
    pub classdb_construct_object: unsafe extern "C" fn(class: StrRef) -> u64,
    pub classdb_get_method_bind:
        unsafe extern "C" fn(class: StrRef, method: StrRef, hash: i64) -> *const c_void,
    pub classdb_register_extension_class: unsafe extern "C" fn(
        library: *mut c_void,
        class: StrRef,
        parent: StrRef,
        info: *const ClassCreationInfo,
    ),
    pub classdb_register_extension_class_method:
        unsafe extern "C" fn(library: *mut c_void, class: StrRef, info: *const ClassMethodInfo),
    pub classdb_register_extension_class_property: unsafe extern "C" fn(
        library: *mut c_void,
        class: StrRef,
        info: *const PropertyInfo,
        getter: StrRef,
        setter: StrRef,
    ),
    pub object_method_bind_ptrcall: unsafe extern "C" fn(
        bind: *const c_void,
        instance: u64,
        args: *const *const c_void,
        ret: *mut c_void,
    ),
    pub object_destroy: unsafe extern "C" fn(instance: u64),
    pub object_get_instance_id: unsafe extern "C" fn(instance: u64) -> u64,
    pub object_get_instance_from_id: unsafe extern "C" fn(id: u64) -> u64,
    pub object_set_instance: unsafe extern "C" fn(instance: u64, class: StrRef, host: *mut c_void),
    pub global_get_singleton: unsafe extern "C" fn(name: StrRef) -> u64,
    pub string_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(dst: *mut u64, chars: *const u8, len: i64),
    pub string_to_utf8_chars: unsafe extern "C" fn(src: *const u64, buf: *mut u8, cap: i64) -> i64,
    pub string_name_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(dst: *mut u64, chars: *const u8, len: i64),
    pub string_name_to_utf8_chars:
        unsafe extern "C" fn(src: *const u64, buf: *mut u8, cap: i64) -> i64,
    pub packed_int64_array_new: unsafe extern "C" fn(dst: *mut u64, data: *const i64, len: i64),
    pub packed_int64_array_size: unsafe extern "C" fn(src: *const u64) -> i64,
    pub packed_int64_array_operator_index:
        unsafe extern "C" fn(src: *const u64, index: i64) -> *const i64,
    pub variant_new_nil: unsafe extern "C" fn(dst: *mut u64),
    pub variant_new_from_type: unsafe extern "C" fn(ty: u32, dst: *mut u64, src: *const c_void),
    pub variant_to_type: unsafe extern "C" fn(ty: u32, dst: *mut c_void, src: *const u64) -> bool,
    pub variant_get_type: unsafe extern "C" fn(src: *const u64) -> u32,
    pub handle_destroy: unsafe extern "C" fn(kind: u32, handle: *mut u64),
}

macro_rules! load_fn {
    ($get:ident, $name:ident) => {{
        let symbol = concat!(stringify!($name), "\0");
        // SAFETY: `symbol` is NUL-terminated; the loader contract is that a
        // returned pointer has the signature documented for that name.
        match unsafe { $get(symbol.as_ptr().cast::<c_char>()) } {
            Some(f) => unsafe { std::mem::transmute::<unsafe extern "C" fn(), _>(f) },
            None => return Err(BridgeError::MissingApiFunction(stringify!($name))),
        }
    }};
}

impl NativeApi {
    /// Resolve every function through the engine's symbol lookup.
    ///
    /// # Safety
    ///
    /// `get_proc_address` must return, for each name, a function with the
    /// signature the corresponding field declares.
    pub unsafe fn load(
        get_proc_address: GetProcAddressFn,
        version: ApiVersion,
    ) -> Result<Self, BridgeError> {
        let get = get_proc_address;
        let api = NativeApi {
            version,
            classdb_construct_object: load_fn!(get, classdb_construct_object),
            classdb_get_method_bind: load_fn!(get, classdb_get_method_bind),
            classdb_register_extension_class: load_fn!(get, classdb_register_extension_class),
            classdb_register_extension_class_method: load_fn!(
                get,
                classdb_register_extension_class_method
            ),
            classdb_register_extension_class_property: load_fn!(
                get,
                classdb_register_extension_class_property
            ),
            object_method_bind_ptrcall: load_fn!(get, object_method_bind_ptrcall),
            object_destroy: load_fn!(get, object_destroy),
            object_get_instance_id: load_fn!(get, object_get_instance_id),
            object_get_instance_from_id: load_fn!(get, object_get_instance_from_id),
            object_set_instance: load_fn!(get, object_set_instance),
            global_get_singleton: load_fn!(get, global_get_singleton),
            string_new_with_utf8_chars_and_len: load_fn!(get, string_new_with_utf8_chars_and_len),
            string_to_utf8_chars: load_fn!(get, string_to_utf8_chars),
            string_name_new_with_utf8_chars_and_len: load_fn!(
                get,
                string_name_new_with_utf8_chars_and_len
            ),
            string_name_to_utf8_chars: load_fn!(get, string_name_to_utf8_chars),
            packed_int64_array_new: load_fn!(get, packed_int64_array_new),
            packed_int64_array_size: load_fn!(get, packed_int64_array_size),
            packed_int64_array_operator_index: load_fn!(get, packed_int64_array_operator_index),
            variant_new_nil: load_fn!(get, variant_new_nil),
            variant_new_from_type: load_fn!(get, variant_new_from_type),
            variant_to_type: load_fn!(get, variant_to_type),
            variant_get_type: load_fn!(get, variant_get_type),
            handle_destroy: load_fn!(get, handle_destroy),
        };
        tracing::debug!(version = %api.version, "native API loaded");
        Ok(api)
    }

    // ------------------------------------------------------------------------
    // ClassDB
    // ------------------------------------------------------------------------

    /// Allocate a new instance of a class. Returns 0 for unknown classes.
    pub fn construct_object(&self, class: &str) -> u64 {
        // SAFETY: `class` outlives the call.
        unsafe { (self.classdb_construct_object)(StrRef::new(class)) }
    }

    /// Look up a method bind. Returns null when the engine has no such method.
    pub fn method_bind(&self, class: &str, method: &str, hash: i64) -> *const c_void {
        // SAFETY: both strings outlive the call.
        unsafe { (self.classdb_get_method_bind)(StrRef::new(class), StrRef::new(method), hash) }
    }

    /// Tell the engine an extension class exists.
    ///
    /// # Safety
    ///
    /// The callbacks and `class_userdata` in `info` must remain valid for as
    /// long as the engine may invoke them.
    pub unsafe fn register_extension_class(
        &self,
        library: *mut c_void,
        class: &str,
        parent: &str,
        info: &ClassCreationInfo,
    ) {
        // SAFETY: the names and `info` outlive the call; the engine copies them.
        unsafe {
            (self.classdb_register_extension_class)(
                library,
                StrRef::new(class),
                StrRef::new(parent),
                info,
            )
        }
    }

    /// Expose a host method on an extension class.
    ///
    /// # Safety
    ///
    /// `info.call` and `info.method_userdata` must remain valid for as long as
    /// the engine may invoke them, and `info.argument_types` must point to
    /// `info.argument_count` types for the duration of the call.
    pub unsafe fn register_extension_method(
        &self,
        library: *mut c_void,
        class: &str,
        info: &ClassMethodInfo,
    ) {
        // SAFETY: `class` and `info` outlive the call; the engine copies them.
        unsafe { (self.classdb_register_extension_class_method)(library, StrRef::new(class), info) }
    }

    /// Expose a property backed by already registered methods. An empty
    /// `setter` makes it read-only.
    pub fn register_extension_property(
        &self,
        library: *mut c_void,
        class: &str,
        info: &PropertyInfo,
        getter: &str,
        setter: &str,
    ) {
        // SAFETY: all names and `info` outlive the call; the engine copies them.
        unsafe {
            (self.classdb_register_extension_class_property)(
                library,
                StrRef::new(class),
                info,
                StrRef::new(getter),
                StrRef::new(setter),
            )
        }
    }

    /// Invoke a bound method.
    ///
    /// # Safety
    ///
    /// `args` must hold one pointer per declared parameter, each pointing to a
    /// slot laid out for that parameter's type, and `ret` must point to a slot
    /// laid out for the return type (or be null for void methods).
    #[inline]
    pub unsafe fn ptrcall(
        &self,
        bind: *const c_void,
        instance: u64,
        args: *const *const c_void,
        ret: *mut c_void,
    ) {
        unsafe { (self.object_method_bind_ptrcall)(bind, instance, args, ret) }
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    pub fn destroy_object(&self, instance: u64) {
        // SAFETY: the engine ignores or reports unknown instances.
        unsafe { (self.object_destroy)(instance) }
    }

    pub fn instance_id(&self, instance: u64) -> u64 {
        // SAFETY: plain value call.
        unsafe { (self.object_get_instance_id)(instance) }
    }

    /// The object behind an instance ID, or 0 if it no longer exists.
    pub fn instance_from_id(&self, id: u64) -> u64 {
        // SAFETY: plain value call.
        unsafe { (self.object_get_instance_from_id)(id) }
    }

    /// Bind a host pointer to an engine object.
    ///
    /// # Safety
    ///
    /// `host` must stay valid until the engine calls `free_instance` for it.
    pub unsafe fn set_instance(&self, instance: u64, class: &str, host: *mut c_void) {
        unsafe { (self.object_set_instance)(instance, StrRef::new(class), host) }
    }

    /// Returns 0 when the engine has no singleton by that name.
    pub fn singleton(&self, name: &str) -> u64 {
        // SAFETY: `name` outlives the call.
        unsafe { (self.global_get_singleton)(StrRef::new(name)) }
    }

    // ------------------------------------------------------------------------
    // Builtin heap values
    // ------------------------------------------------------------------------

    /// Create a native string and return its payload.
    pub fn new_string(&self, s: &str) -> u64 {
        let mut dst = 0u64;
        // SAFETY: `dst` is a writable 8-byte word and `s` outlives the call.
        unsafe { (self.string_new_with_utf8_chars_and_len)(&mut dst, s.as_ptr(), s.len() as i64) };
        dst
    }

    /// Copy out a native string's UTF-8 bytes.
    pub fn string_bytes(&self, payload: u64) -> Vec<u8> {
        read_utf8(self.string_to_utf8_chars, payload)
    }

    pub fn new_string_name(&self, s: &str) -> u64 {
        let mut dst = 0u64;
        // SAFETY: as in `new_string`.
        unsafe {
            (self.string_name_new_with_utf8_chars_and_len)(&mut dst, s.as_ptr(), s.len() as i64)
        };
        dst
    }

    pub fn string_name_bytes(&self, payload: u64) -> Vec<u8> {
        read_utf8(self.string_name_to_utf8_chars, payload)
    }

    pub fn new_packed_int64(&self, values: &[i64]) -> u64 {
        let mut dst = 0u64;
        // SAFETY: `values` is a live slice for the duration of the call.
        unsafe { (self.packed_int64_array_new)(&mut dst, values.as_ptr(), values.len() as i64) };
        dst
    }

    pub fn packed_int64_len(&self, payload: u64) -> usize {
        // SAFETY: `payload` is read through a stack copy.
        let len = unsafe { (self.packed_int64_array_size)(&payload) };
        len.max(0) as usize
    }

    /// Element at `index`, or `None` when out of bounds.
    pub fn packed_int64_get(&self, payload: u64, index: usize) -> Option<i64> {
        // SAFETY: the engine returns null for out-of-range indices, otherwise a
        // pointer valid until the array is mutated.
        unsafe {
            let ptr = (self.packed_int64_array_operator_index)(&payload, index as i64);
            ptr.as_ref().copied()
        }
    }

    /// Create an empty variant.
    pub fn new_variant_nil(&self) -> u64 {
        let mut dst = 0u64;
        // SAFETY: `dst` is a writable 8-byte word.
        unsafe { (self.variant_new_nil)(&mut dst) };
        dst
    }

    /// Create a variant holding a copy of the value in `src`.
    ///
    /// # Safety
    ///
    /// `src` must point to a slot laid out for `ty.native()`.
    pub unsafe fn new_variant_from(&self, ty: VariantType, src: *const c_void) -> u64 {
        let mut dst = 0u64;
        unsafe { (self.variant_new_from_type)(u32::from(ty), &mut dst, src) };
        dst
    }

    /// The raw type tag of a variant.
    pub fn variant_type(&self, payload: u64) -> u32 {
        // SAFETY: `payload` is read through a stack copy.
        unsafe { (self.variant_get_type)(&payload) }
    }

    /// Copy a variant's value out into `dst`. Heap values are copied into new
    /// values the caller owns. Returns `false` if the variant does not hold a
    /// `ty`.
    ///
    /// # Safety
    ///
    /// `dst` must point to a writable slot laid out for `ty.native()`.
    pub unsafe fn variant_to(&self, ty: VariantType, payload: u64, dst: *mut c_void) -> bool {
        unsafe { (self.variant_to_type)(u32::from(ty), dst, &payload) }
    }

    /// Run the engine's destructor for a heap value.
    ///
    /// Objects go through `object_destroy`, everything else through the
    /// per-kind destructor.
    pub fn destroy_handle(&self, kind: HandleKind, payload: u64) {
        match kind {
            HandleKind::Object => self.destroy_object(payload),
            kind => {
                let mut word = payload;
                // SAFETY: `word` is the 8-byte value the destructor expects.
                unsafe { (self.handle_destroy)(u8::from(kind) as u32, &mut word) }
            }
        }
    }
}

impl fmt::Debug for NativeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeApi")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn read_utf8(
    to_utf8: unsafe extern "C" fn(src: *const u64, buf: *mut u8, cap: i64) -> i64,
    payload: u64,
) -> Vec<u8> {
    // SAFETY: a null buffer with zero capacity only queries the length.
    let len = unsafe { to_utf8(&payload, std::ptr::null_mut(), 0) }.max(0) as usize;
    let mut buf = vec![0u8; len];
    if len > 0 {
        // SAFETY: `buf` has exactly `len` writable bytes.
        let written = unsafe { to_utf8(&payload, buf.as_mut_ptr(), len as i64) };
        buf.truncate(written.clamp(0, len as i64) as usize);
    }
    buf
}
