//! Engine-facing callbacks for extension classes.
//!
//! Every function here is handed to the engine at class registration and is
//! entered from native code, so none of them may unwind. Host panics are
//! caught at this boundary; contract violations abort when the bridge is
//! configured to.
//!
//! An instance runs one host call at a time. A call that re-enters an
//! instance already in a call gets the declared default without reaching the
//! host value, and an instance freed from inside one of its own calls is
//! dropped once that call returns.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};

use extbridge_core::{BridgeProperty, ContractError, InstanceId, StrRef, SymbolHash};

use crate::bridge::Bridge;
use crate::virtuals::{VirtualEntry, panic_message};

/// What the engine gets back as `class_userdata` for one extension class.
pub(crate) struct ClassUserdata {
    pub(crate) bridge: &'static Bridge,
    pub(crate) class: SymbolHash,
}

/// The host side of one extension instance, bound to its engine object.
struct InstanceStorage {
    bridge: &'static Bridge,
    class: SymbolHash,
    object: u64,
    /// Set while a host call runs against `host`.
    busy: Cell<bool>,
    /// The engine freed the object while it was busy.
    freed: Cell<bool>,
    host: UnsafeCell<Box<dyn Any + Send>>,
}

/// Report a failure that crossed the boundary and decide whether to go on.
fn boundary_failure(bridge: &Bridge, callback: &str, payload: Box<dyn Any + Send>) {
    if payload.downcast_ref::<ContractError>().is_some()
        && bridge.config().flag(BridgeProperty::AbortOnContractViolation)
    {
        tracing::error!(
            callback,
            error = %panic_message(payload.as_ref()),
            "contract violated in engine callback, aborting"
        );
        std::process::abort();
    }
    tracing::error!(
        callback,
        panic = %panic_message(payload.as_ref()),
        "engine callback panicked"
    );
}

pub(crate) unsafe extern "C" fn create_instance(class_userdata: *mut c_void) -> u64 {
    // SAFETY: the engine passes back the leaked `ClassUserdata` it was given.
    let userdata = unsafe { &*class_userdata.cast::<ClassUserdata>() };
    let bridge = userdata.bridge;
    let Some(class) = bridge.extension(userdata.class) else {
        tracing::error!(class = %userdata.class, "create_instance for unknown extension class");
        return 0;
    };
    let Some(base) = bridge.classes().native_base(&class.name) else {
        tracing::error!(class = %class.name, "extension class has no engine base");
        return 0;
    };

    let api = bridge.api();
    let object = api.construct_object(base.name());
    if object == 0 {
        tracing::error!(class = %class.name, base = base.name(), "engine could not allocate base object");
        return 0;
    }

    let constructor = &class.constructor;
    let id = InstanceId::from_raw(api.instance_id(object));
    let host = match catch_unwind(AssertUnwindSafe(|| constructor(id))) {
        Ok(host) => host,
        Err(payload) => {
            boundary_failure(bridge, "create_instance", payload);
            api.destroy_object(object);
            return 0;
        }
    };

    let storage = Box::new(InstanceStorage {
        bridge,
        class: userdata.class,
        object,
        busy: Cell::new(false),
        freed: Cell::new(false),
        host: UnsafeCell::new(host),
    });
    // SAFETY: the storage is reclaimed in `free_instance`, which the engine
    // calls exactly once when the object is destroyed.
    unsafe { api.set_instance(object, &class.name, Box::into_raw(storage).cast()) };
    tracing::trace!(class = %class.name, object, "extension instance created");
    object
}

pub(crate) unsafe extern "C" fn free_instance(_class_userdata: *mut c_void, instance: *mut c_void) {
    if instance.is_null() {
        return;
    }
    // SAFETY: `instance` is the pointer produced in `create_instance`.
    let storage = unsafe { &*instance.cast::<InstanceStorage>() };
    if storage.busy.get() {
        tracing::debug!(class = %storage.class, object = storage.object, "instance freed during its own call, deferring drop");
        storage.freed.set(true);
        return;
    }
    // SAFETY: not busy, so nothing else refers to the storage.
    unsafe { release_storage(instance) };
}

/// Drop the storage and its host value.
///
/// # Safety
///
/// `instance` came from `create_instance`, is not in a call, and is not used
/// again.
unsafe fn release_storage(instance: *mut c_void) {
    let storage = unsafe { Box::from_raw(instance.cast::<InstanceStorage>()) };
    let (bridge, class, object) = (storage.bridge, storage.class, storage.object);
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || drop(storage))) {
        boundary_failure(bridge, "free_instance", payload);
    }
    tracing::trace!(%class, object, "extension instance freed");
}

pub(crate) unsafe extern "C" fn get_virtual_call_data(
    class_userdata: *mut c_void,
    name: StrRef,
) -> *mut c_void {
    // SAFETY: as in `create_instance`.
    let userdata = unsafe { &*class_userdata.cast::<ClassUserdata>() };
    // SAFETY: the engine passes a valid name for the duration of the call.
    let Some(name) = (unsafe { name.as_str() }) else {
        return std::ptr::null_mut();
    };
    let hash = SymbolHash::from_virtual(userdata.class, name);
    match userdata.bridge.virtuals().resolve_hash(hash) {
        Some(entry) => (entry as *const VirtualEntry).cast_mut().cast(),
        None => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn call_virtual_with_data(
    instance: *mut c_void,
    _name: StrRef,
    call_data: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    if instance.is_null() || call_data.is_null() {
        return;
    }
    // SAFETY: `call_data` came from `get_virtual_call_data`; the entry lives
    // as long as the bridge.
    let entry = unsafe { &*call_data.cast::<VirtualEntry>() };
    // SAFETY: the engine lays out `args` and `ret` from the virtual's
    // declared signature.
    unsafe { dispatch(instance, entry, "call_virtual_with_data", args, ret) };
}

/// Entry point for methods an extension class exposes to the engine.
pub(crate) unsafe extern "C" fn call_method(
    method_userdata: *mut c_void,
    instance: *mut c_void,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    if instance.is_null() || method_userdata.is_null() {
        return;
    }
    // SAFETY: `method_userdata` points into the leaked bridge's method list.
    let entry = unsafe { &*method_userdata.cast::<VirtualEntry>() };
    // SAFETY: the engine lays out `args` and `ret` from the registered
    // method info.
    unsafe { dispatch(instance, entry, "call_method", args, ret) };
}

/// Run `entry` against the host value of `instance`.
///
/// # Safety
///
/// `instance` came from `create_instance` and has not been released; `args`
/// and `ret` match the entry's signature.
unsafe fn dispatch(
    instance: *mut c_void,
    entry: &VirtualEntry,
    callback: &'static str,
    args: *const *const c_void,
    ret: *mut c_void,
) {
    // Shared only: the host is reached through its cell while `busy` is held.
    let storage = unsafe { &*instance.cast::<InstanceStorage>() };
    let bridge = storage.bridge;
    if storage.busy.replace(true) {
        tracing::warn!(
            class = entry.class(),
            method = entry.method(),
            object = storage.object,
            "instance re-entered during a call, returning default"
        );
        unsafe { entry.write_declared_default(bridge.api(), ret) };
        return;
    }

    // SAFETY: `busy` was clear, so this is the only live borrow of the host.
    let host: &mut (dyn Any + 'static) = unsafe { (*storage.host.get()).as_mut() };
    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        entry.invoke(bridge.api(), bridge.config(), host, args, ret)
    }));
    storage.busy.set(false);
    if let Err(payload) = result {
        boundary_failure(bridge, callback, payload);
    }
    if storage.freed.get() {
        // SAFETY: `free_instance` ran during the call and left the drop to us.
        unsafe { release_storage(instance) };
    }
}
