//! A simulated engine for exercising the bridge without a real engine.
//!
//! [`install`] resets the calling thread's engine and returns its
//! [`NativeApi`](extbridge_core::NativeApi). The engine knows the classes in
//! [`fixtures::CLASSES`], implements every method in [`fixtures::METHODS`],
//! accepts extension classes, and can drive virtual calls on them through
//! [`call_virtual`] the way a real engine loop would.
//!
//! ```ignore
//! let api = extbridge_sim::install();
//! let label = extbridge_sim::new_object("Label");
//! with_scope(&api, |scope| {
//!     set_text.call::<_, ()>(scope, label, ("hi",));
//! });
//! assert_eq!(extbridge_sim::label_text(label.payload()).as_deref(), Some("hi"));
//! ```

mod engine;
pub mod fixtures;

pub use engine::{
    API_VERSION, Stats, api, array_value, call_method, call_virtual, get_property,
    has_host_instance, has_method, install, is_alive, is_extension_class, label_text,
    object_class, property_type, raw_string, set_property, stats, string_value, variant_type,
};

use extbridge_core::ObjectRef;

/// Construct an instance of `class`. Null if the class is unknown.
pub fn new_object(class: &str) -> ObjectRef {
    ObjectRef::assume_alive(api().construct_object(class))
}

/// Destroy an object the way the engine does when it frees a node.
pub fn free_object(object: ObjectRef) {
    api().destroy_object(object.payload());
}
