//! Calling into the engine and being called back.
//!
//! ## Key Types
//!
//! - [`Scope`]: owns native handles and releases them exactly once
//! - [`CallFrame`] / [`FrameLayout`]: fixed-layout argument buffers for `ptrcall`
//! - [`MethodBind`]: a resolved engine method with its precomputed layout
//! - [`VirtualContext`] / [`VirtualFn`]: inbound virtual calls and host overrides
//! - [`InstanceId`]: a liveness-checked weak object reference

mod builtins;
mod call_frame;
mod instance;
mod method_bind;
mod scope;
mod virtual_fn;

pub(crate) use builtins::variant_payload;
pub use call_frame::{CallFrame, FrameArgs, FrameLayout};
pub use instance::InstanceId;
pub use method_bind::MethodBind;
pub use scope::{Scope, with_scope};
pub use virtual_fn::{IntoVirtualFn, VirtualCallable, VirtualContext, VirtualFn};
