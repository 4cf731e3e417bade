//! Core types for bridging host code and a native engine's extension ABI.
//!
//! This crate holds everything a single bridged call needs:
//!
//! - [`handle`]: word-sized handles with kind and ownership tags
//! - [`api`]: the engine's function table
//! - [`signature`]: static per-method metadata and slot layouts
//! - [`convert`]: host value <-> slot conversions
//! - [`variant`]: dynamically typed engine values
//! - [`runtime`]: lifetime scopes, call frames, method binds and virtual calls
//!
//! Registration tables live in `extbridge-registry`.

pub mod api;
pub mod config;
pub mod convert;
pub mod error;
pub mod handle;
pub mod math;
pub mod runtime;
pub mod signature;
mod type_hash;
pub mod variant;

#[cfg(test)]
mod testing;

pub use api::{ApiVersion, ClassCreationInfo, ClassMethodInfo, NativeApi, PropertyInfo, StrRef};
pub use config::{BridgeConfig, BridgeProperty, InitializationLevel};
pub use convert::{FromArg, FromSlot, IntoReturn, IntoSlot, ReturnValue, SlotType, ToNative};
pub use error::{BridgeError, ContractError, ConversionError, RegistrationError, contract_violation};
pub use handle::{
    Handle, HandleKind, NativeKind, ObjectRef, Ownership, PackedInt64Handle, RawHandle, Rid,
    StringHandle, StringNameHandle, VariantHandle,
};
pub use math::{Color, Transform2D, Vector2, Vector3};
pub use runtime::{
    CallFrame, FrameArgs, FrameLayout, InstanceId, IntoVirtualFn, MethodBind, Scope,
    VirtualCallable, VirtualContext, VirtualFn, with_scope,
};
pub use signature::{
    DefaultValue, MethodFlags, MethodSignature, MethodSpec, NativeType, ParamInfo, PassBy,
    SlotLayout, VirtualMethodInfo,
};
pub use type_hash::{SymbolHash, hash_constants};
pub use variant::{Variant, VariantType};
