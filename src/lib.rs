//! Host-side bridge to a native engine's extension ABI.
//!
//! The bridge moves values across the engine's C ABI and back:
//!
//! - calls into the engine go through resolved [`MethodBind`]s, with arguments
//!   packed into a [`CallFrame`] and every native heap value tracked by a
//!   [`Scope`] that releases it when the call sequence ends;
//! - calls out of the engine arrive at extension classes registered through
//!   [`BridgeBuilder::register_class`], where they are routed to host
//!   overrides or answered with the virtual's default.
//!
//! A process installs one bridge through [`init`] when the engine loads the
//! extension, then reaches it with [`bridge`].
//!
//! ```ignore
//! use extbridge::prelude::*;
//!
//! extbridge::init(api, BridgeConfig::new(), |builder| {
//!     builder.declare_class("Object", None, &[])?;
//!     builder.declare_class("MainLoop", Some("Object"), &MAIN_LOOP_VIRTUALS)?;
//!     builder
//!         .register_class("Game", "MainLoop", |_| Game::default())
//!         .override_virtual("_process", Game::process)
//!         .build()
//! })?;
//!
//! extbridge::initialize(InitializationLevel::Scene)?;
//! ```

use std::sync::OnceLock;

pub use extbridge_core::*;
pub use extbridge_registry::*;

static BRIDGE: OnceLock<&'static Bridge> = OnceLock::new();

/// Build and install the process-wide bridge.
///
/// `setup` declares engine classes, lists the methods the host will call and
/// registers extension classes. A second call fails with
/// [`BridgeError::AlreadyInstalled`] without running `setup`.
pub fn init<F>(api: NativeApi, config: BridgeConfig, setup: F) -> Result<&'static Bridge, BridgeError>
where
    F: FnOnce(&mut BridgeBuilder) -> Result<(), RegistrationError>,
{
    if BRIDGE.get().is_some() {
        return Err(BridgeError::AlreadyInstalled);
    }

    let mut builder = Bridge::builder(config);
    setup(&mut builder)?;
    let bridge = builder.build(api).leak();

    BRIDGE
        .set(bridge)
        .map_err(|_| BridgeError::AlreadyInstalled)?;
    tracing::debug!(version = %api.version, "bridge installed");
    Ok(bridge)
}

/// The installed bridge.
pub fn bridge() -> Result<&'static Bridge, BridgeError> {
    BRIDGE.get().copied().ok_or(BridgeError::NotInstalled)
}

/// Forward an engine initialization level to the installed bridge.
///
/// Returns whether extension classes were registered by this call.
pub fn initialize(level: InitializationLevel) -> Result<bool, BridgeError> {
    Ok(bridge()?.initialize(level))
}

pub mod prelude {
    pub use extbridge_core::{
        BridgeConfig, BridgeError, BridgeProperty, Color, ContractError, FromArg, HandleKind,
        InitializationLevel, InstanceId, IntoReturn, MethodBind, MethodSpec, NativeApi,
        ObjectRef, Ownership, RegistrationError, ReturnValue, Scope, ToNative, Transform2D,
        Variant, Vector2, Vector3, VirtualContext, VirtualFn, VirtualMethodInfo, with_scope,
    };
    pub use extbridge_registry::{Bridge, BridgeBuilder, ClassBuilder, VirtualOutcome};
}
