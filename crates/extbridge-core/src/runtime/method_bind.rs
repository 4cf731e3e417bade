//! Resolved engine methods.

use std::ffi::c_void;
use std::fmt;

use crate::api::NativeApi;
use crate::convert::ReturnValue;
use crate::handle::ObjectRef;
use crate::signature::{MethodFlags, MethodSignature, MethodSpec};
use crate::type_hash::SymbolHash;

use super::{CallFrame, FrameArgs, FrameLayout, Scope};

/// A method bind pointer. Binds are immutable and live as long as the engine.
#[derive(Clone, Copy, PartialEq, Eq)]
struct BindPtr(*const c_void);

// SAFETY: the engine hands out method binds as process-lifetime constants
// that may be used from any thread.
unsafe impl Send for BindPtr {}
unsafe impl Sync for BindPtr {}

/// An engine method resolved once and called many times.
///
/// The frame layout is computed at resolution so calls only fill slots.
pub struct MethodBind {
    spec: &'static MethodSpec,
    hash: SymbolHash,
    qualified: String,
    ptr: BindPtr,
    layout: FrameLayout,
}

impl MethodBind {
    /// Look up `spec` in the engine. `None` if the engine has no such method
    /// or its compatibility hash differs.
    pub fn resolve(api: &NativeApi, spec: &'static MethodSpec) -> Option<Self> {
        let ptr = api.method_bind(spec.class, spec.name, spec.hash);
        if ptr.is_null() {
            return None;
        }
        let hash = SymbolHash::from_method(SymbolHash::from_class(spec.class), spec.name);
        tracing::debug!(class = spec.class, method = spec.name, %hash, "method bind resolved");
        Some(MethodBind {
            spec,
            hash,
            qualified: format!("{}::{}", spec.class, spec.name),
            ptr: BindPtr(ptr),
            layout: FrameLayout::of(&spec.signature),
        })
    }

    pub fn hash(&self) -> SymbolHash {
        self.hash
    }

    pub fn class(&self) -> &'static str {
        self.spec.class
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn flags(&self) -> MethodFlags {
        self.spec.flags
    }

    pub fn signature(&self) -> &'static MethodSignature {
        &self.spec.signature
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// An empty frame for this method, for callers that push arguments one by one.
    pub fn frame(&self) -> CallFrame<'_> {
        CallFrame::new(&self.qualified, &self.spec.signature, &self.layout)
    }

    /// Call this method on `instance`.
    ///
    /// `args` fill the leading parameters; the rest come from defaults. Heap
    /// values created for arguments and heap values returned are owned by
    /// `scope`.
    #[track_caller]
    pub fn call<A: FrameArgs, R: ReturnValue>(
        &self,
        scope: &Scope<'_>,
        instance: ObjectRef,
        args: A,
    ) -> R {
        let mut frame =
            CallFrame::build(&self.qualified, &self.spec.signature, &self.layout, scope, args);
        self.invoke_frame(scope, instance, &mut frame);
        frame.extract(scope)
    }

    /// Call a static method.
    #[track_caller]
    pub fn call_static<A: FrameArgs, R: ReturnValue>(&self, scope: &Scope<'_>, args: A) -> R {
        self.call(scope, ObjectRef::null(), args)
    }

    /// Invoke with a frame built from [`frame`](Self::frame).
    #[track_caller]
    pub fn invoke_frame(&self, scope: &Scope<'_>, instance: ObjectRef, frame: &mut CallFrame<'_>) {
        frame.finish(scope);
        // SAFETY: the engine resolved `ptr` for this method's class, name and
        // compatibility hash, and the frame was laid out from its signature.
        unsafe { frame.invoke(scope.api(), self.ptr.0, instance.payload()) };
    }
}

impl fmt::Debug for MethodBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBind")
            .field("method", &self.qualified)
            .field("hash", &self.hash)
            .field("signature", &format_args!("{}", self.spec.signature))
            .finish()
    }
}
