//! Host implementations of engine virtual methods.
//!
//! When the engine calls a virtual on an extension instance, the host side
//! sees it as a [`VirtualContext`]: typed access to the inbound arguments, the
//! host value bound to the instance, and the return slot. A [`VirtualFn`] is a
//! type-erased override that runs against such a context.
//!
//! Typed overrides are plain closures taking the host value first:
//!
//! ```ignore
//! VirtualFn::method(|this: &mut MyLoop, delta: f64| -> bool {
//!     this.elapsed += delta;
//!     this.elapsed > 10.0
//! })
//! ```

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use crate::convert::{FromArg, IntoReturn};
use crate::error::{ContractError, contract_violation};
use crate::signature::{MethodSignature, NativeType, TypeList};

use super::Scope;

/// One inbound virtual call.
pub struct VirtualContext<'a> {
    class: &'a str,
    method: &'a str,
    signature: &'a MethodSignature,
    args: &'a [*const c_void],
    ret: *mut c_void,
    scope: &'a Scope<'a>,
    this: &'a mut (dyn Any + 'static),
    returned: bool,
}

impl<'a> VirtualContext<'a> {
    /// Wrap the raw argument and return pointers of a virtual call.
    ///
    /// # Safety
    ///
    /// `args` must hold one pointer per parameter of `signature`, each to a
    /// slot laid out for that parameter's type, and `ret` must point to a slot
    /// for the return type unless the method is void. All of them must stay
    /// valid for `'a`.
    pub unsafe fn new(
        class: &'a str,
        method: &'a str,
        signature: &'a MethodSignature,
        scope: &'a Scope<'a>,
        this: &'a mut (dyn Any + 'static),
        args: *const *const c_void,
        ret: *mut c_void,
    ) -> Self {
        let count = signature.params.len();
        let args = if count == 0 || args.is_null() {
            &[][..]
        } else {
            // SAFETY: the caller guarantees `count` readable pointers.
            unsafe { std::slice::from_raw_parts(args, count) }
        };
        VirtualContext {
            class,
            method,
            signature,
            args,
            ret,
            scope,
            this,
            returned: false,
        }
    }

    pub fn class(&self) -> &str {
        self.class
    }

    pub fn method(&self) -> &str {
        self.method
    }

    pub fn signature(&self) -> &MethodSignature {
        self.signature
    }

    /// The scope that lives for exactly this call.
    pub fn scope(&self) -> &'a Scope<'a> {
        self.scope
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Decode argument `index` as `T`.
    ///
    /// `T` must match the declared parameter type.
    #[track_caller]
    pub fn arg<T: FromArg>(&self, index: usize) -> T {
        let Some(param) = self.signature.params.get(index) else {
            contract_violation(ContractError::TooManyArguments {
                method: self.method.to_string(),
                declared: self.signature.params.len(),
            });
        };
        if param.ty != T::NATIVE {
            contract_violation(ContractError::ArgumentTypeMismatch {
                method: self.method.to_string(),
                index,
                expected: param.ty,
                actual: T::NATIVE,
            });
        }
        let size = param.ty.layout().size;
        // SAFETY: `new`'s contract makes `args[index]` a live slot of `size` bytes.
        let slot = unsafe { std::slice::from_raw_parts(self.args[index].cast::<u8>(), size) };
        T::from_arg(slot, self.scope)
    }

    /// The host value bound to the instance.
    #[track_caller]
    pub fn this<C: Any>(&mut self) -> &mut C {
        let class = self.class;
        match self.this.downcast_mut::<C>() {
            Some(this) => this,
            None => contract_violation(ContractError::InstanceTypeMismatch {
                class: class.to_string(),
                expected: std::any::type_name::<C>(),
            }),
        }
    }

    /// Write the return value. It becomes the engine's.
    #[track_caller]
    pub fn set_return<T: IntoReturn>(&mut self, value: T) {
        if T::RET != self.signature.ret {
            contract_violation(ContractError::ReturnTypeMismatch {
                method: self.method.to_string(),
                expected: self.signature.ret,
                actual: T::RET,
            });
        }
        match self.signature.ret {
            Some(ty) if !self.ret.is_null() => {
                let size = ty.layout().size;
                // SAFETY: `new`'s contract makes `ret` a live slot of `size` bytes.
                let slot = unsafe { std::slice::from_raw_parts_mut(self.ret.cast::<u8>(), size) };
                value.write_return(slot, self.scope);
            }
            _ => value.write_return(&mut [], self.scope),
        }
        self.returned = true;
    }

    /// Whether the override wrote a return value.
    pub fn has_returned(&self) -> bool {
        self.returned
    }

    /// The raw return slot, for writing a default.
    pub fn return_slot(&mut self) -> Option<&mut [u8]> {
        let ty = self.signature.ret?;
        if self.ret.is_null() {
            return None;
        }
        // SAFETY: as in `set_return`.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ret.cast::<u8>(), ty.layout().size) })
    }
}

/// Something that can run as a virtual override.
pub trait VirtualCallable {
    fn call(&self, ctx: &mut VirtualContext<'_>);
}

impl<F> VirtualCallable for F
where
    F: Fn(&mut VirtualContext<'_>),
{
    fn call(&self, ctx: &mut VirtualContext<'_>) {
        (self)(ctx)
    }
}

/// A type-erased virtual override with the native types it expects.
#[derive(Clone)]
pub struct VirtualFn {
    params: Arc<[NativeType]>,
    ret: Option<NativeType>,
    inner: Arc<dyn VirtualCallable + Send + Sync>,
}

impl VirtualFn {
    /// Wrap a raw override working directly on the context.
    pub fn new<F>(params: &[NativeType], ret: Option<NativeType>, f: F) -> Self
    where
        F: VirtualCallable + Send + Sync + 'static,
    {
        VirtualFn {
            params: params.into(),
            ret,
            inner: Arc::new(f),
        }
    }

    /// Wrap a typed closure `Fn(&mut C, A0, A1, ...) -> R`.
    pub fn method<C, Args, F>(f: F) -> Self
    where
        F: IntoVirtualFn<C, Args>,
    {
        f.into_virtual_fn()
    }

    pub fn params(&self) -> &[NativeType] {
        &self.params
    }

    pub fn ret(&self) -> Option<NativeType> {
        self.ret
    }

    /// Whether this override can stand in for a virtual with `signature`.
    pub fn matches(&self, signature: &MethodSignature) -> bool {
        signature.matches(&self.params, self.ret)
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, ctx: &mut VirtualContext<'_>) {
        self.inner.call(ctx)
    }
}

impl fmt::Debug for VirtualFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFn")
            .field("signature", &format_args!("{}", TypeList(&self.params, self.ret)))
            .finish_non_exhaustive()
    }
}

/// Conversion from typed closures to [`VirtualFn`].
pub trait IntoVirtualFn<C, Args>: Send + Sync + 'static {
    fn into_virtual_fn(self) -> VirtualFn;
}

macro_rules! impl_into_virtual_fn {
    ($($arg:ident $idx:tt),*) => {
        impl<C, F, R, $($arg,)*> IntoVirtualFn<C, ($($arg,)*)> for F
        where
            C: Any,
            F: Fn(&mut C, $($arg),*) -> R + Send + Sync + 'static,
            R: IntoReturn,
            $($arg: FromArg,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn into_virtual_fn(self) -> VirtualFn {
                VirtualFn::new(&[$($arg::NATIVE),*], R::RET, move |ctx: &mut VirtualContext<'_>| {
                    $(let $arg = ctx.arg::<$arg>($idx);)*
                    let result = (self)(ctx.this::<C>(), $($arg),*);
                    ctx.set_return(result);
                })
            }
        }
    };
}

impl_into_virtual_fn!();
impl_into_virtual_fn!(A0 0);
impl_into_virtual_fn!(A0 0, A1 1);
impl_into_virtual_fn!(A0 0, A1 1, A2 2);
impl_into_virtual_fn!(A0 0, A1 1, A2 2, A3 3);
impl_into_virtual_fn!(A0 0, A1 1, A2 2, A3 3, A4 4);
impl_into_virtual_fn!(A0 0, A1 1, A2 2, A3 3, A4 4, A5 5);
