//! Fixed-layout argument buffers for `ptrcall`.
//!
//! A [`FrameLayout`] is computed once per method from its [`MethodSignature`]:
//! each parameter gets a slot at its natural alignment in declared order and
//! the return slot follows the last parameter. A [`CallFrame`] is one buffer
//! laid out that way, filled argument by argument.
//!
//! ```text
//! mix(a: Int32, b: Float32, c: Object) -> Int64
//!
//!  0       4       8               16              24
//! +-------+-------+---------------+---------------+
//! |   a   |   b   |       c       |      ret      |
//! +-------+-------+---------------+---------------+
//! ```
//!
//! Argument values never influence the layout.

use std::ffi::c_void;

use crate::api::NativeApi;
use crate::convert::{IntoSlot, ReturnValue, ToNative, write_default};
use crate::error::{ContractError, contract_violation};
use crate::handle::Ownership;
use crate::signature::{MethodSignature, PassBy};

use super::Scope;

const FRAME_ALIGN: usize = 16;

#[inline]
const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Byte offsets of every slot of one method's frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    offsets: Vec<usize>,
    widths: Vec<usize>,
    ret: Option<(usize, usize)>,
    size: usize,
}

impl FrameLayout {
    pub fn of(signature: &MethodSignature) -> Self {
        let mut offset = 0;
        let mut offsets = Vec::with_capacity(signature.params.len());
        let mut widths = Vec::with_capacity(signature.params.len());
        for param in signature.params {
            let layout = param.ty.layout();
            offset = align_up(offset, layout.align);
            offsets.push(offset);
            widths.push(layout.size);
            offset += layout.size;
        }
        let ret = signature.ret.map(|ty| {
            let layout = ty.layout();
            offset = align_up(offset, layout.align);
            let slot = (offset, layout.size);
            offset += layout.size;
            slot
        });
        FrameLayout {
            offsets,
            widths,
            ret,
            size: align_up(offset.max(1), FRAME_ALIGN),
        }
    }

    /// Number of argument slots.
    pub fn arg_count(&self) -> usize {
        self.offsets.len()
    }

    /// Byte offset of argument `index`.
    pub fn offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    /// Byte width of argument `index`.
    pub fn width(&self, index: usize) -> usize {
        self.widths[index]
    }

    /// Offset and width of the return slot, `None` for void.
    pub fn ret_slot(&self) -> Option<(usize, usize)> {
        self.ret
    }

    /// Total buffer size, a multiple of 16.
    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; FRAME_ALIGN]);

/// One call's argument and return slots.
pub struct CallFrame<'m> {
    method: &'m str,
    signature: &'m MethodSignature,
    layout: &'m FrameLayout,
    buf: Vec<Chunk>,
    pushed: usize,
}

impl<'m> CallFrame<'m> {
    /// An empty, zeroed frame.
    pub fn new(method: &'m str, signature: &'m MethodSignature, layout: &'m FrameLayout) -> Self {
        CallFrame {
            method,
            signature,
            layout,
            buf: vec![Chunk([0; FRAME_ALIGN]); layout.size() / FRAME_ALIGN],
            pushed: 0,
        }
    }

    /// Build a complete frame from a tuple of host values.
    ///
    /// Values are converted in order and trailing parameters are filled from
    /// their defaults.
    #[track_caller]
    pub fn build<A: FrameArgs>(
        method: &'m str,
        signature: &'m MethodSignature,
        layout: &'m FrameLayout,
        scope: &Scope<'_>,
        args: A,
    ) -> Self {
        let mut frame = CallFrame::new(method, signature, layout);
        args.push_all(&mut frame, scope);
        frame.finish(scope);
        frame
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `Chunk` is plain bytes with no padding.
        unsafe {
            std::slice::from_raw_parts(self.buf.as_ptr().cast::<u8>(), self.buf.len() * FRAME_ALIGN)
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and we hold the only borrow of `buf`.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.buf.as_mut_ptr().cast::<u8>(),
                self.buf.len() * FRAME_ALIGN,
            )
        }
    }

    fn arg_slot_mut(&mut self, index: usize) -> &mut [u8] {
        let (offset, width) = (self.layout.offset(index), self.layout.width(index));
        &mut self.bytes_mut()[offset..offset + width]
    }

    /// Bytes of argument `index`.
    pub fn arg_slot(&self, index: usize) -> &[u8] {
        let (offset, width) = (self.layout.offset(index), self.layout.width(index));
        &self.bytes()[offset..offset + width]
    }

    /// Number of arguments written so far.
    pub fn pushed(&self) -> usize {
        self.pushed
    }

    /// Write the next argument.
    ///
    /// The value's native type must equal the declared parameter type.
    #[track_caller]
    pub fn push<T: IntoSlot>(&mut self, value: &T) -> &mut Self {
        let index = self.pushed;
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
        value.write_slot(self.arg_slot_mut(index));
        self.pushed += 1;
        self
    }

    /// Fill every parameter not yet pushed from its default.
    ///
    /// Heap defaults are created in `scope`. A parameter without a default is
    /// fatal.
    #[track_caller]
    pub fn finish(&mut self, scope: &Scope<'_>) {
        let signature = self.signature;
        for index in self.pushed..signature.params.len() {
            let param = &signature.params[index];
            let Some(default) = param.default else {
                contract_violation(ContractError::MissingArgument {
                    method: self.method.to_string(),
                    index,
                });
            };
            let api = scope.api();
            if let Some(created) = write_default(param.ty, &default, self.arg_slot_mut(index), api)
            {
                scope.register_raw(created);
            }
            self.pushed += 1;
        }
    }

    /// Call `bind` on `instance` with this frame.
    ///
    /// # Safety
    ///
    /// `bind` must be a method bind the engine resolved for a method whose
    /// parameter and return types are exactly this frame's signature.
    #[track_caller]
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub unsafe fn invoke(&mut self, api: &NativeApi, bind: *const c_void, instance: u64) {
        if self.pushed != self.signature.params.len() {
            contract_violation(ContractError::MissingArgument {
                method: self.method.to_string(),
                index: self.pushed,
            });
        }
        let base = self.bytes_mut().as_mut_ptr();
        // SAFETY: every offset is inside the buffer by construction of the layout.
        let args: Vec<*const c_void> = (0..self.layout.arg_count())
            .map(|i| unsafe { base.add(self.layout.offset(i)) }.cast_const().cast::<c_void>())
            .collect();
        let ret = match self.layout.ret_slot() {
            Some((offset, _)) => unsafe { base.add(offset) }.cast::<c_void>(),
            None => std::ptr::null_mut(),
        };
        tracing::trace!(method = self.method, instance, "ptrcall");
        // SAFETY: slots match the signature the caller vouched for.
        unsafe { api.ptrcall(bind, instance, args.as_ptr(), ret) };
    }

    /// Decode the return slot, consuming the frame.
    ///
    /// `R` must match the declared return type. Heap values come back owned by
    /// the caller and are registered in `scope`; objects and resource IDs come
    /// back borrowed. A returned heap value has exactly one owner, so a frame
    /// can be extracted only once.
    #[track_caller]
    pub fn extract<R: ReturnValue>(self, scope: &Scope<'_>) -> R {
        if R::RET != self.signature.ret {
            contract_violation(ContractError::ReturnTypeMismatch {
                method: self.method.to_string(),
                expected: self.signature.ret,
                actual: R::RET,
            });
        }
        let Some((offset, width)) = self.layout.ret_slot() else {
            return R::read_return(&[], Ownership::Borrowed);
        };
        let ownership = match self.signature.ret.map(|ty| ty.layout().pass) {
            Some(PassBy::Handle(kind)) => kind.returned_ownership(),
            _ => Ownership::Borrowed,
        };
        let value = R::read_return(&self.bytes()[offset..offset + width], ownership);
        if let Some(owned) = value.owned_handle() {
            scope.register_raw(owned);
        }
        value
    }
}

/// A tuple of host values that can fill a frame's leading parameters.
pub trait FrameArgs {
    fn push_all(self, frame: &mut CallFrame<'_>, scope: &Scope<'_>);
}

impl FrameArgs for () {
    fn push_all(self, _: &mut CallFrame<'_>, _: &Scope<'_>) {}
}

macro_rules! impl_frame_args {
    ($($arg:ident),+) => {
        impl<$($arg: ToNative),+> FrameArgs for ($($arg,)+) {
            #[allow(non_snake_case)]
            #[track_caller]
            fn push_all(self, frame: &mut CallFrame<'_>, scope: &Scope<'_>) {
                let ($($arg,)+) = self;
                $(frame.push(&$arg.to_native(scope));)+
            }
        }
    };
}

impl_frame_args!(A0);
impl_frame_args!(A0, A1);
impl_frame_args!(A0, A1, A2);
impl_frame_args!(A0, A1, A2, A3);
impl_frame_args!(A0, A1, A2, A3, A4);
impl_frame_args!(A0, A1, A2, A3, A4, A5);
impl_frame_args!(A0, A1, A2, A3, A4, A5, A6);
impl_frame_args!(A0, A1, A2, A3, A4, A5, A6, A7);
